//! Prompt builders and response parsers for the NLP stages
//!
//! Models are asked for JSON inside an `<answer>` block; parsing is
//! defensive because completions routinely wrap JSON in code fences or
//! prose.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// System prompt for BLUF-style summaries
const SUMMARY_SYSTEM: &str = "You are an expert meeting analyst. Produce a \
BLUF (bottom line up front) summary: one-paragraph bottom line, then key \
points, decisions, and action items with owners where stated. Be factual \
and concise; never invent content that is not in the transcript.";

/// System prompt for tag/collection suggestions
const TOPIC_SYSTEM: &str = "You are an expert content analyst specializing \
in media organization. Analyze transcripts and suggest tags and collections \
that help users organize their library. Tags are short, lowercase, \
searchable keywords (1-3 words). Collections are user-friendly group names. \
Focus on substantive topics, ignore small talk and logistics, and be \
conservative with confidence scores. Always answer with valid JSON.";

/// System prompt for speaker-name hints
const SPEAKER_SYSTEM: &str = "You identify speakers in meeting transcripts. \
Infer names only from direct evidence: introductions, being addressed by \
name, or signatures. Use the provided known-speaker list when a voice \
plausibly matches. Answer with valid JSON and include a confidence between \
0 and 1 for every prediction; never guess without evidence.";

/// Build the summarization request body
pub fn summary_prompt(title: &str, duration_secs: Option<f64>, transcript: &str) -> (String, String) {
    let duration = duration_secs
        .map(|d| format!("{:.0} seconds", d))
        .unwrap_or_else(|| "unknown".to_string());
    let user = format!(
        "<document>\n<title>{title}</title>\n<duration>{duration}</duration>\n\
         <transcript>\n{transcript}\n</transcript>\n</document>\n\n\
         Summarize this transcript. Start with the bottom line, then list \
         key points, decisions, and action items."
    );
    (SUMMARY_SYSTEM.to_string(), user)
}

/// Build the topic extraction request body
pub fn topic_prompt(file_id: i64, duration_secs: Option<f64>, transcript: &str) -> (String, String) {
    let duration = duration_secs.unwrap_or(0.0);
    let user = format!(
        "<document>\n<file_id>{file_id}</file_id>\n\
         <duration_seconds>{duration:.0}</duration_seconds>\n\
         <transcript>\n{transcript}\n</transcript>\n</document>\n\n\
         Suggest 3-10 tags and 1-3 collections for organizing this file.\n\
         Respond inside <answer> tags with JSON of this shape:\n\
         {{\"suggested_tags\": [{{\"name\": \"tag-name\", \"confidence\": 0.9, \
         \"rationale\": \"why\"}}], \"suggested_collections\": [{{\"name\": \
         \"Collection Name\", \"confidence\": 0.8, \"rationale\": \"why\"}}]}}\n\
         Tags must be lowercase and specific; never suggest generic tags \
         like \"discussion\" or \"meeting\"."
    );
    (TOPIC_SYSTEM.to_string(), user)
}

/// Build the speaker identification request body. `known_speakers` are the
/// user's profile names with descriptions.
pub fn speaker_hint_prompt(
    transcript: &str,
    speaker_labels: &[String],
    known_speakers: &[(String, String)],
) -> (String, String) {
    let known = if known_speakers.is_empty() {
        "none".to_string()
    } else {
        known_speakers
            .iter()
            .map(|(name, description)| format!("- {name}: {description}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let labels = speaker_labels.join(", ");
    let user = format!(
        "<transcript>\n{transcript}\n</transcript>\n\n\
         Unidentified speaker labels: {labels}\n\
         Known speakers:\n{known}\n\n\
         For each label you can identify, respond inside <answer> tags with \
         JSON: {{\"speaker_predictions\": [{{\"speaker_label\": \"SPEAKER_00\", \
         \"suggested_name\": \"Alice\", \"confidence\": 0.8}}]}}. Omit labels \
         with no evidence."
    );
    (SPEAKER_SYSTEM.to_string(), user)
}

/// Parsed topic suggestion payload
#[derive(Debug, Clone, Deserialize)]
pub struct TopicResponse {
    #[serde(default)]
    pub suggested_tags: Vec<TopicEntry>,
    #[serde(default)]
    pub suggested_collections: Vec<TopicEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicEntry {
    pub name: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Parsed speaker prediction payload
#[derive(Debug, Clone, Deserialize)]
pub struct SpeakerPrediction {
    pub speaker_label: String,
    pub suggested_name: String,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct SpeakerPredictionEnvelope {
    #[serde(default)]
    speaker_predictions: Vec<SpeakerPrediction>,
}

static ANSWER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<answer>\s*(.*?)\s*</answer>").expect("static regex"));
static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("static regex"));

/// Pull the JSON payload out of a completion: `<answer>` tags first, then
/// code fences, then the first `{ ... }` span.
pub fn extract_json_block(completion: &str) -> Option<String> {
    if let Some(caps) = ANSWER_RE.captures(completion) {
        let inner = caps.get(1)?.as_str();
        // the answer block itself may be fenced
        if let Some(fenced) = FENCE_RE.captures(inner) {
            return Some(fenced.get(1)?.as_str().to_string());
        }
        return Some(inner.to_string());
    }
    if let Some(caps) = FENCE_RE.captures(completion) {
        return Some(caps.get(1)?.as_str().to_string());
    }
    let start = completion.find('{')?;
    let end = completion.rfind('}')?;
    (start < end).then(|| completion[start..=end].to_string())
}

/// Parse a topic extraction completion
pub fn parse_topic_response(completion: &str) -> Result<TopicResponse, crate::LlmError> {
    let json = extract_json_block(completion)
        .ok_or_else(|| crate::LlmError::Parse("no JSON in completion".to_string()))?;
    serde_json::from_str(&json).map_err(|e| crate::LlmError::Parse(e.to_string()))
}

/// Parse a speaker identification completion
pub fn parse_speaker_predictions(
    completion: &str,
) -> Result<Vec<SpeakerPrediction>, crate::LlmError> {
    let json = extract_json_block(completion)
        .ok_or_else(|| crate::LlmError::Parse("no JSON in completion".to_string()))?;
    let envelope: SpeakerPredictionEnvelope =
        serde_json::from_str(&json).map_err(|e| crate::LlmError::Parse(e.to_string()))?;
    Ok(envelope.speaker_predictions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_answer_tags() {
        let completion = "thinking...\n<answer>\n{\"suggested_tags\": []}\n</answer>";
        assert_eq!(
            extract_json_block(completion).unwrap(),
            "{\"suggested_tags\": []}"
        );
    }

    #[test]
    fn extracts_fenced_json() {
        let completion = "Here you go:\n```json\n{\"a\": 1}\n```\ndone";
        assert_eq!(extract_json_block(completion).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn falls_back_to_brace_span() {
        let completion = "Sure: {\"a\": 1} hope that helps";
        assert_eq!(extract_json_block(completion).unwrap(), "{\"a\": 1}");
        assert_eq!(extract_json_block("no json here"), None);
    }

    #[test]
    fn parses_topic_payload() {
        let completion = r#"<answer>{
            "suggested_tags": [{"name": "quarterly-planning", "confidence": 0.9}],
            "suggested_collections": [{"name": "Team Meetings", "confidence": 0.8,
                                       "rationale": "recurring series"}]
        }</answer>"#;
        let parsed = parse_topic_response(completion).unwrap();
        assert_eq!(parsed.suggested_tags.len(), 1);
        assert_eq!(parsed.suggested_tags[0].name, "quarterly-planning");
        assert_eq!(parsed.suggested_collections[0].rationale.as_deref(), Some("recurring series"));
    }

    #[test]
    fn parses_speaker_predictions() {
        let completion = r#"{"speaker_predictions": [
            {"speaker_label": "SPEAKER_00", "suggested_name": "Alice", "confidence": 0.8}
        ]}"#;
        let predictions = parse_speaker_predictions(completion).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].suggested_name, "Alice");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_topic_response("not json at all").is_err());
    }
}
