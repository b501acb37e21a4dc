//! Transcript analytics
//!
//! Per-speaker talk time, word counts, speaking rate, and interruption
//! counts computed from the segment list after transcription.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use transcribe_core::TranscriptSegment;

/// Stats for one speaker
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SpeakerStats {
    pub talk_time_seconds: f64,
    pub word_count: usize,
    pub segment_count: usize,
    pub words_per_minute: f64,
    /// Times this speaker started before the previous speaker finished
    pub interruptions: usize,
}

/// File-level analytics blob stored on the task result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptAnalytics {
    pub total_duration: f64,
    pub total_words: usize,
    pub speaker_count: usize,
    /// Keyed by resolved speaker name or diarization label
    pub by_speaker: HashMap<String, SpeakerStats>,
}

/// Compute analytics over segments ordered by start time.
/// `speaker_names` maps speaker ids to display labels; segments without a
/// speaker fall under `"unknown"`.
pub fn compute(
    segments: &[TranscriptSegment],
    speaker_names: &HashMap<i64, String>,
) -> TranscriptAnalytics {
    let mut analytics = TranscriptAnalytics::default();
    let mut previous: Option<(&TranscriptSegment, String)> = None;

    for segment in segments {
        let name = segment
            .speaker_id
            .and_then(|id| speaker_names.get(&id).cloned())
            .unwrap_or_else(|| "unknown".to_string());
        let words = segment.text.split_whitespace().count();
        let stats = analytics.by_speaker.entry(name.clone()).or_default();

        stats.talk_time_seconds += segment.duration();
        stats.word_count += words;
        stats.segment_count += 1;
        analytics.total_words += words;
        analytics.total_duration = analytics.total_duration.max(segment.end_time);

        if let Some((prev, prev_name)) = previous.as_ref() {
            if *prev_name != name && segment.start_time < prev.end_time {
                stats.interruptions += 1;
            }
        }
        previous = Some((segment, name));
    }

    for stats in analytics.by_speaker.values_mut() {
        if stats.talk_time_seconds > 0.0 {
            stats.words_per_minute =
                stats.word_count as f64 / (stats.talk_time_seconds / 60.0);
        }
    }
    analytics.speaker_count = analytics.by_speaker.len();
    analytics
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: i64, speaker: Option<i64>, start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            id,
            media_file_id: 1,
            speaker_id: speaker,
            start_time: start,
            end_time: end,
            text: text.to_string(),
            confidence: Some(0.9),
        }
    }

    fn names() -> HashMap<i64, String> {
        [(1, "Alice".to_string()), (2, "Bob".to_string())]
            .into_iter()
            .collect()
    }

    #[test]
    fn talk_time_and_words_accumulate_per_speaker() {
        let segments = vec![
            seg(1, Some(1), 0.0, 10.0, "one two three four five"),
            seg(2, Some(2), 10.0, 15.0, "six seven"),
            seg(3, Some(1), 15.0, 20.0, "eight nine ten"),
        ];
        let analytics = compute(&segments, &names());

        assert_eq!(analytics.speaker_count, 2);
        assert_eq!(analytics.total_words, 10);
        assert!((analytics.total_duration - 20.0).abs() < 1e-9);

        let alice = &analytics.by_speaker["Alice"];
        assert!((alice.talk_time_seconds - 15.0).abs() < 1e-9);
        assert_eq!(alice.word_count, 8);
        assert_eq!(alice.segment_count, 2);
        assert!((alice.words_per_minute - 32.0).abs() < 1e-6);
    }

    #[test]
    fn overlapping_starts_count_as_interruptions() {
        let segments = vec![
            seg(1, Some(1), 0.0, 10.0, "a long monologue continues here"),
            seg(2, Some(2), 8.0, 12.0, "actually wait"),
        ];
        let analytics = compute(&segments, &names());
        assert_eq!(analytics.by_speaker["Bob"].interruptions, 1);
        assert_eq!(analytics.by_speaker["Alice"].interruptions, 0);
    }

    #[test]
    fn same_speaker_overlap_is_not_an_interruption() {
        let segments = vec![
            seg(1, Some(1), 0.0, 10.0, "first"),
            seg(2, Some(1), 9.0, 12.0, "second"),
        ];
        let analytics = compute(&segments, &names());
        assert_eq!(analytics.by_speaker["Alice"].interruptions, 0);
    }

    #[test]
    fn unattributed_segments_fall_under_unknown() {
        let segments = vec![seg(1, None, 0.0, 5.0, "who said this")];
        let analytics = compute(&segments, &names());
        assert_eq!(analytics.by_speaker["unknown"].word_count, 3);
    }

    #[test]
    fn empty_input_is_empty_analytics() {
        let analytics = compute(&[], &names());
        assert_eq!(analytics.speaker_count, 0);
        assert_eq!(analytics.total_words, 0);
    }
}
