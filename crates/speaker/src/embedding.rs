//! Per-file embedding extraction
//!
//! Segments are grouped by diarization label; each speaker contributes its
//! longest usable segments, and the per-segment embeddings are averaged
//! (normalized) into one vector per speaker.

use std::collections::HashMap;
use std::path::Path;

use transcribe_config::constants::speaker::{MAX_SEGMENTS_PER_SPEAKER, MIN_SEGMENT_DURATION};
use transcribe_core::{EmbeddingModel, RawSegment};

use crate::similarity::mean_embedding;
use crate::SpeakerEngineError;

/// Pick the segments worth embedding for one speaker: drop everything
/// shorter than the minimum duration, keep the longest few.
pub fn select_segments<'a>(segments: &[&'a RawSegment]) -> Vec<&'a RawSegment> {
    let mut usable: Vec<&RawSegment> = segments
        .iter()
        .copied()
        .filter(|s| s.end - s.start >= MIN_SEGMENT_DURATION)
        .collect();
    usable.sort_by(|a, b| {
        let da = a.end - a.start;
        let db = b.end - b.start;
        db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
    });
    usable.truncate(MAX_SEGMENTS_PER_SPEAKER);
    usable
}

/// Average several segment embeddings into one speaker vector
pub fn aggregate_embeddings(embeddings: &[Vec<f32>]) -> Result<Vec<f32>, SpeakerEngineError> {
    mean_embedding(embeddings)
        .ok_or_else(|| SpeakerEngineError::Embedding("no embeddings to aggregate".to_string()))
}

/// Extract one aggregated embedding per speaker.
///
/// `speaker_mapping` maps diarization labels to database speaker ids.
/// Speakers whose segments are all too short, or whose extraction fails
/// entirely, are skipped with a warning; a partial failure only drops the
/// affected segment.
pub async fn extract_speaker_embeddings(
    model: &dyn EmbeddingModel,
    audio_path: &Path,
    segments: &[RawSegment],
    speaker_mapping: &HashMap<String, i64>,
) -> Result<HashMap<i64, Vec<f32>>, SpeakerEngineError> {
    let mut by_speaker: HashMap<i64, Vec<&RawSegment>> = HashMap::new();
    for segment in segments {
        let Some(label) = segment.speaker_label.as_deref() else {
            continue;
        };
        let Some(&speaker_id) = speaker_mapping.get(label) else {
            continue;
        };
        by_speaker.entry(speaker_id).or_default().push(segment);
    }

    let mut result = HashMap::new();
    for (speaker_id, speaker_segments) in by_speaker {
        let selected = select_segments(&speaker_segments);
        if selected.is_empty() {
            tracing::warn!(speaker_id, "No segments long enough to embed");
            continue;
        }

        let mut embeddings = Vec::with_capacity(selected.len());
        for segment in selected {
            match model.embed_window(audio_path, segment.start, segment.end).await {
                Ok(embedding) => embeddings.push(embedding),
                Err(e) => {
                    tracing::warn!(
                        speaker_id,
                        start = segment.start,
                        error = %e,
                        "Embedding extraction failed for segment"
                    );
                },
            }
        }

        match aggregate_embeddings(&embeddings) {
            Ok(aggregated) => {
                tracing::info!(
                    speaker_id,
                    segments = embeddings.len(),
                    "Aggregated speaker embedding"
                );
                result.insert(speaker_id, aggregated);
            },
            Err(_) => {
                tracing::warn!(speaker_id, "No valid embeddings for speaker");
            },
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, label: &str) -> RawSegment {
        RawSegment {
            start,
            end,
            text: "text".to_string(),
            speaker_label: Some(label.to_string()),
            confidence: Some(0.9),
        }
    }

    #[test]
    fn short_segments_are_dropped() {
        let segments = vec![seg(0.0, 0.3, "A"), seg(1.0, 2.0, "A")];
        let refs: Vec<&RawSegment> = segments.iter().collect();
        let selected = select_segments(&refs);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].start, 1.0);
    }

    #[test]
    fn only_the_longest_five_are_kept() {
        let segments: Vec<RawSegment> = (0..8)
            .map(|i| seg(i as f64 * 10.0, i as f64 * 10.0 + 1.0 + i as f64, "A"))
            .collect();
        let refs: Vec<&RawSegment> = segments.iter().collect();
        let selected = select_segments(&refs);
        assert_eq!(selected.len(), 5);
        // longest first
        assert!(selected[0].end - selected[0].start >= selected[4].end - selected[4].start);
    }

    struct FixedModel;

    #[async_trait::async_trait]
    impl EmbeddingModel for FixedModel {
        async fn embed_window(
            &self,
            _audio: &Path,
            start: f64,
            _end: f64,
        ) -> anyhow::Result<Vec<f32>> {
            if start < 0.0 {
                anyhow::bail!("bad window");
            }
            Ok(vec![1.0, 0.0, 0.0])
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    #[tokio::test]
    async fn extraction_groups_by_mapped_speaker() {
        let segments = vec![
            seg(0.0, 2.0, "SPEAKER_00"),
            seg(3.0, 5.0, "SPEAKER_00"),
            seg(6.0, 8.0, "SPEAKER_01"),
            seg(9.0, 9.2, "SPEAKER_01"),
        ];
        let mapping: HashMap<String, i64> =
            [("SPEAKER_00".to_string(), 11), ("SPEAKER_01".to_string(), 12)]
                .into_iter()
                .collect();

        let out = extract_speaker_embeddings(&FixedModel, Path::new("a.wav"), &segments, &mapping)
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!((out[&11][0] - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn unmapped_labels_are_ignored() {
        let segments = vec![seg(0.0, 2.0, "SPEAKER_09")];
        let mapping = HashMap::new();
        let out = extract_speaker_embeddings(&FixedModel, Path::new("a.wav"), &segments, &mapping)
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
