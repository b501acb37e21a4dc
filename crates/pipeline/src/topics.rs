//! Topic extraction stage
//!
//! Asks the chat backend for tag and collection suggestions, parses the
//! JSON defensively, drops low-confidence items, and upserts the per-file
//! suggestion set for the user to review.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use transcribe_core::{Notification, NotificationType, TopicItem, TopicSuggestion};
use transcribe_engine::notify::publish_or_log;
use transcribe_engine::{TaskContext, TaskFailure, TaskHandler};
use transcribe_llm::{parse_topic_response, topic_prompt, TopicEntry};

use crate::{file_id_from_payload, render_transcript, PipelineDeps};

/// Suggestions below this confidence are discarded
const MIN_CONFIDENCE: f32 = 0.5;
const MAX_TAGS: usize = 10;
const MAX_COLLECTIONS: usize = 3;

pub struct TopicExtractionHandler {
    deps: Arc<PipelineDeps>,
}

impl TopicExtractionHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }
}

fn to_items(entries: Vec<TopicEntry>, lowercase: bool, cap: usize) -> Vec<TopicItem> {
    let mut items: Vec<TopicItem> = entries
        .into_iter()
        .filter(|e| e.confidence >= MIN_CONFIDENCE && !e.name.trim().is_empty())
        .map(|e| TopicItem {
            name: if lowercase {
                e.name.trim().to_lowercase()
            } else {
                e.name.trim().to_string()
            },
            confidence: e.confidence.clamp(0.0, 1.0),
            rationale: e.rationale,
        })
        .collect();
    items.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    items.dedup_by(|a, b| a.name == b.name);
    items.truncate(cap);
    items
}

#[async_trait]
impl TaskHandler for TopicExtractionHandler {
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        let deps = &self.deps;
        let file_id = file_id_from_payload(&ctx.payload)?;
        let file = deps
            .files
            .get(file_id)
            .await?
            .ok_or_else(|| TaskFailure::new(format!("media file {file_id} not found")))?;

        publish_or_log(
            deps.notifications.as_ref(),
            Notification::file_status(
                file.user_id,
                NotificationType::TopicExtractionStatus,
                file.uuid,
                "processing",
                Some(0),
                None,
            ),
        )
        .await;

        let segments = deps.segments.list_for_file(file_id).await?;
        if segments.is_empty() {
            return Err(TaskFailure::new("no transcript segments for topic extraction"));
        }
        let speakers = deps.speakers.list_for_file(file_id).await?;
        let names: HashMap<i64, String> = speakers
            .iter()
            .map(|s| (s.id, s.resolved_name().to_string()))
            .collect();
        let transcript = render_transcript(&segments, &names, None, None);

        ctx.report_progress(0.3).await;

        let (system, user) = topic_prompt(file_id, file.duration, &transcript);
        let response = deps
            .chat
            .complete(transcribe_core::ChatRequest::new(system, user))
            .await
            .map_err(|e| TaskFailure::new(format!("topic extraction call failed: {e}")))?;

        let parsed = parse_topic_response(&response.content)
            .map_err(|e| TaskFailure::new(format!("topic extraction parse failed: {e}")))?;

        let tags = to_items(parsed.suggested_tags, true, MAX_TAGS);
        let collections = to_items(parsed.suggested_collections, false, MAX_COLLECTIONS);

        ctx.report_progress(0.8).await;

        let stored = deps
            .topics
            .upsert(&TopicSuggestion::new(file_id, tags, collections))
            .await?;

        publish_or_log(
            deps.notifications.as_ref(),
            Notification::file_status(
                file.user_id,
                NotificationType::TopicExtractionStatus,
                file.uuid,
                "completed",
                Some(100),
                None,
            ),
        )
        .await;

        Ok(serde_json::json!({
            "tags": stored.suggested_tags.len(),
            "collections": stored.suggested_collections.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, confidence: f32) -> TopicEntry {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "confidence": confidence,
        }))
        .unwrap()
    }

    #[test]
    fn low_confidence_and_duplicates_are_dropped() {
        let items = to_items(
            vec![
                entry("Budget Planning", 0.9),
                entry("budget planning", 0.8),
                entry("noise", 0.2),
            ],
            true,
            MAX_TAGS,
        );
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "budget planning");
        assert_eq!(items[0].confidence, 0.9);
    }

    #[test]
    fn caps_are_applied_after_sorting() {
        let entries: Vec<TopicEntry> = (0..6)
            .map(|i| entry(&format!("c{i}"), 0.5 + i as f32 * 0.05))
            .collect();
        let items = to_items(entries, false, MAX_COLLECTIONS);
        assert_eq!(items.len(), 3);
        // the highest-confidence entries survive
        assert!(items[0].confidence >= items[1].confidence);
        assert_eq!(items[0].name, "c5");
    }
}
