//! In-memory store implementations for hermetic tests
//!
//! Behavior mirrors the `Pg*` stores: lifecycle side effects, monotone
//! progress, max-confidence match upserts, case-insensitive profile
//! lookup. Enabled with the `memory` feature; dependent crates pull these
//! in as dev-dependencies to run engine and pipeline scenarios without a
//! database.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use transcribe_core::{
    FileStatus, MediaFile, Speaker, SpeakerMatch, SpeakerProfile, SystemSetting, TaskRecord,
    TaskStatus, TranscriptSegment,
};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::media_files::{MediaFileStore, NewMediaFile};
use crate::segments::{NewSegment, SegmentStore};
use crate::settings_store::SystemSettingsStore;
use crate::speakers::{SpeakerMatchStore, SpeakerNaming, SpeakerProfileStore, SpeakerStore};
use crate::tasks::{TaskAggregate, TaskStore, TaskUpdate};
use crate::topics::TopicStore;
use transcribe_core::TopicSuggestion;

#[derive(Default)]
pub struct MemMediaFileStore {
    pub rows: Mutex<HashMap<i64, MediaFile>>,
    next_id: Mutex<i64>,
}

impl MemMediaFileStore {
    pub fn insert(&self, mut file: MediaFile) -> MediaFile {
        let mut next = self.next_id.lock();
        *next += 1;
        file.id = *next;
        self.rows.lock().insert(file.id, file.clone());
        file
    }

    /// Test helper: a file already in `Processing` with a chosen start time
    pub fn insert_processing(&self, user_id: i64, started_at: DateTime<Utc>) -> MediaFile {
        let mut file = MediaFile::new(user_id, "a.wav", "uploads/a.wav", "audio/wav");
        file.status = FileStatus::Processing;
        file.task_started_at = Some(started_at);
        file.upload_time = started_at;
        self.insert(file)
    }

    pub fn get_sync(&self, id: i64) -> MediaFile {
        self.rows.lock().get(&id).cloned().expect("file exists")
    }

    pub fn set_status(&self, id: i64, status: FileStatus) {
        self.rows.lock().get_mut(&id).expect("file exists").status = status;
    }
}

#[async_trait]
impl MediaFileStore for MemMediaFileStore {
    async fn create(&self, new: NewMediaFile) -> Result<MediaFile, PersistenceError> {
        if let Some(ref hash) = new.file_hash {
            let blocking = self.rows.lock().values().any(|f| {
                f.user_id == new.user_id
                    && f.file_hash.as_deref() == Some(hash)
                    && !f.status.releases_hash()
            });
            if blocking {
                return Err(PersistenceError::DuplicateHash {
                    hash: hash.clone(),
                    user_id: new.user_id,
                });
            }
        }
        let mut file = MediaFile::new(new.user_id, &new.filename, &new.storage_path, &new.content_type);
        file.file_size = new.file_size;
        file.duration = new.duration;
        file.title = new.title;
        file.source_url = new.source_url;
        file.file_hash = new.file_hash;
        Ok(self.insert(file))
    }

    async fn get(&self, id: i64) -> Result<Option<MediaFile>, PersistenceError> {
        Ok(self.rows.lock().get(&id).cloned())
    }

    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<MediaFile>, PersistenceError> {
        Ok(self.rows.lock().values().find(|f| f.uuid == uuid).cloned())
    }

    async fn transition(&self, id: i64, to: FileStatus) -> Result<MediaFile, PersistenceError> {
        let mut rows = self.rows.lock();
        let file = rows
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::not_found("media file", id))?;
        if file.status != to && !file.status.can_transition_to(to) {
            return Err(PersistenceError::InvalidTransition {
                file_id: id,
                from: file.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        file.status = to;
        match to {
            FileStatus::Processing => file.task_started_at = Some(Utc::now()),
            FileStatus::Completed => {
                file.completed_at = Some(Utc::now());
                file.last_error_message = None;
            },
            FileStatus::Orphaned => file.last_recovery_attempt = Some(Utc::now()),
            _ => {},
        }
        Ok(file.clone())
    }

    async fn set_error(&self, id: i64, message: &str) -> Result<(), PersistenceError> {
        let mut rows = self.rows.lock();
        let file = rows
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::not_found("media file", id))?;
        file.status = FileStatus::Error;
        file.last_error_message = Some(message.to_string());
        Ok(())
    }

    async fn mark_orphaned(&self, id: i64, force_delete: bool) -> Result<(), PersistenceError> {
        let mut rows = self.rows.lock();
        let file = rows
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::not_found("media file", id))?;
        file.status = FileStatus::Orphaned;
        file.last_recovery_attempt = Some(Utc::now());
        file.force_delete_eligible = force_delete;
        Ok(())
    }

    async fn increment_recovery_attempts(&self, id: i64) -> Result<i32, PersistenceError> {
        let mut rows = self.rows.lock();
        let file = rows
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::not_found("media file", id))?;
        file.recovery_attempts += 1;
        file.last_recovery_attempt = Some(Utc::now());
        Ok(file.recovery_attempts)
    }

    async fn set_force_delete_eligible(&self, id: i64) -> Result<(), PersistenceError> {
        let mut rows = self.rows.lock();
        rows.get_mut(&id)
            .ok_or_else(|| PersistenceError::not_found("media file", id))?
            .force_delete_eligible = true;
        Ok(())
    }

    async fn set_duration(&self, id: i64, duration: f64) -> Result<(), PersistenceError> {
        let mut rows = self.rows.lock();
        rows.get_mut(&id)
            .ok_or_else(|| PersistenceError::not_found("media file", id))?
            .duration = Some(duration);
        Ok(())
    }

    async fn set_waveform_data(
        &self,
        id: i64,
        waveform: serde_json::Value,
    ) -> Result<(), PersistenceError> {
        let mut rows = self.rows.lock();
        rows.get_mut(&id)
            .ok_or_else(|| PersistenceError::not_found("media file", id))?
            .waveform_data = Some(waveform);
        Ok(())
    }

    async fn set_file_facts(
        &self,
        id: i64,
        file_size: i64,
        file_hash: &str,
    ) -> Result<(), PersistenceError> {
        let mut rows = self.rows.lock();
        let file = rows
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::not_found("media file", id))?;
        file.file_size = file_size;
        file.file_hash = Some(file_hash.to_string());
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: FileStatus,
    ) -> Result<Vec<MediaFile>, PersistenceError> {
        let mut v: Vec<MediaFile> = self
            .rows
            .lock()
            .values()
            .filter(|f| f.status == status)
            .cloned()
            .collect();
        v.sort_by_key(|f| f.id);
        Ok(v)
    }

    async fn processing_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MediaFile>, PersistenceError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|f| {
                f.status == FileStatus::Processing
                    && f.task_started_at.map_or(false, |t| t < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn uploaded_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MediaFile>, PersistenceError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|f| f.status == FileStatus::Processing && f.upload_time < cutoff)
            .cloned()
            .collect())
    }

    async fn orphaned_older_than(
        &self,
        threshold: Duration,
    ) -> Result<Vec<MediaFile>, PersistenceError> {
        let cutoff = Utc::now() - threshold;
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|f| {
                f.status == FileStatus::Orphaned
                    && f.last_recovery_attempt.map_or(false, |t| t < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn force_delete_candidates(&self) -> Result<Vec<MediaFile>, PersistenceError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|f| {
                f.force_delete_eligible
                    && matches!(f.status, FileStatus::Orphaned | FileStatus::Error)
            })
            .cloned()
            .collect())
    }

    async fn count_by_status(&self) -> Result<Vec<(FileStatus, i64)>, PersistenceError> {
        let mut counts: HashMap<FileStatus, i64> = HashMap::new();
        for file in self.rows.lock().values() {
            *counts.entry(file.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn delete(&self, id: i64) -> Result<(), PersistenceError> {
        self.rows.lock().remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemTaskStore {
    pub rows: Mutex<HashMap<String, TaskRecord>>,
}

impl MemTaskStore {
    pub fn insert(&self, record: TaskRecord) {
        self.rows.lock().insert(record.id.clone(), record);
    }

    pub fn get_sync(&self, id: &str) -> Option<TaskRecord> {
        self.rows.lock().get(id).cloned()
    }

    pub fn all(&self) -> Vec<TaskRecord> {
        self.rows.lock().values().cloned().collect()
    }
}

#[async_trait]
impl TaskStore for MemTaskStore {
    async fn create(&self, record: &TaskRecord) -> Result<(), PersistenceError> {
        self.rows.lock().insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TaskRecord>, PersistenceError> {
        Ok(self.rows.lock().get(id).cloned())
    }

    async fn update(&self, id: &str, update: TaskUpdate) -> Result<TaskRecord, PersistenceError> {
        let mut rows = self.rows.lock();
        let task = rows
            .get_mut(id)
            .ok_or_else(|| PersistenceError::not_found("task", id))?;

        let new_status = update.status.unwrap_or(task.status);
        let retry_reentry =
            task.status == TaskStatus::Pending && new_status == TaskStatus::InProgress;
        if let Some(p) = update.progress {
            let p = p.clamp(0.0, 1.0);
            task.progress = if retry_reentry { p } else { p.max(task.progress) };
        }
        task.status = new_status;
        if let Some(msg) = update.error_message {
            task.error_message = Some(msg);
        }
        if let Some(result) = update.result {
            task.result = Some(result);
        }
        task.updated_at = Utc::now();
        if new_status.is_terminal() && task.completed_at.is_none() {
            task.completed_at = Some(Utc::now());
        }
        Ok(task.clone())
    }

    async fn mark_failed(&self, id: &str, message: &str) -> Result<(), PersistenceError> {
        self.update(
            id,
            TaskUpdate {
                status: Some(TaskStatus::Failed),
                error_message: Some(message.to_string()),
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }

    async fn list_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<Vec<TaskRecord>, PersistenceError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|t| t.media_file_id == Some(media_file_id))
            .cloned()
            .collect())
    }

    async fn active_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<Vec<TaskRecord>, PersistenceError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|t| t.media_file_id == Some(media_file_id) && t.status.is_active())
            .cloned()
            .collect())
    }

    async fn aggregate_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<TaskAggregate, PersistenceError> {
        let mut agg = TaskAggregate::default();
        for task in self.rows.lock().values() {
            if task.media_file_id != Some(media_file_id) {
                continue;
            }
            match task.status {
                TaskStatus::Pending => agg.pending += 1,
                TaskStatus::InProgress => agg.in_progress += 1,
                TaskStatus::Completed => agg.completed += 1,
                TaskStatus::Failed => agg.failed += 1,
            }
        }
        Ok(agg)
    }

    async fn active_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, PersistenceError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|t| t.status.is_active() && t.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn all_active(&self) -> Result<Vec<TaskRecord>, PersistenceError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|t| t.status.is_active())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemSpeakerStore {
    pub rows: Mutex<HashMap<i64, Speaker>>,
    next_id: Mutex<i64>,
}

impl MemSpeakerStore {
    pub fn insert(&self, mut speaker: Speaker) -> Speaker {
        let mut next = self.next_id.lock();
        *next += 1;
        speaker.id = *next;
        self.rows.lock().insert(speaker.id, speaker.clone());
        speaker
    }

    pub fn get_sync(&self, id: i64) -> Speaker {
        self.rows.lock().get(&id).cloned().expect("speaker exists")
    }
}

#[async_trait]
impl SpeakerStore for MemSpeakerStore {
    async fn create_for_file(
        &self,
        media_file_id: i64,
        user_id: i64,
        labels: &[String],
    ) -> Result<Vec<Speaker>, PersistenceError> {
        Ok(labels
            .iter()
            .map(|label| self.insert(Speaker::new(media_file_id, user_id, label)))
            .collect())
    }

    async fn get(&self, id: i64) -> Result<Option<Speaker>, PersistenceError> {
        Ok(self.rows.lock().get(&id).cloned())
    }

    async fn list_for_file(&self, media_file_id: i64) -> Result<Vec<Speaker>, PersistenceError> {
        let mut v: Vec<Speaker> = self
            .rows
            .lock()
            .values()
            .filter(|s| s.media_file_id == media_file_id)
            .cloned()
            .collect();
        v.sort_by_key(|s| s.id);
        Ok(v)
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Speaker>, PersistenceError> {
        let mut v: Vec<Speaker> = self
            .rows
            .lock()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        v.sort_by_key(|s| s.id);
        Ok(v)
    }

    async fn list_for_profile(&self, profile_id: i64) -> Result<Vec<Speaker>, PersistenceError> {
        let mut v: Vec<Speaker> = self
            .rows
            .lock()
            .values()
            .filter(|s| s.profile_id == Some(profile_id))
            .cloned()
            .collect();
        v.sort_by_key(|s| s.id);
        Ok(v)
    }

    async fn apply_naming(&self, id: i64, naming: SpeakerNaming) -> Result<(), PersistenceError> {
        let mut rows = self.rows.lock();
        let speaker = rows
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::not_found("speaker", id))?;
        if let Some(name) = naming.display_name {
            speaker.display_name = Some(name);
        }
        if let Some(name) = naming.suggested_name {
            speaker.suggested_name = Some(name);
        }
        if let Some(c) = naming.confidence {
            speaker.confidence = Some(c);
        }
        if let Some(v) = naming.verified {
            speaker.verified = v;
        }
        if let Some(p) = naming.profile_id {
            speaker.profile_id = p;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemSpeakerProfileStore {
    pub rows: Mutex<HashMap<i64, SpeakerProfile>>,
    next_id: Mutex<i64>,
}

#[async_trait]
impl SpeakerProfileStore for MemSpeakerProfileStore {
    async fn create(&self, profile: &SpeakerProfile) -> Result<SpeakerProfile, PersistenceError> {
        let mut next = self.next_id.lock();
        *next += 1;
        let mut created = profile.clone();
        created.id = *next;
        self.rows.lock().insert(created.id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: i64) -> Result<Option<SpeakerProfile>, PersistenceError> {
        Ok(self.rows.lock().get(&id).cloned())
    }

    async fn find_by_name(
        &self,
        user_id: i64,
        name: &str,
    ) -> Result<Option<SpeakerProfile>, PersistenceError> {
        Ok(self
            .rows
            .lock()
            .values()
            .find(|p| p.user_id == user_id && p.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<SpeakerProfile>, PersistenceError> {
        let mut v: Vec<SpeakerProfile> = self
            .rows
            .lock()
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        v.sort_by_key(|p| p.id);
        Ok(v)
    }

    async fn set_embedding_count(&self, id: i64, count: i32) -> Result<(), PersistenceError> {
        let mut rows = self.rows.lock();
        let profile = rows
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::not_found("profile", id))?;
        profile.embedding_count = count;
        profile.last_embedding_update = Some(Utc::now());
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), PersistenceError> {
        self.rows.lock().remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemSpeakerMatchStore {
    pub rows: Mutex<HashMap<(i64, i64), SpeakerMatch>>,
}

#[async_trait]
impl SpeakerMatchStore for MemSpeakerMatchStore {
    async fn upsert(&self, m: SpeakerMatch) -> Result<(), PersistenceError> {
        let mut rows = self.rows.lock();
        let key = (m.speaker1_id, m.speaker2_id);
        match rows.get(&key) {
            Some(existing) if existing.confidence >= m.confidence => {},
            _ => {
                rows.insert(key, m);
            },
        }
        Ok(())
    }

    async fn list_for_speaker(
        &self,
        speaker_id: i64,
    ) -> Result<Vec<SpeakerMatch>, PersistenceError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|m| m.speaker1_id == speaker_id || m.speaker2_id == speaker_id)
            .copied()
            .collect())
    }
}

#[derive(Default)]
pub struct MemSegmentStore {
    pub rows: Mutex<HashMap<i64, Vec<TranscriptSegment>>>,
    next_id: Mutex<i64>,
}

#[async_trait]
impl SegmentStore for MemSegmentStore {
    async fn replace_for_file(
        &self,
        media_file_id: i64,
        segments: &[NewSegment],
    ) -> Result<usize, PersistenceError> {
        let mut next = self.next_id.lock();
        let rows: Vec<TranscriptSegment> = segments
            .iter()
            .map(|s| {
                *next += 1;
                TranscriptSegment {
                    id: *next,
                    media_file_id,
                    speaker_id: s.speaker_id,
                    start_time: s.start_time,
                    end_time: s.end_time,
                    text: s.text.clone(),
                    confidence: s.confidence,
                }
            })
            .collect();
        self.rows.lock().insert(media_file_id, rows);
        Ok(segments.len())
    }

    async fn list_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<Vec<TranscriptSegment>, PersistenceError> {
        let mut v = self
            .rows
            .lock()
            .get(&media_file_id)
            .cloned()
            .unwrap_or_default();
        v.sort_by(|a, b| {
            a.start_time
                .partial_cmp(&b.start_time)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(v)
    }

    async fn count_for_file(&self, media_file_id: i64) -> Result<i64, PersistenceError> {
        Ok(self
            .rows
            .lock()
            .get(&media_file_id)
            .map(|v| v.len() as i64)
            .unwrap_or(0))
    }
}

#[derive(Default)]
pub struct MemSettingsStore {
    pub values: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SystemSettingsStore for MemSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<SystemSetting, PersistenceError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(SystemSetting::new(key, value, description))
    }

    async fn get_all(&self) -> Result<Vec<SystemSetting>, PersistenceError> {
        Ok(self
            .values
            .lock()
            .iter()
            .map(|(k, v)| SystemSetting::new(k, v, None))
            .collect())
    }
}

#[derive(Default)]
pub struct MemTopicStore {
    pub rows: Mutex<HashMap<i64, TopicSuggestion>>,
    next_id: Mutex<i64>,
}

#[async_trait]
impl TopicStore for MemTopicStore {
    async fn upsert(
        &self,
        suggestion: &TopicSuggestion,
    ) -> Result<TopicSuggestion, PersistenceError> {
        let mut stored = suggestion.clone();
        let mut rows = self.rows.lock();
        if let Some(existing) = rows.get(&suggestion.media_file_id) {
            stored.id = existing.id;
        } else {
            let mut next = self.next_id.lock();
            *next += 1;
            stored.id = *next;
        }
        rows.insert(suggestion.media_file_id, stored.clone());
        Ok(stored)
    }

    async fn get_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<Option<TopicSuggestion>, PersistenceError> {
        Ok(self.rows.lock().get(&media_file_id).cloned())
    }

    async fn record_decision(
        &self,
        media_file_id: i64,
        item_name: &str,
        decision: &str,
    ) -> Result<(), PersistenceError> {
        if let Some(suggestion) = self.rows.lock().get_mut(&media_file_id) {
            suggestion
                .user_decisions
                .insert(item_name.to_string(), decision.to_string());
        }
        Ok(())
    }

    async fn reject(&self, media_file_id: i64) -> Result<(), PersistenceError> {
        if let Some(suggestion) = self.rows.lock().get_mut(&media_file_id) {
            suggestion.status = transcribe_core::SuggestionStatus::Rejected;
        }
        Ok(())
    }
}
