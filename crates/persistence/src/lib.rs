//! PostgreSQL persistence layer for the transcription pipeline
//!
//! The relational store is the source of truth for all state. Every store
//! is a trait with a `Pg*` implementation so the engine and pipeline crates
//! can run against in-memory fakes in tests.
//!
//! Provides persistent storage for:
//! - Media files and their lifecycle state
//! - Task records (mirror of every submitted job)
//! - Speakers, speaker profiles, and cross-file matches
//! - Transcript segments
//! - Topic suggestions
//! - System settings (runtime-adjustable retry policy)
//! - Best-effort distributed task locks

pub mod db;
pub mod error;
pub mod media_files;
#[cfg(feature = "memory")]
pub mod memory;
pub mod schema;
pub mod segments;
pub mod settings_store;
pub mod speakers;
pub mod task_lock;
pub mod tasks;
pub mod topics;
pub mod users;

pub use db::{Database, DatabaseConfig};
pub use error::PersistenceError;
pub use media_files::{MediaFileStore, NewMediaFile, PgMediaFileStore};
pub use segments::{NewSegment, PgSegmentStore, SegmentStore};
pub use settings_store::{
    GarbageCleanupConfig, PgSystemSettingsStore, RetryConfig, SystemSettingsStore,
};
pub use speakers::{
    PgSpeakerMatchStore, PgSpeakerProfileStore, PgSpeakerStore, SpeakerMatchStore, SpeakerNaming,
    SpeakerProfileStore, SpeakerStore,
};
pub use task_lock::{LockOutcome, PgTaskLockManager, TaskLockManager};
pub use tasks::{PgTaskStore, TaskAggregate, TaskStore, TaskUpdate};
pub use topics::{PgTopicStore, TopicStore};
pub use users::{PgUserStore, UserStore};

/// Combined persistence layer with all stores
pub struct PersistenceLayer {
    pub db: Database,
    pub users: PgUserStore,
    pub media_files: PgMediaFileStore,
    pub tasks: PgTaskStore,
    pub speakers: PgSpeakerStore,
    pub profiles: PgSpeakerProfileStore,
    pub matches: PgSpeakerMatchStore,
    pub segments: PgSegmentStore,
    pub settings: PgSystemSettingsStore,
    pub topics: PgTopicStore,
    pub locks: PgTaskLockManager,
}

/// Initialize the persistence layer: connect, ensure schema, build stores
pub async fn init(config: DatabaseConfig) -> Result<PersistenceLayer, PersistenceError> {
    let db = Database::connect(config).await?;
    db.ensure_schema().await?;

    Ok(PersistenceLayer {
        db: db.clone(),
        users: PgUserStore::new(db.clone()),
        media_files: PgMediaFileStore::new(db.clone()),
        tasks: PgTaskStore::new(db.clone()),
        speakers: PgSpeakerStore::new(db.clone()),
        profiles: PgSpeakerProfileStore::new(db.clone()),
        matches: PgSpeakerMatchStore::new(db.clone()),
        segments: PgSegmentStore::new(db.clone()),
        settings: PgSystemSettingsStore::new(db.clone()),
        topics: PgTopicStore::new(db.clone()),
        locks: PgTaskLockManager::new(db),
    })
}
