//! Table definitions executed by `Database::ensure_schema`

use sqlx::PgPool;

const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        uuid UUID NOT NULL UNIQUE,
        role TEXT NOT NULL DEFAULT 'user',
        active BOOLEAN NOT NULL DEFAULT TRUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS media_files (
        id BIGSERIAL PRIMARY KEY,
        uuid UUID NOT NULL UNIQUE,
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        filename TEXT NOT NULL,
        storage_path TEXT NOT NULL,
        file_size BIGINT NOT NULL DEFAULT 0,
        duration DOUBLE PRECISION,
        content_type TEXT NOT NULL,
        title TEXT,
        author TEXT,
        description TEXT,
        source_url TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        recovery_attempts INTEGER NOT NULL DEFAULT 0,
        upload_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        task_started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        last_recovery_attempt TIMESTAMPTZ,
        last_error_message TEXT,
        force_delete_eligible BOOLEAN NOT NULL DEFAULT FALSE,
        waveform_data JSONB,
        thumbnail_path TEXT,
        file_hash TEXT,
        metadata_raw JSONB,
        metadata_important JSONB
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_media_files_user_status
        ON media_files(user_id, status)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_media_files_hash
        ON media_files(user_id, file_hash)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        media_file_id BIGINT REFERENCES media_files(id) ON DELETE SET NULL,
        task_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        progress REAL NOT NULL DEFAULT 0,
        result JSONB,
        error_message TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        completed_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_tasks_file_status
        ON tasks(media_file_id, status)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS speaker_profiles (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        description TEXT,
        embedding_count INTEGER NOT NULL DEFAULT 0,
        last_embedding_update TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (user_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS speakers (
        id BIGSERIAL PRIMARY KEY,
        media_file_id BIGINT NOT NULL REFERENCES media_files(id) ON DELETE CASCADE,
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        display_name TEXT,
        suggested_name TEXT,
        confidence REAL,
        verified BOOLEAN NOT NULL DEFAULT FALSE,
        profile_id BIGINT REFERENCES speaker_profiles(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_speakers_file ON speakers(media_file_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_speakers_user ON speakers(user_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS speaker_matches (
        speaker1_id BIGINT NOT NULL REFERENCES speakers(id) ON DELETE CASCADE,
        speaker2_id BIGINT NOT NULL REFERENCES speakers(id) ON DELETE CASCADE,
        confidence REAL NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (speaker1_id, speaker2_id),
        CHECK (speaker1_id < speaker2_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transcript_segments (
        id BIGSERIAL PRIMARY KEY,
        media_file_id BIGINT NOT NULL REFERENCES media_files(id) ON DELETE CASCADE,
        speaker_id BIGINT REFERENCES speakers(id) ON DELETE SET NULL,
        start_time DOUBLE PRECISION NOT NULL,
        end_time DOUBLE PRECISION NOT NULL,
        text TEXT NOT NULL,
        confidence REAL,
        CHECK (start_time <= end_time)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_segments_file_start
        ON transcript_segments(media_file_id, start_time)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS topic_suggestions (
        id BIGSERIAL PRIMARY KEY,
        media_file_id BIGINT NOT NULL UNIQUE REFERENCES media_files(id) ON DELETE CASCADE,
        suggested_tags JSONB NOT NULL DEFAULT '[]',
        suggested_collections JSONB NOT NULL DEFAULT '[]',
        status TEXT NOT NULL DEFAULT 'pending',
        user_decisions JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS system_settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        description TEXT,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_locks (
        name TEXT PRIMARY KEY,
        holder TEXT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Create all tables and indexes if they do not exist
pub async fn create_tables(pool: &PgPool) -> Result<(), sqlx::Error> {
    for ddl in CREATE_TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}
