//! Static task dispatch
//!
//! Task types map to handlers through a build-time registry; the router
//! rejects anything it has no handler for. Handlers receive a context that
//! carries the payload plus the progress/cancellation channel back into
//! the engine.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use transcribe_core::{CategorizedError, TaskKind};

/// Why a handler gave up
#[derive(Debug)]
pub struct TaskFailure {
    /// Raw message, categorized for user presentation by the executor
    pub message: String,
    /// The run observed a cancellation and stopped on purpose
    pub cancelled: bool,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cancelled: false,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            message: "cancelled by user".to_string(),
            cancelled: true,
        }
    }

    pub fn categorize(&self) -> CategorizedError {
        CategorizedError::categorize(Some(&self.message))
    }
}

impl<E: std::error::Error> From<E> for TaskFailure {
    fn from(err: E) -> Self {
        Self::new(err.to_string())
    }
}

/// Execution context handed to a handler
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub user_id: i64,
    pub media_file_id: Option<i64>,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    progress: Arc<dyn ProgressReporter>,
}

/// Signal returned from a progress report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSignal {
    Continue,
    /// The file moved to `Cancelling`; the handler must stop
    Cancelled,
}

/// Progress reporting seam implemented by the engine
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, task_id: &str, progress: f32) -> ProgressSignal;
}

impl TaskContext {
    pub fn new(
        task_id: String,
        user_id: i64,
        media_file_id: Option<i64>,
        kind: TaskKind,
        payload: serde_json::Value,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            task_id,
            user_id,
            media_file_id,
            kind,
            payload,
            progress,
        }
    }

    /// Report progress in [0, 1]. The returned signal must be honored:
    /// `Cancelled` means the file is being cancelled and the handler
    /// terminates with [`TaskFailure::cancelled`].
    pub async fn report_progress(&self, progress: f32) -> ProgressSignal {
        self.progress.report(&self.task_id, progress).await
    }
}

/// One unit of pipeline work
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run to completion, returning the result blob stored on the task row
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskFailure>;
}

/// Build-time task-type -> handler table
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> &mut Self {
        if self.handlers.insert(kind, handler).is_some() {
            tracing::warn!(kind = kind.as_str(), "Handler replaced in registry");
        }
        self
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn supports(&self, kind: TaskKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl TaskHandler for Noop {
        async fn run(&self, _ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
            Ok(serde_json::json!({}))
        }
    }

    #[test]
    fn registry_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register(TaskKind::Waveform, Arc::new(Noop));
        assert!(registry.supports(TaskKind::Waveform));
        assert!(!registry.supports(TaskKind::Transcription));
        assert!(registry.get(TaskKind::Transcription).is_none());
    }

    #[test]
    fn failure_categorization_flows_through() {
        let failure = TaskFailure::new("download failed: connection refused");
        let categorized = failure.categorize();
        assert!(categorized.is_retryable);
        assert!(!failure.cancelled);
        assert!(TaskFailure::cancelled().cancelled);
    }
}
