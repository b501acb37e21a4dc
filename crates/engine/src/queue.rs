//! Queue router and task executor
//!
//! Each queue owns a dispatcher task and a semaphore sized to its
//! concurrency, so a long GPU job never blocks an NLP slot and the GPU
//! queue stays single-slot globally. Submissions persist a task record
//! first; a failed enqueue marks the record failed with
//! `QUEUE_UNAVAILABLE` instead of leaving a ghost row.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use uuid::Uuid;

use transcribe_core::{QueueName, TaskKind, TaskRecord, TaskStatus};
use transcribe_persistence::{TaskStore, TaskUpdate};

use crate::lifecycle::LifecycleService;
use crate::registry::{
    HandlerRegistry, ProgressReporter, ProgressSignal, TaskContext, TaskFailure,
};
use crate::EngineError;

/// A task on its way to a worker slot
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: String,
    pub user_id: i64,
    pub media_file_id: Option<i64>,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    /// System tasks (beat schedule, recovery) occupy queue slots but are
    /// not mirrored in the task record store, which tracks media jobs
    pub ephemeral: bool,
}

/// A child task planned behind a parent (chain / fan-out)
#[derive(Debug, Clone)]
pub struct PlannedTask {
    pub user_id: i64,
    pub media_file_id: Option<i64>,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
}

/// The task-engine backend seam: enqueue plus the live-worker probe the
/// recovery subsystem consults at boot
#[async_trait]
pub trait TaskBackend: Send + Sync {
    async fn enqueue(&self, task: QueuedTask) -> Result<(), EngineError>;

    /// Ids of tasks currently queued or running in this process
    fn live_task_ids(&self) -> HashSet<String>;
}

/// Submission seam for components that schedule work (recovery, stage
/// fan-out) without needing the whole engine
#[async_trait]
pub trait TaskSubmitter: Send + Sync {
    async fn submit_task(
        &self,
        user_id: i64,
        media_file_id: Option<i64>,
        kind: TaskKind,
        payload: serde_json::Value,
    ) -> Result<String, EngineError>;
}

#[async_trait]
impl TaskSubmitter for TaskEngine {
    async fn submit_task(
        &self,
        user_id: i64,
        media_file_id: Option<i64>,
        kind: TaskKind,
        payload: serde_json::Value,
    ) -> Result<String, EngineError> {
        self.submit(user_id, media_file_id, kind, payload).await
    }
}

/// Worker process signals: connection hygiene around task execution
#[async_trait]
pub trait WorkerHooks: Send + Sync {
    /// Called once when the worker pool starts
    async fn on_worker_start(&self);

    /// Called after every finished task
    async fn after_task(&self);
}

/// Hooks that dispose pooled database connections, so no connection is
/// reused across worker start or a long GPU job
pub struct DbWorkerHooks(pub transcribe_persistence::Database);

#[async_trait]
impl WorkerHooks for DbWorkerHooks {
    async fn on_worker_start(&self) {
        if let Err(e) = self.0.reconnect().await {
            tracing::warn!(error = %e, "Pool rebuild on worker start failed");
        }
    }

    async fn after_task(&self) {
        self.0.dispose_after_task().await;
    }
}

struct EngineInner {
    registry: HandlerRegistry,
    tasks: Arc<dyn TaskStore>,
    lifecycle: Arc<LifecycleService>,
    hooks: Option<Arc<dyn WorkerHooks>>,
    senders: HashMap<QueueName, mpsc::UnboundedSender<QueuedTask>>,
    live: DashMap<String, QueueName>,
    continuations: DashMap<String, Vec<PlannedTask>>,
}

/// In-process queue router + executor
#[derive(Clone)]
pub struct TaskEngine {
    inner: Arc<EngineInner>,
}

impl TaskEngine {
    /// Build the engine and spawn one dispatcher per queue
    pub async fn start(
        registry: HandlerRegistry,
        tasks: Arc<dyn TaskStore>,
        lifecycle: Arc<LifecycleService>,
        hooks: Option<Arc<dyn WorkerHooks>>,
    ) -> Self {
        if let Some(ref hooks) = hooks {
            hooks.on_worker_start().await;
        }

        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        for queue in QueueName::ALL {
            let (tx, rx) = mpsc::unbounded_channel::<QueuedTask>();
            senders.insert(queue, tx);
            receivers.push((queue, rx));
        }

        let engine = Self {
            inner: Arc::new(EngineInner {
                registry,
                tasks,
                lifecycle,
                hooks,
                senders,
                live: DashMap::new(),
                continuations: DashMap::new(),
            }),
        };

        for (queue, rx) in receivers {
            let slots = Arc::new(Semaphore::new(queue.concurrency()));
            let engine = engine.clone();
            let rx = Arc::new(Mutex::new(rx));
            tokio::spawn(async move {
                engine.dispatch_loop(queue, rx, slots).await;
            });
        }

        engine
    }

    async fn dispatch_loop(
        &self,
        queue: QueueName,
        rx: Arc<Mutex<mpsc::UnboundedReceiver<QueuedTask>>>,
        slots: Arc<Semaphore>,
    ) {
        loop {
            let task = {
                let mut rx = rx.lock().await;
                match rx.recv().await {
                    Some(task) => task,
                    None => break,
                }
            };
            let Ok(permit) = slots.clone().acquire_owned().await else {
                break;
            };
            let engine = self.clone();
            tokio::spawn(async move {
                engine.execute(task).await;
                drop(permit);
            });
        }
        tracing::debug!(queue = queue.as_str(), "Dispatcher stopped");
    }

    /// Public operation: persist a task record and dispatch it to the
    /// queue its type routes to.
    pub async fn submit(
        &self,
        user_id: i64,
        media_file_id: Option<i64>,
        kind: TaskKind,
        payload: serde_json::Value,
    ) -> Result<String, EngineError> {
        if !self.inner.registry.supports(kind) {
            return Err(EngineError::UnknownTaskType(kind.as_str().to_string()));
        }

        let task_id = Uuid::new_v4().to_string();
        let record = TaskRecord::new(&task_id, user_id, media_file_id, kind);
        self.inner.tasks.create(&record).await?;

        let queued = QueuedTask {
            task_id: task_id.clone(),
            user_id,
            media_file_id,
            kind,
            payload,
            ephemeral: false,
        };
        if let Err(e) = self.enqueue(queued).await {
            // the record exists but no worker will see it; fail it rather
            // than leaving a ghost for recovery to trip over
            let _ = self
                .inner
                .tasks
                .mark_failed(&task_id, "QUEUE_UNAVAILABLE: task bus unreachable")
                .await;
            return Err(e);
        }

        tracing::info!(
            task_id = %task_id,
            kind = kind.as_str(),
            queue = kind.queue().as_str(),
            "Task submitted"
        );
        Ok(task_id)
    }

    /// Atomic status/progress update on a task record
    pub async fn update(
        &self,
        task_id: &str,
        update: TaskUpdate,
    ) -> Result<TaskRecord, EngineError> {
        Ok(self.inner.tasks.update(task_id, update).await?)
    }

    /// `b` runs only after `a` completes; if `a` fails, `b` is skipped
    pub async fn chain(&self, parent_task_id: &str, child: PlannedTask) -> Result<(), EngineError> {
        self.plan_after(parent_task_id, vec![child]).await
    }

    /// Children dispatch in parallel after the parent completes; no
    /// ordering guarantee between them
    pub async fn fan_out(
        &self,
        parent_task_id: &str,
        children: Vec<PlannedTask>,
    ) -> Result<(), EngineError> {
        self.plan_after(parent_task_id, children).await
    }

    async fn plan_after(
        &self,
        parent_task_id: &str,
        children: Vec<PlannedTask>,
    ) -> Result<(), EngineError> {
        // the parent may already be terminal; resolve immediately then
        let parent = self
            .inner
            .tasks
            .get(parent_task_id)
            .await?
            .ok_or_else(|| EngineError::Other(format!("parent task {parent_task_id} not found")))?;

        match parent.status {
            TaskStatus::Completed => {
                for child in children {
                    self.submit_planned(child).await;
                }
            },
            TaskStatus::Failed => {
                tracing::info!(
                    parent = parent_task_id,
                    error = parent.error_message.as_deref().unwrap_or("unknown"),
                    "Parent failed; skipping planned children"
                );
            },
            _ => {
                self.inner
                    .continuations
                    .entry(parent_task_id.to_string())
                    .or_default()
                    .extend(children);

                // the parent may have finished between the status read and
                // the registration; resolve anything it left behind
                let parent = self.inner.tasks.get(parent_task_id).await?;
                if let Some(parent) = parent {
                    if parent.status == TaskStatus::Completed {
                        if let Some((_, stranded)) =
                            self.inner.continuations.remove(parent_task_id)
                        {
                            for child in stranded {
                                self.submit_planned(child).await;
                            }
                        }
                    } else if parent.status == TaskStatus::Failed {
                        self.inner.continuations.remove(parent_task_id);
                    }
                }
            },
        }
        Ok(())
    }

    async fn submit_planned(&self, child: PlannedTask) {
        if let Err(e) = self
            .submit(child.user_id, child.media_file_id, child.kind, child.payload)
            .await
        {
            tracing::error!(kind = child.kind.as_str(), error = %e, "Planned child submission failed");
        }
    }

    /// Enqueue a system task (beat schedule, recovery) that occupies a
    /// queue slot without a task record
    pub async fn submit_system(
        &self,
        kind: TaskKind,
        payload: serde_json::Value,
    ) -> Result<String, EngineError> {
        if !self.inner.registry.supports(kind) {
            return Err(EngineError::UnknownTaskType(kind.as_str().to_string()));
        }
        let task_id = Uuid::new_v4().to_string();
        self.enqueue(QueuedTask {
            task_id: task_id.clone(),
            user_id: 0,
            media_file_id: None,
            kind,
            payload,
            ephemeral: true,
        })
        .await?;
        Ok(task_id)
    }

    async fn execute(&self, task: QueuedTask) {
        if task.ephemeral {
            self.execute_ephemeral(task).await;
            return;
        }

        let started = self
            .inner
            .tasks
            .update(
                &task.task_id,
                TaskUpdate {
                    status: Some(TaskStatus::InProgress),
                    progress: Some(0.0),
                    ..Default::default()
                },
            )
            .await;
        if let Err(e) = started {
            tracing::error!(task_id = %task.task_id, error = %e, "Could not start task");
            self.inner.live.remove(&task.task_id);
            return;
        }

        let Some(handler) = self.inner.registry.get(task.kind) else {
            // submit() filters unknown kinds; reaching here means the
            // registry changed under us
            let _ = self
                .inner
                .tasks
                .mark_failed(&task.task_id, "no handler registered")
                .await;
            self.inner.live.remove(&task.task_id);
            return;
        };

        let reporter = Arc::new(EngineProgress {
            tasks: self.inner.tasks.clone(),
            lifecycle: self.inner.lifecycle.clone(),
            media_file_id: task.media_file_id,
        });
        let ctx = TaskContext::new(
            task.task_id.clone(),
            task.user_id,
            task.media_file_id,
            task.kind,
            task.payload.clone(),
            reporter,
        );

        let outcome = handler.run(ctx).await;
        self.finish(&task, outcome).await;

        self.inner.live.remove(&task.task_id);
        if let Some(ref hooks) = self.inner.hooks {
            hooks.after_task().await;
        }
    }

    async fn execute_ephemeral(&self, task: QueuedTask) {
        let Some(handler) = self.inner.registry.get(task.kind) else {
            self.inner.live.remove(&task.task_id);
            return;
        };
        let ctx = TaskContext::new(
            task.task_id.clone(),
            task.user_id,
            None,
            task.kind,
            task.payload,
            Arc::new(NullProgress),
        );
        if let Err(failure) = handler.run(ctx).await {
            tracing::error!(
                kind = task.kind.as_str(),
                error = %failure.message,
                "System task failed"
            );
        }
        self.inner.live.remove(&task.task_id);
        if let Some(ref hooks) = self.inner.hooks {
            hooks.after_task().await;
        }
    }

    async fn finish(&self, task: &QueuedTask, outcome: Result<serde_json::Value, TaskFailure>) {
        match outcome {
            Ok(result) => {
                let updated = self
                    .inner
                    .tasks
                    .update(
                        &task.task_id,
                        TaskUpdate {
                            status: Some(TaskStatus::Completed),
                            progress: Some(1.0),
                            result: Some(result),
                            ..Default::default()
                        },
                    )
                    .await;
                if let Err(e) = updated {
                    tracing::error!(task_id = %task.task_id, error = %e, "Completion update failed");
                }

                if let Some((_, children)) = self.inner.continuations.remove(&task.task_id) {
                    for child in children {
                        self.submit_planned(child).await;
                    }
                }
            },
            Err(failure) => {
                let _ = self
                    .inner
                    .tasks
                    .mark_failed(&task.task_id, &failure.message)
                    .await;

                // planned children never run behind a failure
                if self.inner.continuations.remove(&task.task_id).is_some() {
                    tracing::info!(task_id = %task.task_id, "Dropped planned children of failed task");
                }

                if let Some(file_id) = task.media_file_id {
                    if failure.cancelled {
                        if let Err(e) = self.inner.lifecycle.finish_cancel_if_idle(file_id).await {
                            tracing::error!(file_id, error = %e, "Cancel completion failed");
                        }
                    } else if task.kind.failure_is_fatal() {
                        if let Err(e) = self.inner.lifecycle.fail(file_id, &failure.message).await {
                            tracing::error!(file_id, error = %e, "File failure transition failed");
                        }
                    } else {
                        tracing::warn!(
                            task_id = %task.task_id,
                            kind = task.kind.as_str(),
                            error = %failure.message,
                            "Non-critical stage failed; file state unchanged"
                        );
                    }
                }
            },
        }
    }
}

#[async_trait]
impl TaskBackend for TaskEngine {
    async fn enqueue(&self, task: QueuedTask) -> Result<(), EngineError> {
        let queue = task.kind.queue();
        let sender = self
            .inner
            .senders
            .get(&queue)
            .ok_or_else(|| EngineError::QueueUnavailable(queue.as_str().to_string()))?;
        let task_id = task.task_id.clone();
        sender
            .send(task)
            .map_err(|_| EngineError::QueueUnavailable(queue.as_str().to_string()))?;
        self.inner.live.insert(task_id, queue);
        Ok(())
    }

    fn live_task_ids(&self) -> HashSet<String> {
        self.inner.live.iter().map(|e| e.key().clone()).collect()
    }
}

/// System tasks report nothing and cannot be cancelled per-file
struct NullProgress;

#[async_trait]
impl ProgressReporter for NullProgress {
    async fn report(&self, _task_id: &str, _progress: f32) -> ProgressSignal {
        ProgressSignal::Continue
    }
}

/// Progress reporting: persists the new progress and surfaces a pending
/// cancellation to the handler
struct EngineProgress {
    tasks: Arc<dyn TaskStore>,
    lifecycle: Arc<LifecycleService>,
    media_file_id: Option<i64>,
}

#[async_trait]
impl ProgressReporter for EngineProgress {
    async fn report(&self, task_id: &str, progress: f32) -> ProgressSignal {
        if let Err(e) = self
            .tasks
            .update(
                task_id,
                TaskUpdate {
                    progress: Some(progress),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::warn!(task_id, error = %e, "Progress update failed");
        }

        if let Some(file_id) = self.media_file_id {
            match self.lifecycle.is_cancelling(file_id).await {
                Ok(true) => return ProgressSignal::Cancelled,
                Ok(false) => {},
                Err(e) => {
                    tracing::warn!(file_id, error = %e, "Cancellation probe failed");
                },
            }
        }
        ProgressSignal::Continue
    }
}
