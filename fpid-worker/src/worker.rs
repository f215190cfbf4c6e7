//! Task queue worker loop
//!
//! States:
//! - Idle: blocked in `dequeue` for at most `dequeue_timeout`
//! - Running: executing one handler to completion
//!
//! A timeout sends the loop back to Idle after `idle_backoff`. A handler that
//! fails or panics is logged and the loop carries on. Unknown task names are
//! logged as errors and dropped. There is no acknowledgment, retry or
//! dead-letter queue: a dequeued task is gone whatever its outcome.
//!
//! The loop only ends when the cancellation token fires. Cancellation is
//! observed while idle, never in the middle of a handler.

use crate::context::WorkerContext;
use crate::registry::TaskRegistry;
use fpid_common::config::WorkerConfig;
use fpid_common::tasks::{Dequeued, TaskQueue, TaskRecord};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub dequeue_timeout: Duration,
    pub idle_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            dequeue_timeout: config.dequeue_timeout(),
            idle_backoff: config.idle_backoff(),
        }
    }
}

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
    pub unknown: u64,
    pub timeouts: u64,
    pub dequeue_errors: u64,
}

enum TaskOutcome {
    Completed,
    Failed,
    Unknown,
}

pub struct Worker {
    id: Uuid,
    queue: Arc<dyn TaskQueue>,
    registry: Arc<TaskRegistry>,
    context: WorkerContext,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        registry: Arc<TaskRegistry>,
        context: WorkerContext,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue,
            registry,
            context,
            settings,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run until `cancel` fires, then return what was processed
    pub async fn run(&self, cancel: CancellationToken) -> WorkerStats {
        let span = info_span!("worker", id = %self.id);
        self.run_loop(cancel).instrument(span).await
    }

    async fn run_loop(&self, cancel: CancellationToken) -> WorkerStats {
        info!(tasks = ?self.registry.names(), "Starting worker");
        let mut stats = WorkerStats::default();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let dequeued = self
                .queue
                .dequeue(self.settings.dequeue_timeout, &cancel)
                .await;

            match dequeued {
                Ok(Dequeued::Task(task)) => match self.run_task(task).await {
                    TaskOutcome::Completed => stats.completed += 1,
                    TaskOutcome::Failed => stats.failed += 1,
                    TaskOutcome::Unknown => stats.unknown += 1,
                },
                Ok(Dequeued::TimedOut) => {
                    debug!("No tasks to run");
                    stats.timeouts += 1;
                    if !self.pause(&cancel).await {
                        break;
                    }
                }
                Ok(Dequeued::Cancelled) => break,
                Err(e) => {
                    error!("Failed to dequeue task: {}", e);
                    stats.dequeue_errors += 1;
                    if !self.pause(&cancel).await {
                        break;
                    }
                }
            }
        }

        info!(
            completed = stats.completed,
            failed = stats.failed,
            unknown = stats.unknown,
            "Worker stopped"
        );
        stats
    }

    /// Sleep for the idle backoff; false if cancelled meanwhile
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.settings.idle_backoff) => true,
        }
    }

    async fn run_task(&self, task: TaskRecord) -> TaskOutcome {
        let TaskRecord { name, arguments } = task;

        let Some(handler) = self.registry.get(&name) else {
            error!("Unknown task: {}", name);
            return TaskOutcome::Unknown;
        };

        let args_display = Value::Object(arguments.clone());
        info!("Running task {}({})", name, args_display);
        let started = Instant::now();

        let result = AssertUnwindSafe(handler.run(&self.context, &arguments))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(())) => {
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Finished task {}({})",
                    name,
                    args_display
                );
                TaskOutcome::Completed
            }
            Ok(Err(e)) => {
                error!("Error running task {}({}): {}", name, args_display, e);
                TaskOutcome::Failed
            }
            Err(panic) => {
                error!(
                    "Task {}({}) panicked: {}",
                    name,
                    args_display,
                    panic_message(panic.as_ref())
                );
                TaskOutcome::Failed
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
