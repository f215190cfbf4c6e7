//! Task queue protocol
//!
//! A task is a name plus an ordered JSON object of arguments. Dequeue is
//! destructive: once a consumer has a task, no one else will see it, and
//! there is no acknowledgment or redelivery.

mod memory;
mod sqlite;

pub use memory::InMemoryTaskQueue;
pub use sqlite::SqliteTaskQueue;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Task arguments, in insertion order
pub type TaskArgs = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    #[serde(default)]
    pub arguments: TaskArgs,
}

impl TaskRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: TaskArgs::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a single dequeue call
#[derive(Debug, Clone, PartialEq)]
pub enum Dequeued {
    Task(TaskRecord),
    /// Nothing arrived within the wait time
    TimedOut,
    /// The cancellation token fired while waiting
    Cancelled,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: TaskRecord) -> Result<()>;

    /// Wait up to `wait` for a task.
    ///
    /// Implementations check `cancel` before taking a task, so a cancelled
    /// caller never removes a task it is not going to run.
    async fn dequeue(&self, wait: Duration, cancel: &CancellationToken) -> Result<Dequeued>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arguments_keep_insertion_order() {
        let task = TaskRecord::new("merge_mbids")
            .with_arg("target", "b")
            .with_arg("sources", json!(["a"]))
            .with_arg("all", true);

        let keys: Vec<&str> = task.arguments.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["target", "sources", "all"]);
    }

    #[test]
    fn test_missing_arguments_default_to_empty() {
        let task: TaskRecord = serde_json::from_str(r#"{"name": "update_stats"}"#).unwrap();
        assert_eq!(task, TaskRecord::new("update_stats"));
    }
}
