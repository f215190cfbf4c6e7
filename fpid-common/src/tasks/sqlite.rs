//! Task queue stored in the `task_queue` table
//!
//! Any number of worker processes can consume from the same database file.
//! A pop is a single `DELETE ... RETURNING` statement, so each task goes to
//! exactly one consumer.

use super::{Dequeued, TaskArgs, TaskQueue, TaskRecord};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct SqliteTaskQueue {
    pool: SqlitePool,
    poll_interval: Duration,
}

impl SqliteTaskQueue {
    pub fn new(pool: SqlitePool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }

    /// Number of tasks waiting
    pub async fn pending(&self) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM task_queue")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Remove and return the oldest task, if any
    async fn try_pop(&self) -> Result<Option<TaskRecord>> {
        let row: Option<(i64, String, String)> = sqlx::query_as(
            r#"
            DELETE FROM task_queue
            WHERE id = (SELECT id FROM task_queue ORDER BY id LIMIT 1)
            RETURNING id, name, arguments
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, name, arguments)) = row else {
            return Ok(None);
        };

        match serde_json::from_str::<TaskArgs>(&arguments) {
            Ok(arguments) => {
                debug!("Dequeued task {} ({})", id, name);
                Ok(Some(TaskRecord { name, arguments }))
            }
            Err(e) => {
                // Already deleted; nothing else can run it either
                error!("Dropping task {} ({}) with malformed arguments: {}", id, name, e);
                Err(Error::Json(e))
            }
        }
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn enqueue(&self, task: TaskRecord) -> Result<()> {
        let arguments = serde_json::to_string(&task.arguments)?;
        let id = sqlx::query("INSERT INTO task_queue (name, arguments) VALUES (?, ?)")
            .bind(&task.name)
            .bind(arguments)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        debug!("Enqueued task {} ({})", id, task.name);
        Ok(())
    }

    async fn dequeue(&self, wait: Duration, cancel: &CancellationToken) -> Result<Dequeued> {
        let deadline = Instant::now() + wait;
        loop {
            if cancel.is_cancelled() {
                return Ok(Dequeued::Cancelled);
            }
            if let Some(task) = self.try_pop().await? {
                return Ok(Dequeued::Task(task));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Dequeued::TimedOut);
            }
            let nap = self.poll_interval.min(deadline - now);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Dequeued::Cancelled),
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::test_support::test_pool;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_preserves_arguments() {
        let (_dir, pool) = test_pool().await;
        let queue = SqliteTaskQueue::new(pool, Duration::from_millis(5));
        let cancel = CancellationToken::new();

        let task = TaskRecord::new("merge_tracks")
            .with_arg("target", 1)
            .with_arg("sources", json!([2, 3]));
        queue.enqueue(task.clone()).await.unwrap();
        assert_eq!(queue.pending().await.unwrap(), 1);

        let result = queue.dequeue(Duration::from_millis(50), &cancel).await.unwrap();
        assert_eq!(result, Dequeued::Task(task));
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_queue_times_out() {
        let (_dir, pool) = test_pool().await;
        let queue = SqliteTaskQueue::new(pool, Duration::from_millis(5));
        let cancel = CancellationToken::new();

        let started = std::time::Instant::now();
        let result = queue.dequeue(Duration::from_millis(10), &cancel).await.unwrap();

        assert_eq!(result, Dequeued::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_competing_consumers_each_get_distinct_tasks() {
        let (_dir, pool) = test_pool().await;
        let producer = SqliteTaskQueue::new(pool.clone(), Duration::from_millis(5));
        for i in 0..20 {
            producer
                .enqueue(TaskRecord::new("update_stats").with_arg("n", i))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = SqliteTaskQueue::new(pool.clone(), Duration::from_millis(5));
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let mut seen = Vec::new();
                while let Dequeued::Task(task) =
                    queue.dequeue(Duration::from_millis(20), &cancel).await.unwrap()
                {
                    seen.push(task.arguments["n"].as_i64().unwrap());
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_dropped() {
        let (_dir, pool) = test_pool().await;
        sqlx::query("INSERT INTO task_queue (name, arguments) VALUES ('broken', '[1, 2]')")
            .execute(&pool)
            .await
            .unwrap();

        let queue = SqliteTaskQueue::new(pool, Duration::from_millis(5));
        let cancel = CancellationToken::new();
        assert!(queue.dequeue(Duration::from_millis(10), &cancel).await.is_err());
        assert_eq!(queue.pending().await.unwrap(), 0);
    }
}
