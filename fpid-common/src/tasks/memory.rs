//! In-process task queue

use super::{Dequeued, TaskQueue, TaskRecord};
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// FIFO queue shared by tasks within one process
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    tasks: Mutex<VecDeque<TaskRecord>>,
    available: Notify,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop(&self) -> Option<TaskRecord> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: TaskRecord) -> Result<()> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
        self.available.notify_one();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration, cancel: &CancellationToken) -> Result<Dequeued> {
        let deadline = Instant::now() + wait;
        loop {
            if cancel.is_cancelled() {
                return Ok(Dequeued::Cancelled);
            }
            if let Some(task) = self.pop() {
                return Ok(Dequeued::Task(task));
            }

            // notify_one stores a permit when nobody is waiting, so a push
            // between pop() and here still wakes us.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Dequeued::Cancelled),
                _ = self.available.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => return Ok(Dequeued::TimedOut),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = InMemoryTaskQueue::new();
        let cancel = CancellationToken::new();
        queue.enqueue(TaskRecord::new("first")).await.unwrap();
        queue.enqueue(TaskRecord::new("second")).await.unwrap();
        assert_eq!(queue.len(), 2);

        let wait = Duration::from_millis(10);
        assert_eq!(
            queue.dequeue(wait, &cancel).await.unwrap(),
            Dequeued::Task(TaskRecord::new("first"))
        );
        assert_eq!(
            queue.dequeue(wait, &cancel).await.unwrap(),
            Dequeued::Task(TaskRecord::new("second"))
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_empty_queue_times_out_within_bound() {
        let queue = InMemoryTaskQueue::new();
        let cancel = CancellationToken::new();

        let started = std::time::Instant::now();
        let result = queue.dequeue(Duration::from_millis(10), &cancel).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(result, Dequeued::TimedOut);
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_waiting_consumer_is_woken() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let cancel = CancellationToken::new();

        let consumer = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(TaskRecord::new("late")).await.unwrap();

        let result = consumer.await.unwrap().unwrap();
        assert_eq!(result, Dequeued::Task(TaskRecord::new("late")));
    }

    #[tokio::test]
    async fn test_cancelled_consumer_leaves_task_in_queue() {
        let queue = InMemoryTaskQueue::new();
        let cancel = CancellationToken::new();
        queue.enqueue(TaskRecord::new("keep")).await.unwrap();

        cancel.cancel();
        let result = queue.dequeue(Duration::from_secs(5), &cancel).await.unwrap();

        assert_eq!(result, Dequeued::Cancelled);
        assert_eq!(queue.len(), 1);
    }
}
