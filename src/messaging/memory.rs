//! In-memory queue with real visibility-timeout redelivery semantics.
//!
//! Backs the test suite: unacknowledged reads become visible again after
//! their timeout, `nack` makes them visible immediately, and helpers
//! expose queue depth for assertions.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::models::RecordUnit;

use super::{DeliveredRecord, RecordQueue};

struct StoredMessage {
    id: i64,
    unit: RecordUnit,
    visible_at: Instant,
    read_count: i64,
}

#[derive(Default)]
struct QueueState {
    next_id: i64,
    messages: Vec<StoredMessage>,
}

/// In-memory implementation of [`RecordQueue`].
#[derive(Default)]
pub struct InMemoryRecordQueue {
    queues: Mutex<HashMap<String, QueueState>>,
}

impl InMemoryRecordQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages still on the queue (delivered-but-unacked included).
    pub fn depth(&self, queue_name: &str) -> usize {
        self.queues
            .lock()
            .get(queue_name)
            .map(|queue| queue.messages.len())
            .unwrap_or(0)
    }

    /// Make every in-flight message of the queue visible again, as if all
    /// visibility timeouts expired at once (a crashed consumer).
    pub fn expire_all_visibility(&self, queue_name: &str) {
        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get_mut(queue_name) {
            let now = Instant::now();
            for message in &mut queue.messages {
                message.visible_at = now;
            }
        }
    }
}

#[async_trait]
impl RecordQueue for InMemoryRecordQueue {
    async fn ensure_queue(&self, queue_name: &str) -> Result<()> {
        self.queues
            .lock()
            .entry(queue_name.to_string())
            .or_default();
        Ok(())
    }

    async fn enqueue(&self, queue_name: &str, unit: &RecordUnit) -> Result<i64> {
        let mut queues = self.queues.lock();
        let queue = queues.entry(queue_name.to_string()).or_default();
        queue.next_id += 1;
        let id = queue.next_id;
        queue.messages.push(StoredMessage {
            id,
            unit: unit.clone(),
            visible_at: Instant::now(),
            read_count: 0,
        });
        Ok(id)
    }

    async fn read(
        &self,
        queue_name: &str,
        visibility: Duration,
    ) -> Result<Option<DeliveredRecord>> {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(queue_name) else {
            return Ok(None);
        };
        let now = Instant::now();
        let Some(message) = queue
            .messages
            .iter_mut()
            .find(|message| message.visible_at <= now)
        else {
            return Ok(None);
        };
        message.visible_at = now + visibility;
        message.read_count += 1;
        Ok(Some(DeliveredRecord {
            receipt: message.id,
            read_count: message.read_count,
            unit: message.unit.clone(),
        }))
    }

    async fn ack(&self, queue_name: &str, receipt: i64) -> Result<()> {
        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get_mut(queue_name) {
            queue.messages.retain(|message| message.id != receipt);
        }
        Ok(())
    }

    async fn nack(&self, queue_name: &str, receipt: i64) -> Result<()> {
        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get_mut(queue_name) {
            if let Some(message) = queue
                .messages
                .iter_mut()
                .find(|message| message.id == receipt)
            {
                message.visible_at = Instant::now();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(record_id: &str) -> RecordUnit {
        RecordUnit {
            task_id: 1,
            record_id: record_id.into(),
            metadata_prefix: None,
            marked_as_deleted: false,
        }
    }

    #[tokio::test]
    async fn test_enqueue_read_ack() {
        let queue = InMemoryRecordQueue::new();
        queue.ensure_queue("q").await.unwrap();
        queue.enqueue("q", &unit("r-1")).await.unwrap();

        let delivered = queue
            .read("q", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.unit.record_id, "r-1");
        assert_eq!(delivered.read_count, 1);

        // hidden while in flight
        assert!(queue.read("q", Duration::from_secs(30)).await.unwrap().is_none());

        queue.ack("q", delivered.receipt).await.unwrap();
        assert_eq!(queue.depth("q"), 0);
    }

    #[tokio::test]
    async fn test_nack_makes_message_visible_immediately() {
        let queue = InMemoryRecordQueue::new();
        queue.enqueue("q", &unit("r-1")).await.unwrap();

        let first = queue
            .read("q", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        queue.nack("q", first.receipt).await.unwrap();

        let second = queue
            .read("q", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.receipt, first.receipt);
        assert_eq!(second.read_count, 2);
        assert_eq!(second.unit, first.unit);
    }

    #[tokio::test]
    async fn test_visibility_timeout_expiry_redelivers() {
        let queue = InMemoryRecordQueue::new();
        queue.enqueue("q", &unit("r-1")).await.unwrap();

        let first = queue
            .read("q", Duration::from_millis(5))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = queue
            .read("q", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.receipt, first.receipt);
        assert_eq!(second.read_count, 2);
    }
}
