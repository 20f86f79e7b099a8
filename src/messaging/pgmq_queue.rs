//! PostgreSQL message queue backend, built on the pgmq-rs client.
//!
//! pgmq gives exactly the delivery contract the gateway needs: a read
//! hides the message for the visibility timeout, a delete acknowledges it,
//! and an unacknowledged message reappears on its own.

use async_trait::async_trait;
use pgmq::PGMQueue;
use std::time::Duration;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::models::RecordUnit;

use super::{DeliveredRecord, RecordQueue};

/// pgmq-backed implementation of [`RecordQueue`].
pub struct PgmqRecordQueue {
    queue: PGMQueue,
}

impl PgmqRecordQueue {
    /// Connect with a dedicated pool from a connection string.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let queue = PGMQueue::new(database_url.to_string())
            .await
            .map_err(|e| CoreError::queue("", "connect", e.to_string()))?;
        Ok(Self { queue })
    }
}

#[async_trait]
impl RecordQueue for PgmqRecordQueue {
    async fn ensure_queue(&self, queue_name: &str) -> Result<()> {
        self.queue
            .create(queue_name)
            .await
            .map_err(|e| CoreError::queue(queue_name, "create", e.to_string()))?;
        Ok(())
    }

    async fn enqueue(&self, queue_name: &str, unit: &RecordUnit) -> Result<i64> {
        let message_id = self
            .queue
            .send(queue_name, unit)
            .await
            .map_err(|e| CoreError::queue(queue_name, "send", e.to_string()))?;
        Ok(message_id)
    }

    async fn read(
        &self,
        queue_name: &str,
        visibility: Duration,
    ) -> Result<Option<DeliveredRecord>> {
        let visibility_secs = visibility.as_secs().max(1) as i32;
        let message = self
            .queue
            .read::<RecordUnit>(queue_name, Some(visibility_secs))
            .await
            .map_err(|e| CoreError::queue(queue_name, "read", e.to_string()))?;
        Ok(message.map(|message| DeliveredRecord {
            receipt: message.msg_id,
            read_count: i64::from(message.read_ct),
            unit: message.message,
        }))
    }

    async fn ack(&self, queue_name: &str, receipt: i64) -> Result<()> {
        self.queue
            .delete(queue_name, receipt)
            .await
            .map_err(|e| CoreError::queue(queue_name, "delete", e.to_string()))?;
        Ok(())
    }

    async fn nack(&self, queue_name: &str, receipt: i64) -> Result<()> {
        // pgmq has no explicit release; the message reappears when its
        // visibility timeout lapses.
        debug!(
            queue_name = queue_name,
            receipt = receipt,
            "Leaving message unacknowledged, visibility timeout will redeliver it"
        );
        Ok(())
    }
}
