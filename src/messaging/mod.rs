//! # Messaging Layer
//!
//! The queue seam between the submitter (producer) and the dispatch
//! gateway (consumer). Delivery is at-least-once: a message that is read
//! but never acknowledged becomes visible again after its visibility
//! timeout, so duplicate and replayed delivery is routine, not
//! exceptional. One queue ("topic") per topology, several per topology
//! when configured.

pub mod memory;
pub mod pgmq_queue;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::models::RecordUnit;

pub use memory::InMemoryRecordQueue;
pub use pgmq_queue::PgmqRecordQueue;

/// A record unit read from a queue, together with its delivery receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredRecord {
    /// Receipt used to acknowledge or release this delivery
    pub receipt: i64,
    /// How many times the queue has handed this message out, including
    /// this delivery. Diagnostic only; attempt accounting lives in the
    /// processed-record store.
    pub read_count: i64,
    pub unit: RecordUnit,
}

/// Minimal queue operations the core depends on.
#[async_trait]
pub trait RecordQueue: Send + Sync {
    /// Create the queue if it does not exist yet.
    async fn ensure_queue(&self, queue_name: &str) -> Result<()>;

    /// Append one record unit; returns the message id.
    async fn enqueue(&self, queue_name: &str, unit: &RecordUnit) -> Result<i64>;

    /// Read the next visible message, hiding it for `visibility`.
    /// `None` means the queue is currently drained.
    async fn read(
        &self,
        queue_name: &str,
        visibility: Duration,
    ) -> Result<Option<DeliveredRecord>>;

    /// Acknowledge a delivery; the message will never be delivered again.
    async fn ack(&self, queue_name: &str, receipt: i64) -> Result<()>;

    /// Release a delivery for redelivery. Backends without an explicit
    /// release fall back to visibility-timeout expiry, which satisfies the
    /// at-least-once contract with extra latency.
    async fn nack(&self, queue_name: &str, receipt: i64) -> Result<()>;
}
