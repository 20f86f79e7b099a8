//! # Reporting Stream
//!
//! Side channel for terminal, over-retry and ghost notifications. An
//! external notification aggregator subscribes and folds these into the
//! user-facing task report; nothing in this core consumes them.
//!
//! Built on a broadcast channel: publishing with no subscriber attached is
//! not an error, the notification is simply not observed. Durability is
//! the aggregator's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::RecordState;

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A record unit reached a terminal outcome without business delivery
    RecordOutcome,
    /// A task stopped making observable progress
    GhostTask,
}

/// One message on the reporting stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordNotification {
    pub kind: NotificationKind,
    pub task_id: i64,
    pub record_id: Option<String>,
    pub state: Option<RecordState>,
    pub info_text: String,
    pub marked_as_deleted: bool,
    pub timestamp: DateTime<Utc>,
}

impl RecordNotification {
    /// Terminal error emitted by the gateway when a record exceeded its
    /// retry budget.
    pub fn max_retries_reached(
        task_id: i64,
        record_id: impl Into<String>,
        marked_as_deleted: bool,
    ) -> Self {
        Self {
            kind: NotificationKind::RecordOutcome,
            task_id,
            record_id: Some(record_id.into()),
            state: Some(RecordState::Error),
            info_text: "Max retries reached".to_string(),
            marked_as_deleted,
            timestamp: Utc::now(),
        }
    }

    /// Operator-facing ghost-task report.
    pub fn ghost_task(task_id: i64, info_text: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::GhostTask,
            task_id,
            record_id: None,
            state: None,
            info_text: info_text.into(),
            marked_as_deleted: false,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast-based reporting stream.
#[derive(Debug, Clone)]
pub struct ReportStream {
    sender: broadcast::Sender<RecordNotification>,
}

impl ReportStream {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a notification. A missing subscriber is acceptable; slow
    /// subscribers lose the oldest messages (broadcast lag), never block
    /// the publisher.
    pub fn publish(&self, notification: RecordNotification) {
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordNotification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ReportStream {
    fn default() -> Self {
        Self::new(1000)
    }
}
