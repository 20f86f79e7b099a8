//! Write-mostly diagnostic counters, one row per task.
//!
//! Read by the ghost detector and by operators; written column-at-a-time by
//! the gateway and the submitter (see [`crate::storage::TaskDiagnosticStore`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDiagnosticInfo {
    pub task_id: i64,
    /// Records dispatched on their first attempt
    pub started_records_count: i64,
    /// Re-deliveries observed across all records of the task
    pub records_retry_count: i64,
    /// When the submitter finished streaming the task onto the queue
    pub queued_at: Option<DateTime<Utc>>,
    /// When the gateway dispatched the first record unit of the task
    pub dispatch_started_at: Option<DateTime<Utc>>,
    /// Last observed per-record progress; the ghost detector's liveness
    /// signal
    pub last_record_finished_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub post_processing_started_at: Option<DateTime<Utc>>,
}

impl TaskDiagnosticInfo {
    pub fn new(task_id: i64) -> Self {
        Self {
            task_id,
            ..Default::default()
        }
    }

    /// Most recent progress signal, if the task ever made any.
    pub fn last_progress(&self) -> Option<DateTime<Utc>> {
        self.last_record_finished_at.or(self.dispatch_started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_last_progress_prefers_record_finish() {
        let now = Utc::now();
        let mut diag = TaskDiagnosticInfo::new(1);
        assert_eq!(diag.last_progress(), None);

        diag.dispatch_started_at = Some(now - Duration::hours(5));
        assert_eq!(diag.last_progress(), diag.dispatch_started_at);

        diag.last_record_finished_at = Some(now);
        assert_eq!(diag.last_progress(), Some(now));
    }
}
