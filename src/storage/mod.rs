//! # Storage Layer
//!
//! Trait seams in front of the replicated key-value store holding task
//! metadata, the per-state task index, diagnostic counters, and per-record
//! delivery bookkeeping.
//!
//! ## Consistency contract
//!
//! The backing store is eventually consistent and offers no transactions or
//! distributed locks; every method maps to single-row read-modify-write
//! operations. State transitions mirror the task into the `tasks_by_state`
//! index with two separate writes (insert the new bucket row, delete the
//! old one), so a task can briefly appear in zero or two buckets. Readers
//! of the index must tolerate that window; see `tests/state_index_test.rs`.
//!
//! Concurrent writers may race on the same row. Last-writer-wins is
//! acceptable everywhere because the protocol only relies on monotonic
//! attempt counts and terminal states, never on exact interleavings.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    ProcessedRecord, RecordState, TaskByState, TaskDiagnosticInfo, TaskInfo, TaskState,
};

pub use memory::{InMemoryProcessedRecordStore, InMemoryTaskStore};
pub use postgres::{PostgresProcessedRecordStore, PostgresTaskStore};

/// Terminal-record counter increments reported by the downstream pipeline.
///
/// The core itself never increments these; the external notification
/// aggregator does, and tests use it to simulate downstream completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterDelta {
    pub processed_records: i64,
    pub ignored_records: i64,
    pub deleted_records: i64,
    pub processed_errors: i64,
    pub deleted_errors: i64,
}

impl CounterDelta {
    pub fn processed(count: i64) -> Self {
        Self {
            processed_records: count,
            ..Default::default()
        }
    }

    pub fn errors(count: i64) -> Self {
        Self {
            processed_errors: count,
            ..Default::default()
        }
    }
}

/// Persistent task metadata plus the per-state index.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert (or overwrite) the task row and its index row.
    async fn insert(&self, info: TaskInfo, queue_name: &str) -> Result<()>;

    async fn find_by_id(&self, task_id: i64) -> Result<Option<TaskInfo>>;

    /// Transition the task, mirroring the per-state index with two
    /// non-atomic writes. Unknown tasks are a no-op, matching the store's
    /// upsert-style semantics.
    async fn update_state(
        &self,
        task_id: i64,
        state: TaskState,
        description: &str,
    ) -> Result<()>;

    /// Transition and set the expected record count in one update
    /// (the submitter's end-of-streaming write).
    async fn update_state_with_expected_size(
        &self,
        task_id: i64,
        state: TaskState,
        expected_records_number: i64,
    ) -> Result<()>;

    /// Drop the task with a human-readable reason.
    async fn set_dropped(&self, task_id: i64, reason: &str) -> Result<()> {
        self.update_state(task_id, TaskState::Dropped, reason).await
    }

    /// Mark the task completely processed and stamp its finish timestamp.
    async fn set_processed(&self, task_id: i64, description: &str) -> Result<()>;

    /// Apply terminal-record counter increments (downstream reporting hook).
    async fn increment_counters(&self, task_id: i64, delta: CounterDelta) -> Result<()>;

    /// Mirror of the diagnostic retry counter on the task row, where the
    /// user-facing report reads it.
    async fn update_retry_count(&self, task_id: i64, retry_count: i64) -> Result<()>;

    /// The per-task kill flag. Derived from the task state: a dropped task
    /// is a killed task.
    async fn is_killed(&self, task_id: i64) -> Result<bool> {
        Ok(self
            .find_by_id(task_id)
            .await?
            .map(|task| task.state == TaskState::Dropped)
            .unwrap_or(false))
    }

    /// Scan the per-state index.
    async fn find_by_states(&self, states: &[TaskState]) -> Result<Vec<TaskByState>>;

    /// Scan the per-state index restricted to one topology.
    async fn find_by_states_and_topology(
        &self,
        states: &[TaskState],
        topology_name: &str,
    ) -> Result<Vec<TaskByState>>;
}

/// Write-mostly per-task diagnostic counters.
///
/// Each setter upserts a single column of the row, mirroring the
/// column-at-a-time update surface of the underlying table.
#[async_trait]
pub trait TaskDiagnosticStore: Send + Sync {
    async fn find_diagnostic(&self, task_id: i64) -> Result<Option<TaskDiagnosticInfo>>;

    async fn update_started_records_count(&self, task_id: i64, count: i64) -> Result<()>;
    async fn update_records_retry_count(&self, task_id: i64, count: i64) -> Result<()>;
    async fn update_queued_at(&self, task_id: i64, at: DateTime<Utc>) -> Result<()>;
    async fn update_dispatch_started_at(&self, task_id: i64, at: DateTime<Utc>) -> Result<()>;
    async fn update_last_record_finished_at(&self, task_id: i64, at: DateTime<Utc>)
        -> Result<()>;
    async fn update_finished_at(&self, task_id: i64, at: DateTime<Utc>) -> Result<()>;
    async fn update_post_processing_started_at(
        &self,
        task_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Per-record delivery bookkeeping keyed by `(task_id, record_id)`.
#[async_trait]
pub trait ProcessedRecordStore: Send + Sync {
    async fn find_record(&self, task_id: i64, record_id: &str)
        -> Result<Option<ProcessedRecord>>;

    async fn insert_record(&self, record: &ProcessedRecord) -> Result<()>;

    async fn update_attempt_number(
        &self,
        task_id: i64,
        record_id: &str,
        attempt_number: i64,
    ) -> Result<()>;

    async fn update_record_state(
        &self,
        task_id: i64,
        record_id: &str,
        state: RecordState,
    ) -> Result<()>;

    async fn update_start_time(
        &self,
        task_id: i64,
        record_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<()>;
}
