//! In-memory store backends.
//!
//! Used by the test suite and by embedded runs. The maps mimic the
//! single-row upsert semantics of the replicated store, including the
//! two-write state-index mirror (insert new bucket, then delete old).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::Result;
use crate::models::{
    ProcessedRecord, RecordState, TaskByState, TaskDiagnosticInfo, TaskInfo, TaskState,
};

use super::{CounterDelta, ProcessedRecordStore, TaskDiagnosticStore, TaskStore};

/// In-memory implementation of [`TaskStore`] and [`TaskDiagnosticStore`].
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<i64, TaskInfo>,
    by_state: DashMap<(TaskState, String, i64), TaskByState>,
    diagnostics: DashMap<i64, TaskDiagnosticInfo>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct index-row insertion, for tests that set up inconsistent
    /// index states (the tolerated two-write window).
    pub fn insert_index_row(&self, row: TaskByState) {
        self.by_state.insert(
            (row.state, row.topology_name.clone(), row.task_id),
            row,
        );
    }

    /// Number of index rows currently held for a task, across all states.
    pub fn index_rows_for(&self, task_id: i64) -> usize {
        self.by_state
            .iter()
            .filter(|entry| entry.key().2 == task_id)
            .count()
    }

    fn mirror_state_index(&self, task_id: i64, old_state: Option<TaskState>, new: TaskByState) {
        let topology = new.topology_name.clone();
        let new_state = new.state;
        // First write: the new bucket row.
        self.by_state.insert((new_state, topology.clone(), task_id), new);
        // Second write: remove the old bucket row. Not atomic with the
        // first; readers can observe the task in two buckets in between.
        if let Some(old_state) = old_state {
            if old_state != new_state {
                self.by_state.remove(&(old_state, topology, task_id));
            }
        }
    }

    fn transition(
        &self,
        task_id: i64,
        state: TaskState,
        description: Option<&str>,
        expected_records_number: Option<i64>,
        finish_timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let Some(mut task) = self.tasks.get_mut(&task_id) else {
            return Ok(());
        };
        let old_state = task.state;
        let old_index = self
            .by_state
            .get(&(old_state, task.topology_name.clone(), task_id))
            .map(|row| row.clone());

        task.state = state;
        if let Some(description) = description {
            task.state_description = description.to_string();
        }
        if let Some(expected) = expected_records_number {
            task.expected_records_number = expected;
        }
        if finish_timestamp.is_some() {
            task.finish_timestamp = finish_timestamp;
        }

        let row = TaskByState {
            state,
            topology_name: task.topology_name.clone(),
            task_id,
            owner_id: old_index
                .as_ref()
                .map(|row| row.owner_id.clone())
                .unwrap_or_else(|| task.owner_id.clone()),
            queue_name: old_index
                .as_ref()
                .map(|row| row.queue_name.clone())
                .unwrap_or_default(),
            start_time: old_index.as_ref().and_then(|row| row.start_time),
        };
        drop(task);
        self.mirror_state_index(task_id, Some(old_state), row);
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, info: TaskInfo, queue_name: &str) -> Result<()> {
        let old_state = self.tasks.get(&info.task_id).map(|task| task.state);
        let row = TaskByState {
            state: info.state,
            topology_name: info.topology_name.clone(),
            task_id: info.task_id,
            owner_id: info.owner_id.clone(),
            queue_name: queue_name.to_string(),
            start_time: info.sent_timestamp,
        };
        let task_id = info.task_id;
        self.tasks.insert(task_id, info);
        self.mirror_state_index(task_id, old_state, row);
        Ok(())
    }

    async fn find_by_id(&self, task_id: i64) -> Result<Option<TaskInfo>> {
        Ok(self.tasks.get(&task_id).map(|task| task.clone()))
    }

    async fn update_state(
        &self,
        task_id: i64,
        state: TaskState,
        description: &str,
    ) -> Result<()> {
        let finish = matches!(state, TaskState::Dropped).then(Utc::now);
        self.transition(task_id, state, Some(description), None, finish)
    }

    async fn update_state_with_expected_size(
        &self,
        task_id: i64,
        state: TaskState,
        expected_records_number: i64,
    ) -> Result<()> {
        self.transition(task_id, state, None, Some(expected_records_number), None)
    }

    async fn set_processed(&self, task_id: i64, description: &str) -> Result<()> {
        self.transition(
            task_id,
            TaskState::Processed,
            Some(description),
            None,
            Some(Utc::now()),
        )
    }

    async fn increment_counters(&self, task_id: i64, delta: CounterDelta) -> Result<()> {
        if let Some(mut task) = self.tasks.get_mut(&task_id) {
            task.processed_records_count += delta.processed_records;
            task.ignored_records_count += delta.ignored_records;
            task.deleted_records_count += delta.deleted_records;
            task.processed_errors_count += delta.processed_errors;
            task.deleted_errors_count += delta.deleted_errors;
        }
        Ok(())
    }

    async fn update_retry_count(&self, task_id: i64, retry_count: i64) -> Result<()> {
        if let Some(mut task) = self.tasks.get_mut(&task_id) {
            task.retry_count = retry_count;
        }
        Ok(())
    }

    async fn find_by_states(&self, states: &[TaskState]) -> Result<Vec<TaskByState>> {
        Ok(self
            .by_state
            .iter()
            .filter(|entry| states.contains(&entry.value().state))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn find_by_states_and_topology(
        &self,
        states: &[TaskState],
        topology_name: &str,
    ) -> Result<Vec<TaskByState>> {
        Ok(self
            .by_state
            .iter()
            .filter(|entry| {
                states.contains(&entry.value().state)
                    && entry.value().topology_name == topology_name
            })
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[async_trait]
impl TaskDiagnosticStore for InMemoryTaskStore {
    async fn find_diagnostic(&self, task_id: i64) -> Result<Option<TaskDiagnosticInfo>> {
        Ok(self.diagnostics.get(&task_id).map(|diag| diag.clone()))
    }

    async fn update_started_records_count(&self, task_id: i64, count: i64) -> Result<()> {
        self.diagnostics
            .entry(task_id)
            .or_insert_with(|| TaskDiagnosticInfo::new(task_id))
            .started_records_count = count;
        Ok(())
    }

    async fn update_records_retry_count(&self, task_id: i64, count: i64) -> Result<()> {
        self.diagnostics
            .entry(task_id)
            .or_insert_with(|| TaskDiagnosticInfo::new(task_id))
            .records_retry_count = count;
        Ok(())
    }

    async fn update_queued_at(&self, task_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.diagnostics
            .entry(task_id)
            .or_insert_with(|| TaskDiagnosticInfo::new(task_id))
            .queued_at = Some(at);
        Ok(())
    }

    async fn update_dispatch_started_at(&self, task_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.diagnostics
            .entry(task_id)
            .or_insert_with(|| TaskDiagnosticInfo::new(task_id))
            .dispatch_started_at = Some(at);
        Ok(())
    }

    async fn update_last_record_finished_at(
        &self,
        task_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.diagnostics
            .entry(task_id)
            .or_insert_with(|| TaskDiagnosticInfo::new(task_id))
            .last_record_finished_at = Some(at);
        Ok(())
    }

    async fn update_finished_at(&self, task_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.diagnostics
            .entry(task_id)
            .or_insert_with(|| TaskDiagnosticInfo::new(task_id))
            .finished_at = Some(at);
        Ok(())
    }

    async fn update_post_processing_started_at(
        &self,
        task_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.diagnostics
            .entry(task_id)
            .or_insert_with(|| TaskDiagnosticInfo::new(task_id))
            .post_processing_started_at = Some(at);
        Ok(())
    }
}

/// In-memory implementation of [`ProcessedRecordStore`].
#[derive(Debug, Default)]
pub struct InMemoryProcessedRecordStore {
    records: DashMap<(i64, String), ProcessedRecord>,
}

impl InMemoryProcessedRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl ProcessedRecordStore for InMemoryProcessedRecordStore {
    async fn find_record(
        &self,
        task_id: i64,
        record_id: &str,
    ) -> Result<Option<ProcessedRecord>> {
        Ok(self
            .records
            .get(&(task_id, record_id.to_string()))
            .map(|record| record.clone()))
    }

    async fn insert_record(&self, record: &ProcessedRecord) -> Result<()> {
        self.records.insert(
            (record.task_id, record.record_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn update_attempt_number(
        &self,
        task_id: i64,
        record_id: &str,
        attempt_number: i64,
    ) -> Result<()> {
        if let Some(mut record) = self.records.get_mut(&(task_id, record_id.to_string())) {
            record.attempt_number = attempt_number;
        }
        Ok(())
    }

    async fn update_record_state(
        &self,
        task_id: i64,
        record_id: &str,
        state: RecordState,
    ) -> Result<()> {
        if let Some(mut record) = self.records.get_mut(&(task_id, record_id.to_string())) {
            record.state = state;
        }
        Ok(())
    }

    async fn update_start_time(
        &self,
        task_id: i64,
        record_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(mut record) = self.records.get_mut(&(task_id, record_id.to_string())) {
            record.start_time = Some(start_time);
        }
        Ok(())
    }
}
