//! PostgreSQL store backends.
//!
//! Runtime-checked sqlx queries over four tables: `tasks_basic_info`,
//! `tasks_by_state`, `task_diagnostic_info` and `processed_records`.
//! Deliberately transaction-free: every write is a single-row statement,
//! matching the consistency contract documented in [`crate::storage`].
//! The state-index mirror is two separate statements with no surrounding
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::{CoreError, Result};
use crate::models::{
    ProcessedRecord, RecordState, TaskByState, TaskDiagnosticInfo, TaskInfo, TaskState,
};

use super::{CounterDelta, ProcessedRecordStore, TaskDiagnosticStore, TaskStore};

const CREATE_TASKS_BASIC_INFO: &str = r#"
CREATE TABLE IF NOT EXISTS tasks_basic_info (
    task_id BIGINT PRIMARY KEY,
    topology_name TEXT NOT NULL,
    state TEXT NOT NULL,
    state_description TEXT NOT NULL DEFAULT '',
    owner_id TEXT NOT NULL DEFAULT '',
    expected_records_number BIGINT NOT NULL DEFAULT -1,
    processed_records_count BIGINT NOT NULL DEFAULT 0,
    ignored_records_count BIGINT NOT NULL DEFAULT 0,
    deleted_records_count BIGINT NOT NULL DEFAULT 0,
    processed_errors_count BIGINT NOT NULL DEFAULT 0,
    deleted_errors_count BIGINT NOT NULL DEFAULT 0,
    retry_count BIGINT NOT NULL DEFAULT 0,
    sent_timestamp TIMESTAMPTZ,
    start_timestamp TIMESTAMPTZ,
    finish_timestamp TIMESTAMPTZ,
    definition TEXT NOT NULL DEFAULT ''
)
"#;

const CREATE_TASKS_BY_STATE: &str = r#"
CREATE TABLE IF NOT EXISTS tasks_by_state (
    state TEXT NOT NULL,
    topology_name TEXT NOT NULL,
    task_id BIGINT NOT NULL,
    owner_id TEXT NOT NULL DEFAULT '',
    queue_name TEXT NOT NULL DEFAULT '',
    start_time TIMESTAMPTZ,
    PRIMARY KEY (state, topology_name, task_id)
)
"#;

const CREATE_TASK_DIAGNOSTIC_INFO: &str = r#"
CREATE TABLE IF NOT EXISTS task_diagnostic_info (
    task_id BIGINT PRIMARY KEY,
    started_records_count BIGINT NOT NULL DEFAULT 0,
    records_retry_count BIGINT NOT NULL DEFAULT 0,
    queued_at TIMESTAMPTZ,
    dispatch_started_at TIMESTAMPTZ,
    last_record_finished_at TIMESTAMPTZ,
    finished_at TIMESTAMPTZ,
    post_processing_started_at TIMESTAMPTZ
)
"#;

const CREATE_PROCESSED_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS processed_records (
    task_id BIGINT NOT NULL,
    record_id TEXT NOT NULL,
    attempt_number BIGINT NOT NULL DEFAULT 1,
    state TEXT NOT NULL,
    start_time TIMESTAMPTZ,
    topology_name TEXT NOT NULL DEFAULT '',
    info_text TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (task_id, record_id)
)
"#;

#[derive(sqlx::FromRow)]
struct TaskInfoRow {
    task_id: i64,
    topology_name: String,
    state: String,
    state_description: String,
    owner_id: String,
    expected_records_number: i64,
    processed_records_count: i64,
    ignored_records_count: i64,
    deleted_records_count: i64,
    processed_errors_count: i64,
    deleted_errors_count: i64,
    retry_count: i64,
    sent_timestamp: Option<DateTime<Utc>>,
    start_timestamp: Option<DateTime<Utc>>,
    finish_timestamp: Option<DateTime<Utc>>,
    definition: String,
}

impl TaskInfoRow {
    fn into_model(self) -> Result<TaskInfo> {
        let state = parse_task_state(&self.state)?;
        Ok(TaskInfo {
            task_id: self.task_id,
            topology_name: self.topology_name,
            state,
            state_description: self.state_description,
            owner_id: self.owner_id,
            expected_records_number: self.expected_records_number,
            processed_records_count: self.processed_records_count,
            ignored_records_count: self.ignored_records_count,
            deleted_records_count: self.deleted_records_count,
            processed_errors_count: self.processed_errors_count,
            deleted_errors_count: self.deleted_errors_count,
            retry_count: self.retry_count,
            sent_timestamp: self.sent_timestamp,
            start_timestamp: self.start_timestamp,
            finish_timestamp: self.finish_timestamp,
            definition: self.definition,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskByStateRow {
    state: String,
    topology_name: String,
    task_id: i64,
    owner_id: String,
    queue_name: String,
    start_time: Option<DateTime<Utc>>,
}

impl TaskByStateRow {
    fn into_model(self) -> Result<TaskByState> {
        let state = parse_task_state(&self.state)?;
        Ok(TaskByState {
            state,
            topology_name: self.topology_name,
            task_id: self.task_id,
            owner_id: self.owner_id,
            queue_name: self.queue_name,
            start_time: self.start_time,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProcessedRecordRow {
    task_id: i64,
    record_id: String,
    attempt_number: i64,
    state: String,
    start_time: Option<DateTime<Utc>>,
    topology_name: String,
    info_text: String,
}

impl ProcessedRecordRow {
    fn into_model(self) -> Result<ProcessedRecord> {
        let state = self
            .state
            .parse::<RecordState>()
            .map_err(|e| CoreError::storage("decode", e))?;
        Ok(ProcessedRecord {
            task_id: self.task_id,
            record_id: self.record_id,
            attempt_number: self.attempt_number,
            state,
            start_time: self.start_time,
            topology_name: self.topology_name,
            info_text: self.info_text,
        })
    }
}

fn parse_task_state(raw: &str) -> Result<TaskState> {
    raw.parse::<TaskState>()
        .map_err(|e| CoreError::storage("decode", e))
}

fn state_strings(states: &[TaskState]) -> Vec<String> {
    states.iter().map(|state| state.to_string()).collect()
}

/// PostgreSQL implementation of [`TaskStore`] and [`TaskDiagnosticStore`].
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the task tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TASKS_BASIC_INFO).execute(&self.pool).await?;
        sqlx::query(CREATE_TASKS_BY_STATE).execute(&self.pool).await?;
        sqlx::query(CREATE_TASK_DIAGNOSTIC_INFO)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn index_row(
        &self,
        state: TaskState,
        topology_name: &str,
        task_id: i64,
    ) -> Result<Option<TaskByState>> {
        let row = sqlx::query_as::<_, TaskByStateRow>(
            "SELECT state, topology_name, task_id, owner_id, queue_name, start_time \
             FROM tasks_by_state WHERE state = $1 AND topology_name = $2 AND task_id = $3",
        )
        .bind(state.to_string())
        .bind(topology_name)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TaskByStateRow::into_model).transpose()
    }

    async fn insert_index_row(&self, row: &TaskByState) -> Result<()> {
        sqlx::query(
            "INSERT INTO tasks_by_state (state, topology_name, task_id, owner_id, queue_name, start_time) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (state, topology_name, task_id) DO UPDATE \
             SET owner_id = $4, queue_name = $5, start_time = $6",
        )
        .bind(row.state.to_string())
        .bind(&row.topology_name)
        .bind(row.task_id)
        .bind(&row.owner_id)
        .bind(&row.queue_name)
        .bind(row.start_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_index_row(
        &self,
        state: TaskState,
        topology_name: &str,
        task_id: i64,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM tasks_by_state WHERE state = $1 AND topology_name = $2 AND task_id = $3",
        )
        .bind(state.to_string())
        .bind(topology_name)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move the index row from the task's old state bucket to `new_state`.
    /// Two separate statements; the inconsistency window in between is
    /// part of the store contract.
    async fn mirror_state_index(&self, task: &TaskInfo, new_state: TaskState) -> Result<()> {
        let old = self
            .index_row(task.state, &task.topology_name, task.task_id)
            .await?;
        let row = TaskByState {
            state: new_state,
            topology_name: task.topology_name.clone(),
            task_id: task.task_id,
            owner_id: old
                .as_ref()
                .map(|row| row.owner_id.clone())
                .unwrap_or_else(|| task.owner_id.clone()),
            queue_name: old
                .as_ref()
                .map(|row| row.queue_name.clone())
                .unwrap_or_default(),
            start_time: old.as_ref().and_then(|row| row.start_time),
        };
        self.insert_index_row(&row).await?;
        if task.state != new_state {
            self.delete_index_row(task.state, &task.topology_name, task.task_id)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn insert(&self, info: TaskInfo, queue_name: &str) -> Result<()> {
        let old_state = self
            .find_by_id(info.task_id)
            .await?
            .map(|existing| existing.state);

        sqlx::query(
            "INSERT INTO tasks_basic_info (task_id, topology_name, state, state_description, \
                 owner_id, expected_records_number, processed_records_count, ignored_records_count, \
                 deleted_records_count, processed_errors_count, deleted_errors_count, retry_count, \
                 sent_timestamp, start_timestamp, finish_timestamp, definition) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (task_id) DO UPDATE SET \
                 topology_name = $2, state = $3, state_description = $4, owner_id = $5, \
                 expected_records_number = $6, sent_timestamp = $13, start_timestamp = $14, \
                 definition = $16",
        )
        .bind(info.task_id)
        .bind(&info.topology_name)
        .bind(info.state.to_string())
        .bind(&info.state_description)
        .bind(&info.owner_id)
        .bind(info.expected_records_number)
        .bind(info.processed_records_count)
        .bind(info.ignored_records_count)
        .bind(info.deleted_records_count)
        .bind(info.processed_errors_count)
        .bind(info.deleted_errors_count)
        .bind(info.retry_count)
        .bind(info.sent_timestamp)
        .bind(info.start_timestamp)
        .bind(info.finish_timestamp)
        .bind(&info.definition)
        .execute(&self.pool)
        .await?;

        let row = TaskByState {
            state: info.state,
            topology_name: info.topology_name.clone(),
            task_id: info.task_id,
            owner_id: info.owner_id.clone(),
            queue_name: queue_name.to_string(),
            start_time: info.sent_timestamp,
        };
        self.insert_index_row(&row).await?;
        if let Some(old_state) = old_state {
            if old_state != info.state {
                self.delete_index_row(old_state, &info.topology_name, info.task_id)
                    .await?;
            }
        }
        Ok(())
    }

    async fn find_by_id(&self, task_id: i64) -> Result<Option<TaskInfo>> {
        let row = sqlx::query_as::<_, TaskInfoRow>(
            "SELECT task_id, topology_name, state, state_description, owner_id, \
                 expected_records_number, processed_records_count, ignored_records_count, \
                 deleted_records_count, processed_errors_count, deleted_errors_count, retry_count, \
                 sent_timestamp, start_timestamp, finish_timestamp, definition \
             FROM tasks_basic_info WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TaskInfoRow::into_model).transpose()
    }

    async fn update_state(
        &self,
        task_id: i64,
        state: TaskState,
        description: &str,
    ) -> Result<()> {
        let Some(task) = self.find_by_id(task_id).await? else {
            return Ok(());
        };
        let finish: Option<DateTime<Utc>> = matches!(state, TaskState::Dropped).then(Utc::now);
        sqlx::query(
            "UPDATE tasks_basic_info SET state = $2, state_description = $3, \
             finish_timestamp = COALESCE($4, finish_timestamp) WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(state.to_string())
        .bind(description)
        .bind(finish)
        .execute(&self.pool)
        .await?;
        self.mirror_state_index(&task, state).await
    }

    async fn update_state_with_expected_size(
        &self,
        task_id: i64,
        state: TaskState,
        expected_records_number: i64,
    ) -> Result<()> {
        let Some(task) = self.find_by_id(task_id).await? else {
            return Ok(());
        };
        sqlx::query(
            "UPDATE tasks_basic_info SET state = $2, expected_records_number = $3 \
             WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(state.to_string())
        .bind(expected_records_number)
        .execute(&self.pool)
        .await?;
        self.mirror_state_index(&task, state).await
    }

    async fn set_processed(&self, task_id: i64, description: &str) -> Result<()> {
        let Some(task) = self.find_by_id(task_id).await? else {
            return Ok(());
        };
        sqlx::query(
            "UPDATE tasks_basic_info SET state = $2, state_description = $3, \
             finish_timestamp = $4 WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(TaskState::Processed.to_string())
        .bind(description)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        self.mirror_state_index(&task, TaskState::Processed).await
    }

    async fn increment_counters(&self, task_id: i64, delta: CounterDelta) -> Result<()> {
        sqlx::query(
            "UPDATE tasks_basic_info SET \
                 processed_records_count = processed_records_count + $2, \
                 ignored_records_count = ignored_records_count + $3, \
                 deleted_records_count = deleted_records_count + $4, \
                 processed_errors_count = processed_errors_count + $5, \
                 deleted_errors_count = deleted_errors_count + $6 \
             WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(delta.processed_records)
        .bind(delta.ignored_records)
        .bind(delta.deleted_records)
        .bind(delta.processed_errors)
        .bind(delta.deleted_errors)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_retry_count(&self, task_id: i64, retry_count: i64) -> Result<()> {
        sqlx::query("UPDATE tasks_basic_info SET retry_count = $2 WHERE task_id = $1")
            .bind(task_id)
            .bind(retry_count)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_states(&self, states: &[TaskState]) -> Result<Vec<TaskByState>> {
        let rows = sqlx::query_as::<_, TaskByStateRow>(
            "SELECT state, topology_name, task_id, owner_id, queue_name, start_time \
             FROM tasks_by_state WHERE state = ANY($1)",
        )
        .bind(state_strings(states))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskByStateRow::into_model).collect()
    }

    async fn find_by_states_and_topology(
        &self,
        states: &[TaskState],
        topology_name: &str,
    ) -> Result<Vec<TaskByState>> {
        let rows = sqlx::query_as::<_, TaskByStateRow>(
            "SELECT state, topology_name, task_id, owner_id, queue_name, start_time \
             FROM tasks_by_state WHERE state = ANY($1) AND topology_name = $2",
        )
        .bind(state_strings(states))
        .bind(topology_name)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskByStateRow::into_model).collect()
    }
}

#[async_trait]
impl TaskDiagnosticStore for PostgresTaskStore {
    async fn find_diagnostic(&self, task_id: i64) -> Result<Option<TaskDiagnosticInfo>> {
        #[derive(sqlx::FromRow)]
        struct DiagnosticRow {
            task_id: i64,
            started_records_count: i64,
            records_retry_count: i64,
            queued_at: Option<DateTime<Utc>>,
            dispatch_started_at: Option<DateTime<Utc>>,
            last_record_finished_at: Option<DateTime<Utc>>,
            finished_at: Option<DateTime<Utc>>,
            post_processing_started_at: Option<DateTime<Utc>>,
        }

        let row = sqlx::query_as::<_, DiagnosticRow>(
            "SELECT task_id, started_records_count, records_retry_count, queued_at, \
                 dispatch_started_at, last_record_finished_at, finished_at, \
                 post_processing_started_at \
             FROM task_diagnostic_info WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| TaskDiagnosticInfo {
            task_id: row.task_id,
            started_records_count: row.started_records_count,
            records_retry_count: row.records_retry_count,
            queued_at: row.queued_at,
            dispatch_started_at: row.dispatch_started_at,
            last_record_finished_at: row.last_record_finished_at,
            finished_at: row.finished_at,
            post_processing_started_at: row.post_processing_started_at,
        }))
    }

    async fn update_started_records_count(&self, task_id: i64, count: i64) -> Result<()> {
        self.upsert_diagnostic_counter(task_id, "started_records_count", count)
            .await
    }

    async fn update_records_retry_count(&self, task_id: i64, count: i64) -> Result<()> {
        self.upsert_diagnostic_counter(task_id, "records_retry_count", count)
            .await
    }

    async fn update_queued_at(&self, task_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.upsert_diagnostic_timestamp(task_id, "queued_at", at).await
    }

    async fn update_dispatch_started_at(&self, task_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.upsert_diagnostic_timestamp(task_id, "dispatch_started_at", at)
            .await
    }

    async fn update_last_record_finished_at(
        &self,
        task_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.upsert_diagnostic_timestamp(task_id, "last_record_finished_at", at)
            .await
    }

    async fn update_finished_at(&self, task_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.upsert_diagnostic_timestamp(task_id, "finished_at", at).await
    }

    async fn update_post_processing_started_at(
        &self,
        task_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.upsert_diagnostic_timestamp(task_id, "post_processing_started_at", at)
            .await
    }
}

impl PostgresTaskStore {
    // Column names come from the fixed call sites above, never from input.
    async fn upsert_diagnostic_counter(
        &self,
        task_id: i64,
        column: &str,
        value: i64,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO task_diagnostic_info (task_id, {column}) VALUES ($1, $2) \
             ON CONFLICT (task_id) DO UPDATE SET {column} = $2"
        );
        sqlx::query(&sql).bind(task_id).bind(value).execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_diagnostic_timestamp(
        &self,
        task_id: i64,
        column: &str,
        value: DateTime<Utc>,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO task_diagnostic_info (task_id, {column}) VALUES ($1, $2) \
             ON CONFLICT (task_id) DO UPDATE SET {column} = $2"
        );
        sqlx::query(&sql).bind(task_id).bind(value).execute(&self.pool).await?;
        Ok(())
    }
}

/// PostgreSQL implementation of [`ProcessedRecordStore`].
#[derive(Debug, Clone)]
pub struct PostgresProcessedRecordStore {
    pool: PgPool,
}

impl PostgresProcessedRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_PROCESSED_RECORDS).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ProcessedRecordStore for PostgresProcessedRecordStore {
    async fn find_record(
        &self,
        task_id: i64,
        record_id: &str,
    ) -> Result<Option<ProcessedRecord>> {
        let row = sqlx::query_as::<_, ProcessedRecordRow>(
            "SELECT task_id, record_id, attempt_number, state, start_time, topology_name, \
                 info_text \
             FROM processed_records WHERE task_id = $1 AND record_id = $2",
        )
        .bind(task_id)
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ProcessedRecordRow::into_model).transpose()
    }

    async fn insert_record(&self, record: &ProcessedRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO processed_records (task_id, record_id, attempt_number, state, \
                 start_time, topology_name, info_text) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (task_id, record_id) DO UPDATE SET \
                 attempt_number = $3, state = $4, start_time = $5, info_text = $7",
        )
        .bind(record.task_id)
        .bind(&record.record_id)
        .bind(record.attempt_number)
        .bind(record.state.to_string())
        .bind(record.start_time)
        .bind(&record.topology_name)
        .bind(&record.info_text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_attempt_number(
        &self,
        task_id: i64,
        record_id: &str,
        attempt_number: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE processed_records SET attempt_number = $3 \
             WHERE task_id = $1 AND record_id = $2",
        )
        .bind(task_id)
        .bind(record_id)
        .bind(attempt_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_record_state(
        &self,
        task_id: i64,
        record_id: &str,
        state: RecordState,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE processed_records SET state = $3 WHERE task_id = $1 AND record_id = $2",
        )
        .bind(task_id)
        .bind(record_id)
        .bind(state.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_start_time(
        &self,
        task_id: i64,
        record_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE processed_records SET start_time = $3 \
             WHERE task_id = $1 AND record_id = $2",
        )
        .bind(task_id)
        .bind(record_id)
        .bind(start_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
