//! # Task Model
//!
//! Task metadata and lifecycle states for bulk record-processing tasks.
//!
//! A task is one submitted unit of bulk work spanning many records. Its
//! metadata lives in the `tasks_basic_info` table and is mirrored into the
//! `tasks_by_state` index on every state transition (two separate writes,
//! see [`crate::storage::TaskStore`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Sentinel for tasks whose record count cannot be known upfront.
///
/// Tasks carrying this value bypass automatic completion detection; the
/// ghost detector remains their only watchdog.
pub const UNKNOWN_EXPECTED_SIZE: i64 = -1;

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Accepted but not yet picked up by the submitter
    Pending,
    /// The submitter is enumerating and streaming record units
    ProcessingBySubmitter,
    /// All record units are on the queue, consumption in progress
    Queued,
    /// Handed to an external topology that tracks its own progress
    Sent,
    /// An external topology reported active processing
    CurrentlyProcessing,
    /// Terminal: task failed or was cancelled; the reason is in the task's
    /// state description
    Dropped,
    /// Terminal: every record unit reached a terminal record state
    Processed,
    /// Fully drained, waiting for an external post-processor
    ReadyForPostProcessing,
    /// An external post-processor is running; leads back to `Processed`
    /// or `Dropped` outside this core
    InPostProcessing,
    /// Legacy state kept so resumption can still pick such tasks up
    Depublishing,
}

/// States the resumption coordinator re-submits after a crash.
pub const RESUMABLE_STATES: [TaskState; 2] =
    [TaskState::ProcessingBySubmitter, TaskState::Depublishing];

/// States that mark a task as actively occupying its destination queue.
pub const ACTIVE_STATES: [TaskState; 4] = [
    TaskState::ProcessingBySubmitter,
    TaskState::Queued,
    TaskState::Sent,
    TaskState::CurrentlyProcessing,
];

impl TaskState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dropped | Self::Processed)
    }

    /// Check if a crashed submission in this state can be restarted
    pub fn is_resumable(&self) -> bool {
        RESUMABLE_STATES.contains(self)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::ProcessingBySubmitter => write!(f, "PROCESSING_BY_SUBMITTER"),
            Self::Queued => write!(f, "QUEUED"),
            Self::Sent => write!(f, "SENT"),
            Self::CurrentlyProcessing => write!(f, "CURRENTLY_PROCESSING"),
            Self::Dropped => write!(f, "DROPPED"),
            Self::Processed => write!(f, "PROCESSED"),
            Self::ReadyForPostProcessing => write!(f, "READY_FOR_POST_PROCESSING"),
            Self::InPostProcessing => write!(f, "IN_POST_PROCESSING"),
            Self::Depublishing => write!(f, "DEPUBLISHING"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING_BY_SUBMITTER" => Ok(Self::ProcessingBySubmitter),
            "QUEUED" => Ok(Self::Queued),
            "SENT" => Ok(Self::Sent),
            "CURRENTLY_PROCESSING" => Ok(Self::CurrentlyProcessing),
            "DROPPED" => Ok(Self::Dropped),
            "PROCESSED" => Ok(Self::Processed),
            "READY_FOR_POST_PROCESSING" => Ok(Self::ReadyForPostProcessing),
            "IN_POST_PROCESSING" => Ok(Self::InPostProcessing),
            "DEPUBLISHING" => Ok(Self::Depublishing),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

/// Task metadata row (`tasks_basic_info`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: i64,
    pub topology_name: String,
    pub state: TaskState,
    /// Human-readable reason for the current state, surfaced in the
    /// user-facing task report
    pub state_description: String,
    /// Identifier of the process instance driving submission/finishing
    pub owner_id: String,
    pub expected_records_number: i64,
    pub processed_records_count: i64,
    pub ignored_records_count: i64,
    pub deleted_records_count: i64,
    pub processed_errors_count: i64,
    pub deleted_errors_count: i64,
    /// Total re-deliveries observed across all records of the task
    pub retry_count: i64,
    pub sent_timestamp: Option<DateTime<Utc>>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub finish_timestamp: Option<DateTime<Utc>>,
    /// Serialized original task request, needed to resume submission
    pub definition: String,
}

impl TaskInfo {
    /// Sum of records that reached a terminal record state.
    pub fn finished_records_count(&self) -> i64 {
        self.processed_records_count + self.processed_errors_count
    }

    /// Whether every expected record has reached a terminal record state.
    ///
    /// Always false while the expected size is unknown: such tasks cannot
    /// self-complete.
    pub fn is_drained(&self) -> bool {
        self.expected_records_number != UNKNOWN_EXPECTED_SIZE
            && self.finished_records_count() >= self.expected_records_number
    }
}

/// One row of the `tasks_by_state` index, keyed by `(state, topology)`.
///
/// Mirrored from `tasks_basic_info` on every transition with two separate
/// writes, so a task can briefly appear in zero or two buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskByState {
    pub state: TaskState,
    pub topology_name: String,
    pub task_id: i64,
    pub owner_id: String,
    pub queue_name: String,
    pub start_time: Option<DateTime<Utc>>,
}

/// The original task request, serialized into [`TaskInfo::definition`].
///
/// `input` carries whatever payload the topology's enumerator understands;
/// this core only round-trips it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub task_id: i64,
    pub task_name: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub input: serde_json::Value,
}

impl TaskDefinition {
    pub fn new(task_id: i64, task_name: impl Into<String>) -> Self {
        Self {
            task_id,
            task_name: task_name.into(),
            parameters: HashMap::new(),
            input: serde_json::Value::Null,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    /// Serialize for storage in the task row.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored definition. Failures are treated as permanent
    /// corruption by every caller.
    pub fn from_json(task_id: i64, raw: &str) -> crate::error::Result<Self> {
        serde_json::from_str(raw).map_err(|e| crate::error::CoreError::CorruptDefinition {
            task_id,
            message: e.to_string(),
        })
    }
}
