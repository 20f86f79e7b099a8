//! # Record Models
//!
//! The queue message ([`RecordUnit`]) and the per-record delivery
//! bookkeeping row ([`ProcessedRecord`]) that makes redelivery idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-record pipeline states.
///
/// The chain is `Queued → Dispatched → {StatsGenerated} → {Success|Error}`;
/// this core only ever writes `Queued` and `Dispatched`, the terminal
/// states are reported back by the downstream pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    /// Bookkeeping row created, record unit awaiting dispatch
    Queued,
    /// The dispatch gateway handed the record to business logic
    Dispatched,
    /// Intermediate statistics were generated downstream
    StatsGenerated,
    /// Terminal: record processed successfully
    Success,
    /// Terminal: record failed permanently
    Error,
}

impl RecordState {
    /// Terminal states end the record's life; redelivered units for them
    /// are dropped without downstream emission.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::Dispatched => write!(f, "DISPATCHED"),
            Self::StatsGenerated => write!(f, "STATS_GENERATED"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for RecordState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "DISPATCHED" => Ok(Self::Dispatched),
            "STATS_GENERATED" => Ok(Self::StatsGenerated),
            "SUCCESS" => Ok(Self::Success),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("Invalid record state: {s}")),
        }
    }
}

/// One queue message: a single record to process within a task.
///
/// Immutable once enqueued; redelivery produces a byte-identical copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUnit {
    pub task_id: i64,
    pub record_id: String,
    pub metadata_prefix: Option<String>,
    #[serde(default)]
    pub marked_as_deleted: bool,
}

/// Delivery bookkeeping for one record unit, keyed by `(task_id, record_id)`.
///
/// At most one live row exists per key; `attempt_number` is monotonically
/// non-decreasing for the lifetime of the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub task_id: i64,
    pub record_id: String,
    /// 1 on first delivery, incremented on every re-delivery
    pub attempt_number: i64,
    pub state: RecordState,
    /// Most recent delivery attempt; disambiguates a genuine
    /// restart-replay from a stale duplicate
    pub start_time: Option<DateTime<Utc>>,
    pub topology_name: String,
    pub info_text: String,
}

impl ProcessedRecord {
    /// Row for a record seen for the first time.
    pub fn first_attempt(task_id: i64, record_id: impl Into<String>, topology_name: impl Into<String>) -> Self {
        Self {
            task_id,
            record_id: record_id.into(),
            attempt_number: 1,
            state: RecordState::Queued,
            start_time: Some(Utc::now()),
            topology_name: topology_name.into(),
            info_text: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_record_states() {
        assert!(RecordState::Success.is_terminal());
        assert!(RecordState::Error.is_terminal());
        assert!(!RecordState::Queued.is_terminal());
        assert!(!RecordState::Dispatched.is_terminal());
        assert!(!RecordState::StatsGenerated.is_terminal());
    }

    #[test]
    fn test_record_state_round_trip() {
        for state in [
            RecordState::Queued,
            RecordState::Dispatched,
            RecordState::StatsGenerated,
            RecordState::Success,
            RecordState::Error,
        ] {
            assert_eq!(state.to_string().parse::<RecordState>().unwrap(), state);
        }
    }

    #[test]
    fn test_record_unit_wire_format() {
        let unit = RecordUnit {
            task_id: 9,
            record_id: "http://example.com/record/1".into(),
            metadata_prefix: Some("edm".into()),
            marked_as_deleted: false,
        };
        let json = serde_json::to_string(&unit).unwrap();
        let parsed: RecordUnit = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, unit);

        // marked_as_deleted defaults when absent from older producers
        let parsed: RecordUnit = serde_json::from_str(
            r#"{"task_id":1,"record_id":"r1","metadata_prefix":null}"#,
        )
        .unwrap();
        assert!(!parsed.marked_as_deleted);
    }

    #[test]
    fn test_first_attempt_row() {
        let record = ProcessedRecord::first_attempt(5, "r-1", "xslt_transform");
        assert_eq!(record.attempt_number, 1);
        assert_eq!(record.state, RecordState::Queued);
        assert!(record.start_time.is_some());
    }
}
