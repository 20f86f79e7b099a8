//! Data model for the record-processing core: tasks, record units, and
//! per-record delivery bookkeeping.

pub mod diagnostics;
pub mod record;
pub mod task;

pub use diagnostics::TaskDiagnosticInfo;
pub use record::{ProcessedRecord, RecordState, RecordUnit};
pub use task::{
    TaskByState, TaskDefinition, TaskInfo, TaskState, ACTIVE_STATES, RESUMABLE_STATES,
    UNKNOWN_EXPECTED_SIZE,
};
