//! # Recordflow Core
//!
//! Task-execution core of a distributed record-processing platform: a
//! submitted bulk task is fanned out into individually trackable record
//! units delivered over a queue, each unit is processed at most a bounded
//! number of times, task drain is detected automatically, and crashed
//! submissions are resumed without operator intervention. Everything runs
//! on top of an eventually-consistent replicated store with no
//! transactions and no distributed locks.
//!
//! ## Architecture
//!
//! - [`submitter`]: producer side, enumerates a task's records through a
//!   pluggable [`submitter::RecordEnumerator`] and streams record units
//!   onto the selected queue
//! - [`dispatch`]: consumer side, decides deliver/drop/fail for every
//!   (re)delivered message using per-record attempt bookkeeping
//! - [`monitoring`]: drain detection and ghost-task reporting loops
//! - [`resumption`]: startup-time re-submission of orphaned tasks
//! - [`storage`]: trait seams over the store, with in-memory and
//!   PostgreSQL backends
//! - [`messaging`]: the queue seam, with in-memory and pgmq backends
//! - [`reporting`]: side channel feeding the external notification
//!   aggregator
//! - [`system`]: the composition root tying one process instance together
//!
//! ## Delivery semantics
//!
//! The queue is at-least-once; duplicates and replays are routine. The
//! dispatch gateway makes redelivery idempotent through the
//! processed-record store: terminal records are dropped on sight, live
//! records count attempts monotonically, and a record whose attempt count
//! exceeds the retry budget is converted into a terminal error
//! notification instead of another delivery.

pub mod cache;
pub mod capabilities;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod monitoring;
pub mod registry;
pub mod reporting;
pub mod resumption;
pub mod storage;
pub mod submitter;
pub mod system;

pub use cache::TaskInfoCache;
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use models::{
    ProcessedRecord, RecordState, RecordUnit, TaskByState, TaskDefinition, TaskDiagnosticInfo,
    TaskInfo, TaskState, UNKNOWN_EXPECTED_SIZE,
};
pub use system::{CoreDependencies, ProcessingCore};
