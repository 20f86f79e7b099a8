//! # Record Dispatch Gateway
//!
//! Consumer-side decision engine. Every message the queue delivers (or
//! redelivers) passes through [`RecordDispatchGateway::decide`], which
//! produces one of three outcomes:
//!
//! - **Deliver**: hand a [`RecordContext`] to the business-logic sink and
//!   acknowledge the queue message only after the sink acknowledges;
//! - **Drop**: acknowledge without downstream emission (killed task,
//!   already-terminal record, exceeded retry budget, missing metadata);
//! - **Fail**: leave the message unacknowledged so the queue's own
//!   redelivery retries it (transient store trouble).
//!
//! The gateway never coordinates with other consumer instances. Attempt
//! counting through the processed-record store is the only cross-process
//! protocol, and last-writer-wins races on it are tolerated because only
//! monotonic attempt counts and terminal states matter.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::cache::TaskInfoCache;
use crate::config::CoreConfig;
use crate::error::Result;
use crate::messaging::{DeliveredRecord, RecordQueue};
use crate::models::{
    ProcessedRecord, RecordState, RecordUnit, TaskDefinition, TaskDiagnosticInfo, TaskInfo,
};
use crate::reporting::{RecordNotification, ReportStream};
use crate::storage::{ProcessedRecordStore, TaskDiagnosticStore, TaskStore};

use async_trait::async_trait;

/// Task parameter overriding the per-task delivery throttle.
pub const MAX_PARALLEL_DELIVERIES_PARAM: &str = "max_parallel_deliveries";

/// Why a message was acknowledged without downstream emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The owning task carries the kill flag
    TaskKilled,
    /// The record already reached a terminal state; this is the
    /// redelivery-after-crash-before-ack case
    AlreadyProcessed,
    /// The record exceeded its retry budget; a terminal error
    /// notification was emitted instead
    MaxRetriesReached,
    /// The owning task's metadata is gone; nothing meaningful to deliver
    MissingTaskMetadata,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskKilled => write!(f, "task was killed"),
            Self::AlreadyProcessed => write!(f, "record was already processed"),
            Self::MaxRetriesReached => write!(f, "max retries reached"),
            Self::MissingTaskMetadata => write!(f, "task metadata not found"),
        }
    }
}

/// Outcome of the per-message decision.
#[derive(Debug)]
pub enum DispatchDecision {
    /// Emit downstream; acknowledge only after the sink acknowledges
    Deliver(Box<RecordContext>),
    /// Acknowledge and drop without emission
    Drop(DropReason),
    /// Leave unacknowledged; queue redelivery retries
    Fail(String),
}

/// Downstream payload for one accepted record unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordContext {
    pub task_id: i64,
    pub task_name: String,
    pub record_id: String,
    pub metadata_prefix: Option<String>,
    /// The owning task's parameters, immutable after submission
    pub parameters: HashMap<String, String>,
    pub attempt_number: i64,
    pub marked_as_deleted: bool,
    pub sent_timestamp: Option<DateTime<Utc>>,
    pub dispatched_at: DateTime<Utc>,
}

/// Whether the downstream pipeline acknowledged a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Acked,
    Failed,
}

/// The business-logic stream the gateway emits accepted records into.
///
/// Ack and fail propagate symmetrically: `Acked` acknowledges the queue
/// message, everything else leaves it for redelivery.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, context: RecordContext) -> Result<DeliveryStatus>;
}

pub struct RecordDispatchGateway {
    topology_name: String,
    task_store: Arc<dyn TaskStore>,
    diagnostics: Arc<dyn TaskDiagnosticStore>,
    records: Arc<dyn ProcessedRecordStore>,
    cache: Arc<TaskInfoCache>,
    reports: ReportStream,
    config: Arc<CoreConfig>,
    throttles: DashMap<i64, Arc<Semaphore>>,
}

impl RecordDispatchGateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topology_name: impl Into<String>,
        task_store: Arc<dyn TaskStore>,
        diagnostics: Arc<dyn TaskDiagnosticStore>,
        records: Arc<dyn ProcessedRecordStore>,
        cache: Arc<TaskInfoCache>,
        reports: ReportStream,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            topology_name: topology_name.into(),
            task_store,
            diagnostics,
            records,
            cache,
            reports,
            config,
            throttles: DashMap::new(),
        }
    }

    /// Decide what to do with one inbound record unit.
    ///
    /// Persists attempt bookkeeping as a side effect: that write is what
    /// makes the count a business-attempt count rather than an
    /// infrastructure-retry count.
    pub async fn decide(&self, unit: &RecordUnit) -> DispatchDecision {
        match self.task_store.is_killed(unit.task_id).await {
            Ok(true) => return DispatchDecision::Drop(DropReason::TaskKilled),
            Ok(false) => {}
            Err(e) => return DispatchDecision::Fail(e.to_string()),
        }

        let record = match self.prepare_record(unit).await {
            Ok(record) => record,
            Err(e) => return DispatchDecision::Fail(e.to_string()),
        };

        if record.state.is_terminal() {
            // Normal after a consumer restart: the record finished but its
            // queue ack was lost with the crash.
            return DispatchDecision::Drop(DropReason::AlreadyProcessed);
        }

        if record.attempt_number > self.config.max_retries {
            info!(
                task_id = unit.task_id,
                record_id = %unit.record_id,
                attempt_number = record.attempt_number,
                "Emitting terminal error notification, max retries reached"
            );
            self.reports.publish(RecordNotification::max_retries_reached(
                unit.task_id,
                unit.record_id.clone(),
                unit.marked_as_deleted,
            ));
            return DispatchDecision::Drop(DropReason::MaxRetriesReached);
        }

        let task = match self.task_info(unit.task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                error!(task_id = unit.task_id, record_id = %unit.record_id,
                    "Task metadata not found for inbound record");
                return DispatchDecision::Drop(DropReason::MissingTaskMetadata);
            }
            Err(e) => return DispatchDecision::Fail(e.to_string()),
        };

        if let Err(e) = self.update_diagnostics(&task, &record).await {
            return DispatchDecision::Fail(e.to_string());
        }

        // A definition that stopped parsing leaves the message unacked;
        // attempt counting converts an everlasting parse failure into a
        // terminal error notification after the retry budget.
        let definition = match TaskDefinition::from_json(task.task_id, &task.definition) {
            Ok(definition) => definition,
            Err(e) => {
                error!(task_id = task.task_id, error = %e, "Unreadable task definition");
                return DispatchDecision::Fail(e.to_string());
            }
        };

        DispatchDecision::Deliver(Box::new(RecordContext {
            task_id: task.task_id,
            task_name: definition.task_name,
            record_id: unit.record_id.clone(),
            metadata_prefix: unit.metadata_prefix.clone(),
            parameters: definition.parameters,
            attempt_number: record.attempt_number,
            marked_as_deleted: unit.marked_as_deleted,
            sent_timestamp: task.sent_timestamp,
            dispatched_at: Utc::now(),
        }))
    }

    /// Read one message and run it through decision, delivery and
    /// acknowledgement. Returns false when the queue is drained.
    pub async fn process_next(
        &self,
        queue: &Arc<dyn RecordQueue>,
        queue_name: &str,
        sink: &Arc<dyn DeliverySink>,
    ) -> Result<bool> {
        let Some(delivered) = queue.read(queue_name, self.config.visibility_timeout).await? else {
            return Ok(false);
        };
        self.handle_delivery(queue, queue_name, sink, delivered).await?;
        Ok(true)
    }

    /// Consumer loop: decisions run inline, deliveries run concurrently,
    /// bounded per task by its delivery throttle.
    pub async fn run(
        self: Arc<Self>,
        queue: Arc<dyn RecordQueue>,
        queue_name: String,
        sink: Arc<dyn DeliverySink>,
    ) {
        info!(queue_name = %queue_name, topology_name = %self.topology_name,
            "Record dispatch gateway consuming");
        loop {
            let delivered = match queue.read(&queue_name, self.config.visibility_timeout).await {
                Ok(Some(delivered)) => delivered,
                Ok(None) => {
                    tokio::time::sleep(self.config.queue_poll_interval).await;
                    continue;
                }
                Err(e) => {
                    warn!(queue_name = %queue_name, error = %e, "Queue read failed");
                    tokio::time::sleep(self.config.queue_poll_interval).await;
                    continue;
                }
            };

            let gateway = Arc::clone(&self);
            let queue = Arc::clone(&queue);
            let sink = Arc::clone(&sink);
            let queue_name = queue_name.clone();
            tokio::spawn(async move {
                if let Err(e) = gateway
                    .handle_delivery(&queue, &queue_name, &sink, delivered)
                    .await
                {
                    warn!(queue_name = %queue_name, error = %e, "Message handling failed");
                }
            });
        }
    }

    async fn handle_delivery(
        &self,
        queue: &Arc<dyn RecordQueue>,
        queue_name: &str,
        sink: &Arc<dyn DeliverySink>,
        delivered: DeliveredRecord,
    ) -> Result<()> {
        let unit = &delivered.unit;
        match self.decide(unit).await {
            DispatchDecision::Drop(reason) => {
                info!(
                    task_id = unit.task_id,
                    record_id = %unit.record_id,
                    reason = %reason,
                    "Dropping queue message"
                );
                queue.ack(queue_name, delivered.receipt).await
            }
            DispatchDecision::Fail(reason) => {
                warn!(
                    task_id = unit.task_id,
                    record_id = %unit.record_id,
                    reason = %reason,
                    "Releasing queue message for redelivery"
                );
                queue.nack(queue_name, delivered.receipt).await
            }
            DispatchDecision::Deliver(context) => {
                let throttle = self.throttle(context.task_id, &context.parameters);
                // Holding the permit across the sink call is the per-task
                // backpressure. The semaphore is never closed.
                let _permit = throttle.acquire_owned().await.ok();

                let task_id = context.task_id;
                let record_id = context.record_id.clone();
                match sink.deliver(*context).await {
                    Ok(DeliveryStatus::Acked) => {
                        self.records
                            .update_record_state(task_id, &record_id, RecordState::Dispatched)
                            .await?;
                        queue.ack(queue_name, delivered.receipt).await
                    }
                    Ok(DeliveryStatus::Failed) => {
                        warn!(task_id = task_id, record_id = %record_id,
                            "Downstream pipeline failed the record");
                        queue.nack(queue_name, delivered.receipt).await
                    }
                    Err(e) => {
                        warn!(task_id = task_id, record_id = %record_id, error = %e,
                            "Downstream delivery errored");
                        queue.nack(queue_name, delivered.receipt).await
                    }
                }
            }
        }
    }

    /// Create or bump the per-record bookkeeping row.
    async fn prepare_record(&self, unit: &RecordUnit) -> Result<ProcessedRecord> {
        match self.records.find_record(unit.task_id, &unit.record_id).await? {
            Some(mut record) => {
                record.attempt_number += 1;
                let now = Utc::now();
                self.records
                    .update_attempt_number(unit.task_id, &unit.record_id, record.attempt_number)
                    .await?;
                self.records
                    .update_start_time(unit.task_id, &unit.record_id, now)
                    .await?;
                record.start_time = Some(now);
                Ok(record)
            }
            None => {
                let record = ProcessedRecord::first_attempt(
                    unit.task_id,
                    unit.record_id.clone(),
                    self.topology_name.clone(),
                );
                self.records.insert_record(&record).await?;
                Ok(record)
            }
        }
    }

    async fn task_info(&self, task_id: i64) -> Result<Option<TaskInfo>> {
        if let Some(task) = self.cache.get(task_id) {
            return Ok(Some(task));
        }
        let Some(task) = self.task_store.find_by_id(task_id).await? else {
            return Ok(None);
        };
        self.cache.insert(task.clone());
        Ok(Some(task))
    }

    async fn update_diagnostics(&self, task: &TaskInfo, record: &ProcessedRecord) -> Result<()> {
        let diag = self
            .diagnostics
            .find_diagnostic(task.task_id)
            .await?
            .unwrap_or_else(|| TaskDiagnosticInfo::new(task.task_id));

        if diag.dispatch_started_at.is_none() {
            self.diagnostics
                .update_dispatch_started_at(task.task_id, Utc::now())
                .await?;
        }

        if record.attempt_number > 1 {
            info!(
                task_id = task.task_id,
                record_id = %record.record_id,
                attempt_number = record.attempt_number,
                "Record is repeated"
            );
            let retry_count = diag.records_retry_count + 1;
            self.diagnostics
                .update_records_retry_count(task.task_id, retry_count)
                .await?;
            self.task_store
                .update_retry_count(task.task_id, retry_count)
                .await?;
        } else {
            self.diagnostics
                .update_started_records_count(task.task_id, diag.started_records_count + 1)
                .await?;
        }
        Ok(())
    }

    fn throttle(&self, task_id: i64, parameters: &HashMap<String, String>) -> Arc<Semaphore> {
        self.throttles
            .entry(task_id)
            .or_insert_with(|| {
                let limit = parameters
                    .get(MAX_PARALLEL_DELIVERIES_PARAM)
                    .and_then(|raw| raw.parse::<usize>().ok())
                    .filter(|limit| *limit > 0)
                    .unwrap_or(self.config.max_parallel_deliveries);
                Arc::new(Semaphore::new(limit))
            })
            .clone()
    }
}
