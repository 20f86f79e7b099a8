//! # Task Submitter
//!
//! Producer side of the core: accepts a task definition, enumerates its
//! records through the topology's [`RecordEnumerator`], and streams record
//! units onto the selected destination queue while tracking expected size.
//!
//! Submission is asynchronous: [`TaskSubmitter::submit`] persists the task
//! in `PROCESSING_BY_SUBMITTER`, grants the access-control placeholder and
//! returns; enumeration and streaming continue on the runtime. A crash in
//! between is repaired by the resumption coordinator, which re-invokes the
//! submitter in [`SubmitMode::Restart`].

pub mod enumerator;
pub mod queue_selector;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::capabilities::PermissionGranter;
use crate::config::CoreConfig;
use crate::error::Result;
use crate::messaging::RecordQueue;
use crate::models::{RecordUnit, TaskDefinition, TaskInfo, TaskState, UNKNOWN_EXPECTED_SIZE};
use crate::registry::TopologyRegistry;
use crate::storage::{TaskDiagnosticStore, TaskStore};

pub use enumerator::{RecordEnumerator, RecordIdentifier, StaticRecordListEnumerator};
pub use queue_selector::QueueSelector;

/// Fresh submission or crash-recovery re-submission.
///
/// Both modes share the enumeration/streaming loop; a restart tolerates
/// the enumerator re-yielding identifiers that were already enqueued
/// before the crash (the consumer-side dedup absorbs the duplicates) and
/// keeps the task's original sent timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    Execute,
    Restart,
}

/// One submission request.
#[derive(Debug, Clone)]
pub struct SubmitTaskParameters {
    pub definition: TaskDefinition,
    pub topology_name: String,
    pub mode: SubmitMode,
    /// Original sent timestamp, preserved across restarts; `None` means
    /// "now"
    pub sent_timestamp: Option<DateTime<Utc>>,
}

impl SubmitTaskParameters {
    pub fn new(definition: TaskDefinition, topology_name: impl Into<String>) -> Self {
        Self {
            definition,
            topology_name: topology_name.into(),
            mode: SubmitMode::Execute,
            sent_timestamp: None,
        }
    }

    pub fn restart(
        definition: TaskDefinition,
        topology_name: impl Into<String>,
        sent_timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            definition,
            topology_name: topology_name.into(),
            mode: SubmitMode::Restart,
            sent_timestamp,
        }
    }
}

/// Handle on an accepted submission. The caller's request is complete as
/// soon as this exists; awaiting [`SubmissionHandle::finished`] is only
/// needed when the caller wants to observe the streaming outcome.
pub struct SubmissionHandle {
    pub task_id: i64,
    handle: Option<JoinHandle<()>>,
}

impl SubmissionHandle {
    fn completed(task_id: i64) -> Self {
        Self {
            task_id,
            handle: None,
        }
    }

    fn running(task_id: i64, handle: JoinHandle<()>) -> Self {
        Self {
            task_id,
            handle: Some(handle),
        }
    }

    /// Wait until the streaming loop has finished.
    pub async fn finished(self) {
        if let Some(handle) = self.handle {
            let _ = handle.await;
        }
    }
}

enum StreamOutcome {
    Submitted(u64),
    Empty,
    Killed,
}

#[derive(Clone)]
pub struct TaskSubmitter {
    task_store: Arc<dyn TaskStore>,
    diagnostics: Arc<dyn TaskDiagnosticStore>,
    queue: Arc<dyn RecordQueue>,
    selector: QueueSelector,
    registry: Arc<TopologyRegistry>,
    permissions: Arc<dyn PermissionGranter>,
    config: Arc<CoreConfig>,
}

impl TaskSubmitter {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        diagnostics: Arc<dyn TaskDiagnosticStore>,
        queue: Arc<dyn RecordQueue>,
        registry: Arc<TopologyRegistry>,
        permissions: Arc<dyn PermissionGranter>,
        config: Arc<CoreConfig>,
    ) -> Self {
        let selector = QueueSelector::new(task_store.clone(), config.topologies.clone());
        Self {
            task_store,
            diagnostics,
            queue,
            selector,
            registry,
            permissions,
            config,
        }
    }

    /// Accept a task: persist it, grant access, then stream its records
    /// onto the queue asynchronously.
    pub async fn submit(&self, params: SubmitTaskParameters) -> Result<SubmissionHandle> {
        let SubmitTaskParameters {
            definition,
            topology_name,
            mode,
            sent_timestamp,
        } = params;
        let task_id = definition.task_id;

        let enumerator = self.registry.resolve(&topology_name)?;
        let queue_name = self.selector.preferred_queue(&topology_name).await?;
        self.queue.ensure_queue(&queue_name).await?;

        let sent = sent_timestamp.unwrap_or_else(Utc::now);

        // Count upfront when the topology can do it cheaply; a counting
        // failure drops the task before anything reaches the queue.
        let expected = match enumerator.expected_count(&definition).await {
            Ok(expected) => expected,
            Err(e) => {
                error!(task_id = task_id, error = %e, "Record counting failed, dropping task");
                let info = self.build_task_info(
                    &definition,
                    &topology_name,
                    TaskState::Dropped,
                    &format!("The task was dropped because {e}"),
                    UNKNOWN_EXPECTED_SIZE,
                    sent,
                )?;
                self.task_store.insert(info, &queue_name).await?;
                return Ok(SubmissionHandle::completed(task_id));
            }
        };

        let info = self.build_task_info(
            &definition,
            &topology_name,
            TaskState::ProcessingBySubmitter,
            "The task is in a pending mode, it is being processed before submission",
            expected.map(|count| count as i64).unwrap_or(UNKNOWN_EXPECTED_SIZE),
            sent,
        )?;
        self.task_store.insert(info, &queue_name).await?;

        if let Err(e) = self.permissions.grant_access(task_id).await {
            // Access grants only gate early operator queries; they never
            // block a submission.
            warn!(task_id = task_id, error = %e, "Permission grant failed, continuing submission");
        }

        info!(
            task_id = task_id,
            topology_name = %topology_name,
            queue_name = %queue_name,
            mode = ?mode,
            "Task accepted, streaming records to queue"
        );

        let submitter = self.clone();
        let handle = tokio::spawn(async move {
            submitter
                .run_submission(enumerator, definition, queue_name)
                .await;
        });
        Ok(SubmissionHandle::running(task_id, handle))
    }

    async fn run_submission(
        &self,
        enumerator: Arc<dyn RecordEnumerator>,
        definition: TaskDefinition,
        queue_name: String,
    ) {
        let task_id = definition.task_id;
        match self.stream_records(&enumerator, &definition, &queue_name).await {
            Ok(StreamOutcome::Submitted(count)) => {
                let finalize = async {
                    self.task_store
                        .update_state_with_expected_size(task_id, TaskState::Queued, count as i64)
                        .await?;
                    self.diagnostics.update_queued_at(task_id, Utc::now()).await
                };
                match finalize.await {
                    Ok(()) => info!(
                        task_id = task_id,
                        records = count,
                        "Submitting records to the queue succeeded"
                    ),
                    Err(e) => {
                        error!(task_id = task_id, error = %e, "Finalizing submission failed");
                        self.drop_task(task_id, &e.to_string()).await;
                    }
                }
            }
            Ok(StreamOutcome::Empty) => {
                warn!(task_id = task_id, "The task was dropped because it is empty");
                self.drop_task(task_id, "The task was dropped because it contains no records")
                    .await;
            }
            Ok(StreamOutcome::Killed) => {
                // Whoever set the kill flag already dropped the task;
                // already-enqueued units are not retracted.
                warn!(task_id = task_id, "Task was killed while records were being submitted");
            }
            Err(e) => {
                error!(task_id = task_id, error = %e, "Task submission failed");
                self.drop_task(task_id, &format!("The task was dropped because {e}"))
                    .await;
            }
        }
    }

    async fn stream_records(
        &self,
        enumerator: &Arc<dyn RecordEnumerator>,
        definition: &TaskDefinition,
        queue_name: &str,
    ) -> Result<StreamOutcome> {
        let task_id = definition.task_id;
        let mut stream = enumerator.enumerate(definition).await?;
        let mut submitted: u64 = 0;

        while let Some(next) = stream.next().await {
            // The kill flag must interrupt enumeration promptly, so it is
            // re-checked between every enqueue.
            if self.task_store.is_killed(task_id).await? {
                return Ok(StreamOutcome::Killed);
            }

            let identifier = next?;
            let unit = RecordUnit {
                task_id,
                record_id: identifier.record_id,
                metadata_prefix: identifier.metadata_prefix,
                marked_as_deleted: identifier.marked_as_deleted,
            };
            self.queue.enqueue(queue_name, &unit).await?;
            submitted += 1;

            if submitted % self.config.progress_log_frequency == 0 {
                info!(
                    task_id = task_id,
                    submitted = submitted,
                    "Records submitting is progressing"
                );
            }
        }

        if submitted == 0 {
            Ok(StreamOutcome::Empty)
        } else {
            Ok(StreamOutcome::Submitted(submitted))
        }
    }

    async fn drop_task(&self, task_id: i64, reason: &str) {
        if let Err(e) = self.task_store.set_dropped(task_id, reason).await {
            error!(task_id = task_id, error = %e, "Failed to record task drop");
        }
    }

    fn build_task_info(
        &self,
        definition: &TaskDefinition,
        topology_name: &str,
        state: TaskState,
        description: &str,
        expected_records_number: i64,
        sent: DateTime<Utc>,
    ) -> Result<TaskInfo> {
        Ok(TaskInfo {
            task_id: definition.task_id,
            topology_name: topology_name.to_string(),
            state,
            state_description: description.to_string(),
            owner_id: self.config.owner_id.clone(),
            expected_records_number,
            processed_records_count: 0,
            ignored_records_count: 0,
            deleted_records_count: 0,
            processed_errors_count: 0,
            deleted_errors_count: 0,
            retry_count: 0,
            sent_timestamp: Some(sent),
            start_timestamp: Some(Utc::now()),
            finish_timestamp: None,
            definition: definition.to_json()?,
        })
    }
}
