//! # Resumption Coordinator
//!
//! Startup-time crash repair: tasks this process owned and did not finish
//! submitting are re-submitted in restart mode, before the process starts
//! accepting new submissions. Consumer-side dedup absorbs whatever the
//! previous run already enqueued.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::CoreConfig;
use crate::error::Result;
use crate::models::{TaskDefinition, RESUMABLE_STATES};
use crate::storage::TaskStore;
use crate::submitter::{SubmitTaskParameters, TaskSubmitter};

pub struct ResumptionCoordinator {
    task_store: Arc<dyn TaskStore>,
    submitter: Arc<TaskSubmitter>,
    config: Arc<CoreConfig>,
}

impl ResumptionCoordinator {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        submitter: Arc<TaskSubmitter>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            task_store,
            submitter,
            config,
        }
    }

    /// Re-submit every resumable task owned by this process. Returns how
    /// many submissions were restarted.
    pub async fn resume_unfinished(&self) -> Result<usize> {
        info!(owner_id = %self.config.owner_id, "Restarting unfinished tasks");
        let rows = self.task_store.find_by_states(&RESUMABLE_STATES).await?;

        let mut resumed = 0;
        for row in rows {
            if row.owner_id != self.config.owner_id {
                continue;
            }
            let Some(task) = self.task_store.find_by_id(row.task_id).await? else {
                // Index and basic-info table disagree; the tolerated
                // inconsistency window or a partially retained task.
                warn!(task_id = row.task_id,
                    "Task not found in basic info table, ignored in resumption");
                continue;
            };

            let definition = match TaskDefinition::from_json(task.task_id, &task.definition) {
                Ok(definition) => definition,
                Err(e) => {
                    error!(task_id = task.task_id, error = %e,
                        "Unable to resume task, definition is corrupt");
                    self.task_store
                        .set_dropped(task.task_id, &e.to_string())
                        .await?;
                    continue;
                }
            };

            info!(task_id = task.task_id, topology_name = %task.topology_name,
                "Resuming execution");
            let params = SubmitTaskParameters::restart(
                definition,
                task.topology_name.clone(),
                task.sent_timestamp,
            );
            match self.submitter.submit(params).await {
                Ok(handle) => {
                    // Sequential like the original resumption loop: one
                    // task fully re-streamed before the next begins.
                    handle.finished().await;
                    resumed += 1;
                }
                Err(e) => {
                    error!(task_id = task.task_id, error = %e, "Unable to resume the task");
                    self.task_store
                        .set_dropped(task.task_id, &e.to_string())
                        .await?;
                }
            }
        }

        if resumed == 0 {
            info!("No tasks to be resumed");
        }
        Ok(resumed)
    }
}
