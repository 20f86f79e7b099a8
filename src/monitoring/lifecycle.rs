//! # Task Lifecycle Monitor
//!
//! Background sweep that detects fully drained tasks and moves them to
//! `PROCESSED` or `READY_FOR_POST_PROCESSING`. Runs on a fixed interval
//! after an initial delay that lets the system stabilize following a
//! restart.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::capabilities::PostProcessingEvaluator;
use crate::config::CoreConfig;
use crate::error::Result;
use crate::models::{TaskDefinition, TaskState};
use crate::storage::{TaskDiagnosticStore, TaskStore};

/// What one sweep did to one task, for logs and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleAction {
    Processed { task_id: i64 },
    ReadyForPostProcessing { task_id: i64 },
    Dropped { task_id: i64, reason: String },
}

pub struct TaskLifecycleMonitor {
    task_store: Arc<dyn TaskStore>,
    diagnostics: Arc<dyn TaskDiagnosticStore>,
    evaluator: Arc<dyn PostProcessingEvaluator>,
    config: Arc<CoreConfig>,
}

impl TaskLifecycleMonitor {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        diagnostics: Arc<dyn TaskDiagnosticStore>,
        evaluator: Arc<dyn PostProcessingEvaluator>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            task_store,
            diagnostics,
            evaluator,
            config,
        }
    }

    /// Periodic loop; never returns.
    pub async fn run(&self) {
        tokio::time::sleep(self.config.lifecycle_monitor_initial_delay).await;
        let mut ticker = tokio::time::interval(self.config.lifecycle_monitor_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!(error = %e, "Lifecycle sweep failed");
            }
        }
    }

    /// One sweep over the queued tasks owned by this process.
    pub async fn run_once(&self) -> Result<Vec<LifecycleAction>> {
        let mut actions = Vec::new();
        let rows = self.task_store.find_by_states(&[TaskState::Queued]).await?;

        for row in rows {
            if row.owner_id != self.config.owner_id {
                continue;
            }
            let Some(task) = self.task_store.find_by_id(row.task_id).await? else {
                warn!(task_id = row.task_id,
                    "Task present in state index but missing from basic info");
                continue;
            };
            // Defensive re-check: the index row may be stale relative to
            // the task row (two-write mirror, concurrent transitions).
            if task.state != TaskState::Queued {
                continue;
            }
            if !task.is_drained() {
                continue;
            }
            if let Some(action) = self.finish_task(&task).await? {
                actions.push(action);
            }
        }
        Ok(actions)
    }

    async fn finish_task(
        &self,
        task: &crate::models::TaskInfo,
    ) -> Result<Option<LifecycleAction>> {
        let definition = match TaskDefinition::from_json(task.task_id, &task.definition) {
            Ok(definition) => definition,
            Err(e) => {
                // The definition is needed to evaluate post-processing;
                // one that does not parse is permanently corrupt.
                error!(task_id = task.task_id, error = %e,
                    "Cannot evaluate post-processing need, dropping task");
                let reason = e.to_string();
                self.task_store.set_dropped(task.task_id, &reason).await?;
                return Ok(Some(LifecycleAction::Dropped {
                    task_id: task.task_id,
                    reason,
                }));
            }
        };

        match self.evaluator.needs_post_processing(task, &definition).await {
            Ok(true) => {
                info!(task_id = task.task_id, "Task drained, handing over to post-processing");
                self.task_store
                    .update_state(
                        task.task_id,
                        TaskState::ReadyForPostProcessing,
                        "Ready for post processing after topology stage is finished",
                    )
                    .await?;
                self.diagnostics
                    .update_post_processing_started_at(task.task_id, Utc::now())
                    .await?;
                Ok(Some(LifecycleAction::ReadyForPostProcessing {
                    task_id: task.task_id,
                }))
            }
            Ok(false) => {
                info!(task_id = task.task_id, "Task drained, marking completely processed");
                self.task_store
                    .set_processed(task.task_id, "Completely processed")
                    .await?;
                self.diagnostics
                    .update_finished_at(task.task_id, Utc::now())
                    .await?;
                Ok(Some(LifecycleAction::Processed {
                    task_id: task.task_id,
                }))
            }
            Err(e) => {
                error!(task_id = task.task_id, error = %e,
                    "Post-processing evaluation failed, dropping task");
                let reason = e.to_string();
                self.task_store.set_dropped(task.task_id, &reason).await?;
                Ok(Some(LifecycleAction::Dropped {
                    task_id: task.task_id,
                    reason,
                }))
            }
        }
    }
}
