//! # Ghost Task Detector
//!
//! Hourly scan for tasks that stopped making observable progress. Ghosts
//! are reported for operator action only; remediation (drop, resubmit) is
//! an external decision, so failures stay visible instead of being masked
//! by automatic cleanup.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, warn};

use crate::config::CoreConfig;
use crate::error::Result;
use crate::models::{TaskByState, TaskState};
use crate::reporting::{RecordNotification, ReportStream};
use crate::storage::{TaskDiagnosticStore, TaskStore};

/// One detected ghost, for logs and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct GhostTask {
    pub task_id: i64,
    pub topology_name: String,
    pub sent_timestamp: Option<DateTime<Utc>>,
    pub last_progress: Option<DateTime<Utc>>,
}

pub struct GhostTaskDetector {
    task_store: Arc<dyn TaskStore>,
    diagnostics: Arc<dyn TaskDiagnosticStore>,
    reports: ReportStream,
    config: Arc<CoreConfig>,
}

impl GhostTaskDetector {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        diagnostics: Arc<dyn TaskDiagnosticStore>,
        reports: ReportStream,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            task_store,
            diagnostics,
            reports,
            config,
        }
    }

    /// Periodic loop; never returns.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.ghost_scan_interval);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(ghosts) if !ghosts.is_empty() => {
                    warn!(count = ghosts.len(), "Ghost tasks detected");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Ghost scan failed"),
            }
        }
    }

    /// One scan over the unfinished tasks on this process's queues.
    pub async fn run_once(&self) -> Result<Vec<GhostTask>> {
        let own_queues: HashSet<String> = self.config.all_queues().into_iter().collect();
        let rows = self
            .task_store
            .find_by_states(&[TaskState::ProcessingBySubmitter, TaskState::Queued])
            .await?;

        let mut ghosts = Vec::new();
        for row in rows {
            if !own_queues.contains(&row.queue_name) {
                continue;
            }
            if let Some(ghost) = self.examine(&row).await? {
                warn!(
                    task_id = ghost.task_id,
                    topology_name = %ghost.topology_name,
                    sent_timestamp = ?ghost.sent_timestamp,
                    last_progress = ?ghost.last_progress,
                    "Ghost task: no progress for longer than the stale window"
                );
                self.reports.publish(RecordNotification::ghost_task(
                    ghost.task_id,
                    format!(
                        "Task stopped making progress (sent {:?}, last progress {:?})",
                        ghost.sent_timestamp, ghost.last_progress
                    ),
                ));
                ghosts.push(ghost);
            }
        }
        Ok(ghosts)
    }

    async fn examine(&self, row: &TaskByState) -> Result<Option<GhostTask>> {
        let task = self.task_store.find_by_id(row.task_id).await?;
        let sent = task
            .as_ref()
            .and_then(|task| task.sent_timestamp)
            .or(row.start_time);
        let Some(sent) = sent else {
            // No sent timestamp at all: age cannot be established.
            return Ok(None);
        };

        let now = Utc::now();
        let stale_horizon = now
            - chrono::Duration::from_std(self.config.ghost_stale_after)
                .unwrap_or_else(|_| chrono::Duration::days(2));
        let hard_horizon = now
            - chrono::Duration::from_std(self.config.ghost_hard_limit)
                .unwrap_or_else(|_| chrono::Duration::days(60));

        // Past the retention horizon the bookkeeping that would let the
        // task complete may already be gone; it is a ghost regardless of
        // recorded progress.
        if sent < hard_horizon {
            let last_progress = self.last_progress(row.task_id).await?;
            return Ok(Some(self.ghost(row, Some(sent), last_progress)));
        }

        if sent < stale_horizon {
            let last_progress = self.last_progress(row.task_id).await?;
            // "Never made progress" counts as stale.
            let progressed_recently = last_progress
                .map(|at| at >= stale_horizon)
                .unwrap_or(false);
            if !progressed_recently {
                return Ok(Some(self.ghost(row, Some(sent), last_progress)));
            }
        }
        Ok(None)
    }

    async fn last_progress(&self, task_id: i64) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .diagnostics
            .find_diagnostic(task_id)
            .await?
            .and_then(|diag| diag.last_progress()))
    }

    fn ghost(
        &self,
        row: &TaskByState,
        sent_timestamp: Option<DateTime<Utc>>,
        last_progress: Option<DateTime<Utc>>,
    ) -> GhostTask {
        GhostTask {
            task_id: row.task_id,
            topology_name: row.topology_name.clone(),
            sent_timestamp,
            last_progress,
        }
    }
}
