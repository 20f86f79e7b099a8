//! # Composition Root
//!
//! Wires explicitly constructed component instances together, with no
//! shared mutable statics anywhere. One [`ProcessingCore`] per process
//! instance:
//! it boots crash resumption first, then starts the background monitors,
//! and hands out dispatch gateways for the queues this process consumes.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::TaskInfoCache;
use crate::capabilities::{PermissionGranter, PostProcessingEvaluator};
use crate::config::CoreConfig;
use crate::dispatch::{DeliverySink, RecordDispatchGateway};
use crate::error::Result;
use crate::messaging::RecordQueue;
use crate::monitoring::{GhostTaskDetector, TaskLifecycleMonitor};
use crate::registry::TopologyRegistry;
use crate::reporting::ReportStream;
use crate::resumption::ResumptionCoordinator;
use crate::storage::{ProcessedRecordStore, TaskDiagnosticStore, TaskStore};
use crate::submitter::{SubmitTaskParameters, SubmissionHandle, TaskSubmitter};

/// Storage and collaborator seams injected into the core.
pub struct CoreDependencies {
    pub task_store: Arc<dyn TaskStore>,
    pub diagnostics: Arc<dyn TaskDiagnosticStore>,
    pub records: Arc<dyn ProcessedRecordStore>,
    pub queue: Arc<dyn RecordQueue>,
    pub registry: Arc<TopologyRegistry>,
    pub permissions: Arc<dyn PermissionGranter>,
    pub evaluator: Arc<dyn PostProcessingEvaluator>,
}

pub struct ProcessingCore {
    config: Arc<CoreConfig>,
    deps: CoreDependencies,
    cache: Arc<TaskInfoCache>,
    reports: ReportStream,
    submitter: Arc<TaskSubmitter>,
}

impl ProcessingCore {
    pub fn new(config: CoreConfig, deps: CoreDependencies) -> Self {
        let config = Arc::new(config);
        let cache = Arc::new(TaskInfoCache::new(config.cache_capacity));
        let reports = ReportStream::default();
        let submitter = Arc::new(TaskSubmitter::new(
            deps.task_store.clone(),
            deps.diagnostics.clone(),
            deps.queue.clone(),
            deps.registry.clone(),
            deps.permissions.clone(),
            config.clone(),
        ));
        Self {
            config,
            deps,
            cache,
            reports,
            submitter,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The reporting side channel; subscribe before starting consumers to
    /// observe every notification.
    pub fn reports(&self) -> &ReportStream {
        &self.reports
    }

    /// Submit a task (producer surface of the core).
    pub async fn submit(&self, params: SubmitTaskParameters) -> Result<SubmissionHandle> {
        self.submitter.submit(params).await
    }

    /// Boot sequence: finish what a previous incarnation of this owner id
    /// left behind, then start the background monitors.
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>> {
        let resumption = ResumptionCoordinator::new(
            self.deps.task_store.clone(),
            self.submitter.clone(),
            self.config.clone(),
        );
        let resumed = resumption.resume_unfinished().await?;
        info!(resumed = resumed, "Resumption finished, starting monitors");

        let lifecycle = TaskLifecycleMonitor::new(
            self.deps.task_store.clone(),
            self.deps.diagnostics.clone(),
            self.deps.evaluator.clone(),
            self.config.clone(),
        );
        let ghost = GhostTaskDetector::new(
            self.deps.task_store.clone(),
            self.deps.diagnostics.clone(),
            self.reports.clone(),
            self.config.clone(),
        );

        Ok(vec![
            tokio::spawn(async move { lifecycle.run().await }),
            tokio::spawn(async move { ghost.run().await }),
        ])
    }

    /// Build a gateway for one topology and start consuming a queue into
    /// the given business-logic sink.
    pub fn spawn_gateway(
        &self,
        topology_name: impl Into<String>,
        queue_name: impl Into<String>,
        sink: Arc<dyn DeliverySink>,
    ) -> JoinHandle<()> {
        let gateway = Arc::new(self.gateway(topology_name));
        let queue = self.deps.queue.clone();
        let queue_name = queue_name.into();
        tokio::spawn(async move { gateway.run(queue, queue_name, sink).await })
    }

    /// Construct a gateway without starting a consumer loop (embedded and
    /// test use).
    pub fn gateway(&self, topology_name: impl Into<String>) -> RecordDispatchGateway {
        RecordDispatchGateway::new(
            topology_name,
            self.deps.task_store.clone(),
            self.deps.diagnostics.clone(),
            self.deps.records.clone(),
            self.cache.clone(),
            self.reports.clone(),
            self.config.clone(),
        )
    }
}
