//! Shared helpers for the integration tests: in-memory backends wired
//! through the composition root, a recording delivery sink, and task
//! definition builders.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use recordflow_core::capabilities::{
    NoopPermissionGranter, PermissionGranter, PostProcessingEvaluator,
};
use recordflow_core::dispatch::{DeliveryStatus, DeliverySink, RecordContext};
use recordflow_core::error::{CoreError, Result};
use recordflow_core::messaging::InMemoryRecordQueue;
use recordflow_core::registry::TopologyRegistry;
use recordflow_core::storage::{InMemoryProcessedRecordStore, InMemoryTaskStore};
use recordflow_core::submitter::StaticRecordListEnumerator;
use recordflow_core::{CoreConfig, CoreDependencies, ProcessingCore, TaskDefinition, TaskInfo, TaskState, UNKNOWN_EXPECTED_SIZE};

pub const TOPOLOGY: &str = "xslt_transform";
pub const QUEUE_A: &str = "xslt_queue_1";
pub const QUEUE_B: &str = "xslt_queue_2";

pub struct TestEnv {
    pub task_store: Arc<InMemoryTaskStore>,
    pub records: Arc<InMemoryProcessedRecordStore>,
    pub queue: Arc<InMemoryRecordQueue>,
    pub registry: Arc<TopologyRegistry>,
    pub core: ProcessingCore,
}

pub fn test_config(owner_id: &str) -> CoreConfig {
    let mut config = CoreConfig::default()
        .with_topology(TOPOLOGY, vec![QUEUE_A.to_string(), QUEUE_B.to_string()]);
    config.owner_id = owner_id.to_string();
    config.lifecycle_monitor_initial_delay = Duration::from_millis(10);
    config.lifecycle_monitor_interval = Duration::from_millis(50);
    config.ghost_scan_interval = Duration::from_millis(50);
    config.queue_poll_interval = Duration::from_millis(5);
    config
}

pub fn build_env(owner_id: &str) -> TestEnv {
    build_env_with(test_config(owner_id), Arc::new(FixedEvaluator(false)))
}

pub fn build_env_with(
    config: CoreConfig,
    evaluator: Arc<dyn PostProcessingEvaluator>,
) -> TestEnv {
    let task_store = Arc::new(InMemoryTaskStore::new());
    let records = Arc::new(InMemoryProcessedRecordStore::new());
    let queue = Arc::new(InMemoryRecordQueue::new());
    let registry = Arc::new(TopologyRegistry::new());
    registry.register(TOPOLOGY, Arc::new(StaticRecordListEnumerator));

    let deps = CoreDependencies {
        task_store: task_store.clone(),
        diagnostics: task_store.clone(),
        records: records.clone(),
        queue: queue.clone(),
        registry: registry.clone(),
        permissions: Arc::new(NoopPermissionGranter),
        evaluator,
    };
    let core = ProcessingCore::new(config, deps);
    TestEnv {
        task_store,
        records,
        queue,
        registry,
        core,
    }
}

/// Definition whose records are `r-1 .. r-n`.
pub fn definition_with_records(task_id: i64, count: usize) -> TaskDefinition {
    let records: Vec<serde_json::Value> = (1..=count)
        .map(|i| serde_json::json!({"record_id": format!("r-{i}"), "metadata_prefix": "edm"}))
        .collect();
    TaskDefinition::new(task_id, format!("task-{task_id}"))
        .with_input(serde_json::json!({ "records": records }))
}

/// Minimal queued task row, inserted directly into the store.
pub fn queued_task(task_id: i64, owner_id: &str, expected: i64) -> TaskInfo {
    TaskInfo {
        task_id,
        topology_name: TOPOLOGY.to_string(),
        state: TaskState::Queued,
        state_description: String::new(),
        owner_id: owner_id.to_string(),
        expected_records_number: expected,
        processed_records_count: 0,
        ignored_records_count: 0,
        deleted_records_count: 0,
        processed_errors_count: 0,
        deleted_errors_count: 0,
        retry_count: 0,
        sent_timestamp: Some(chrono::Utc::now()),
        start_timestamp: Some(chrono::Utc::now()),
        finish_timestamp: None,
        definition: definition_with_records(task_id, expected.max(0) as usize)
            .to_json()
            .unwrap(),
    }
}

pub fn unknown_size_task(task_id: i64, owner_id: &str) -> TaskInfo {
    let mut task = queued_task(task_id, owner_id, 0);
    task.expected_records_number = UNKNOWN_EXPECTED_SIZE;
    task
}

/// Delivery sink that records every context and answers with a fixed
/// status.
pub struct RecordingSink {
    delivered: Mutex<Vec<RecordContext>>,
    status: DeliveryStatus,
}

impl RecordingSink {
    pub fn acking() -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
            status: DeliveryStatus::Acked,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
            status: DeliveryStatus::Failed,
        })
    }

    pub fn contexts(&self) -> Vec<RecordContext> {
        self.delivered.lock().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().len()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, context: RecordContext) -> Result<DeliveryStatus> {
        self.delivered.lock().push(context);
        Ok(self.status)
    }
}

/// Permission granter that always fails, for the grant-never-blocks test.
pub struct DenyingPermissionGranter;

#[async_trait]
impl PermissionGranter for DenyingPermissionGranter {
    async fn grant_access(&self, task_id: i64) -> Result<()> {
        Err(CoreError::internal(format!(
            "ACL service rejected task {task_id}"
        )))
    }
}

/// Post-processing evaluator with a fixed answer.
pub struct FixedEvaluator(pub bool);

#[async_trait]
impl PostProcessingEvaluator for FixedEvaluator {
    async fn needs_post_processing(
        &self,
        _task: &TaskInfo,
        _definition: &TaskDefinition,
    ) -> Result<bool> {
        Ok(self.0)
    }
}

/// Post-processing evaluator that always errors.
pub struct FailingEvaluator;

#[async_trait]
impl PostProcessingEvaluator for FailingEvaluator {
    async fn needs_post_processing(
        &self,
        _task: &TaskInfo,
        _definition: &TaskDefinition,
    ) -> Result<bool> {
        Err(CoreError::internal("evaluator exploded"))
    }
}

/// Run the gateway until the queue reports drained.
pub async fn drain_queue(
    gateway: &recordflow_core::dispatch::RecordDispatchGateway,
    queue: &Arc<InMemoryRecordQueue>,
    queue_name: &str,
    sink: &Arc<RecordingSink>,
) {
    let queue_dyn: Arc<dyn recordflow_core::messaging::RecordQueue> = queue.clone();
    let sink_dyn: Arc<dyn DeliverySink> = sink.clone();
    while gateway
        .process_next(&queue_dyn, queue_name, &sink_dyn)
        .await
        .unwrap()
    {}
}
