//! Lifecycle monitor tests: drain detection, the post-processing branch,
//! ownership scoping, and the defensive state re-check.

mod common;

use common::*;
use std::sync::Arc;

use recordflow_core::monitoring::{LifecycleAction, TaskLifecycleMonitor};
use recordflow_core::storage::{CounterDelta, TaskDiagnosticStore, TaskStore};
use recordflow_core::{TaskState, UNKNOWN_EXPECTED_SIZE};

fn monitor(env: &TestEnv, evaluator: Arc<dyn recordflow_core::capabilities::PostProcessingEvaluator>) -> TaskLifecycleMonitor {
    TaskLifecycleMonitor::new(
        env.task_store.clone(),
        env.task_store.clone(),
        evaluator,
        Arc::new(test_config("owner-1")),
    )
}

#[tokio::test]
async fn test_drained_task_becomes_processed() {
    let env = build_env("owner-1");
    env.task_store
        .insert(queued_task(1, "owner-1", 3), QUEUE_A)
        .await
        .unwrap();
    env.task_store
        .increment_counters(1, CounterDelta::processed(3))
        .await
        .unwrap();

    let monitor = monitor(&env, Arc::new(FixedEvaluator(false)));
    let actions = monitor.run_once().await.unwrap();
    assert_eq!(actions, vec![LifecycleAction::Processed { task_id: 1 }]);

    let task = env.task_store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Processed);
    assert_eq!(task.state_description, "Completely processed");
    assert!(task.finish_timestamp.is_some());
    let diag = env.task_store.find_diagnostic(1).await.unwrap().unwrap();
    assert!(diag.finished_at.is_some());

    // Second sweep finds nothing: the transition happened exactly once.
    assert!(monitor.run_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_errors_count_toward_drain() {
    let env = build_env("owner-1");
    env.task_store
        .insert(queued_task(1, "owner-1", 3), QUEUE_A)
        .await
        .unwrap();
    env.task_store
        .increment_counters(1, CounterDelta::processed(2))
        .await
        .unwrap();
    env.task_store
        .increment_counters(1, CounterDelta::errors(1))
        .await
        .unwrap();

    let actions = monitor(&env, Arc::new(FixedEvaluator(false)))
        .run_once()
        .await
        .unwrap();
    assert_eq!(actions, vec![LifecycleAction::Processed { task_id: 1 }]);
}

#[tokio::test]
async fn test_partially_drained_task_is_left_alone() {
    let env = build_env("owner-1");
    env.task_store
        .insert(queued_task(1, "owner-1", 3), QUEUE_A)
        .await
        .unwrap();
    env.task_store
        .increment_counters(1, CounterDelta::processed(2))
        .await
        .unwrap();

    let actions = monitor(&env, Arc::new(FixedEvaluator(false)))
        .run_once()
        .await
        .unwrap();
    assert!(actions.is_empty());
    let task = env.task_store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Queued);
}

#[tokio::test]
async fn test_unknown_expected_size_bypasses_completion() {
    let env = build_env("owner-1");
    env.task_store
        .insert(unknown_size_task(1, "owner-1"), QUEUE_A)
        .await
        .unwrap();
    env.task_store
        .increment_counters(1, CounterDelta::processed(1000))
        .await
        .unwrap();

    let actions = monitor(&env, Arc::new(FixedEvaluator(false)))
        .run_once()
        .await
        .unwrap();
    assert!(actions.is_empty());
    assert_eq!(
        env.task_store
            .find_by_id(1)
            .await
            .unwrap()
            .unwrap()
            .expected_records_number,
        UNKNOWN_EXPECTED_SIZE
    );
}

#[tokio::test]
async fn test_post_processing_branch() {
    let env = build_env("owner-1");
    env.task_store
        .insert(queued_task(1, "owner-1", 2), QUEUE_A)
        .await
        .unwrap();
    env.task_store
        .increment_counters(1, CounterDelta::processed(2))
        .await
        .unwrap();

    let actions = monitor(&env, Arc::new(FixedEvaluator(true)))
        .run_once()
        .await
        .unwrap();
    assert_eq!(
        actions,
        vec![LifecycleAction::ReadyForPostProcessing { task_id: 1 }]
    );

    let task = env.task_store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::ReadyForPostProcessing);
    let diag = env.task_store.find_diagnostic(1).await.unwrap().unwrap();
    assert!(diag.post_processing_started_at.is_some());
}

#[tokio::test]
async fn test_evaluator_failure_drops_task_permanently() {
    let env = build_env("owner-1");
    env.task_store
        .insert(queued_task(1, "owner-1", 1), QUEUE_A)
        .await
        .unwrap();
    env.task_store
        .increment_counters(1, CounterDelta::processed(1))
        .await
        .unwrap();

    let actions = monitor(&env, Arc::new(FailingEvaluator)).run_once().await.unwrap();
    assert!(matches!(
        actions.as_slice(),
        [LifecycleAction::Dropped { task_id: 1, .. }]
    ));
    let task = env.task_store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Dropped);
    assert!(task.state_description.contains("evaluator exploded"));
}

#[tokio::test]
async fn test_corrupt_definition_drops_task() {
    let env = build_env("owner-1");
    let mut task = queued_task(1, "owner-1", 1);
    task.definition = "{definitely not json".to_string();
    env.task_store.insert(task, QUEUE_A).await.unwrap();
    env.task_store
        .increment_counters(1, CounterDelta::processed(1))
        .await
        .unwrap();

    let actions = monitor(&env, Arc::new(FixedEvaluator(false)))
        .run_once()
        .await
        .unwrap();
    assert!(matches!(
        actions.as_slice(),
        [LifecycleAction::Dropped { task_id: 1, .. }]
    ));
}

#[tokio::test]
async fn test_foreign_tasks_are_ignored() {
    let env = build_env("owner-1");
    env.task_store
        .insert(queued_task(1, "other-owner", 1), QUEUE_A)
        .await
        .unwrap();
    env.task_store
        .increment_counters(1, CounterDelta::processed(1))
        .await
        .unwrap();

    let actions = monitor(&env, Arc::new(FixedEvaluator(false)))
        .run_once()
        .await
        .unwrap();
    assert!(actions.is_empty());
    let task = env.task_store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Queued);
}

#[tokio::test]
async fn test_stale_index_row_fails_defensive_recheck() {
    let env = build_env("owner-1");
    // A drained task whose basic-info row is already PROCESSED but whose
    // old QUEUED index row survived a crashed two-write mirror.
    let mut task = queued_task(1, "owner-1", 1);
    task.state = TaskState::Processed;
    task.processed_records_count = 1;
    env.task_store.insert(task, QUEUE_A).await.unwrap();
    env.task_store.insert_index_row(recordflow_core::TaskByState {
        state: TaskState::Queued,
        topology_name: TOPOLOGY.to_string(),
        task_id: 1,
        owner_id: "owner-1".to_string(),
        queue_name: QUEUE_A.to_string(),
        start_time: None,
    });

    let actions = monitor(&env, Arc::new(FixedEvaluator(false)))
        .run_once()
        .await
        .unwrap();
    assert!(actions.is_empty(), "stale index rows must not re-finalize");
    let task = env.task_store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Processed);
}
