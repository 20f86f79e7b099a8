//! Resumption coordinator tests: crash repair of half-submitted tasks,
//! ownership scoping, corrupt definitions, and idempotence of re-running
//! the coordinator (consumer-side dedup absorbs the duplicates).

mod common;

use common::*;
use std::sync::Arc;

use recordflow_core::models::RecordState;
use recordflow_core::storage::{ProcessedRecordStore, TaskStore};
use recordflow_core::TaskState;

async fn insert_orphan(env: &TestEnv, task_id: i64, owner_id: &str, records: usize) {
    let mut task = queued_task(task_id, owner_id, records as i64);
    task.state = TaskState::ProcessingBySubmitter;
    env.task_store.insert(task, QUEUE_A).await.unwrap();
}

// start() runs the resumption coordinator to completion before spawning
// the monitors, which these tests do not want running.
async fn boot(env: &TestEnv) {
    let handles = env.core.start().await.unwrap();
    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_orphaned_task_is_resubmitted() {
    let env = build_env("owner-1");
    insert_orphan(&env, 1, "owner-1", 4).await;

    boot(&env).await;

    let task = env.task_store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Queued);
    assert_eq!(task.expected_records_number, 4);
    assert_eq!(env.queue.depth(QUEUE_A) + env.queue.depth(QUEUE_B), 4);
}

#[tokio::test]
async fn test_foreign_orphans_are_left_for_their_owner() {
    let env = build_env("owner-1");
    insert_orphan(&env, 1, "owner-2", 2).await;

    boot(&env).await;

    let task = env.task_store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::ProcessingBySubmitter);
    assert_eq!(env.queue.depth(QUEUE_A) + env.queue.depth(QUEUE_B), 0);
}

#[tokio::test]
async fn test_index_row_without_task_row_is_skipped() {
    let env = build_env("owner-1");
    env.task_store.insert_index_row(recordflow_core::TaskByState {
        state: TaskState::ProcessingBySubmitter,
        topology_name: TOPOLOGY.to_string(),
        task_id: 99,
        owner_id: "owner-1".to_string(),
        queue_name: QUEUE_A.to_string(),
        start_time: None,
    });

    // Inconsistent index state is a warning, not a failure.
    boot(&env).await;
    assert!(env.task_store.find_by_id(99).await.unwrap().is_none());
}

#[tokio::test]
async fn test_corrupt_definition_drops_task_instead_of_silent_skip() {
    let env = build_env("owner-1");
    let mut task = queued_task(1, "owner-1", 2);
    task.state = TaskState::ProcessingBySubmitter;
    task.definition = "{broken".to_string();
    env.task_store.insert(task, QUEUE_A).await.unwrap();

    boot(&env).await;

    let task = env.task_store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Dropped);
    assert!(task.state_description.contains("not deserializable"));
}

#[tokio::test]
async fn test_resumption_preserves_sent_timestamp() {
    let env = build_env("owner-1");
    let original_sent = chrono::Utc::now() - chrono::Duration::hours(6);
    let mut task = queued_task(1, "owner-1", 1);
    task.state = TaskState::ProcessingBySubmitter;
    task.sent_timestamp = Some(original_sent);
    env.task_store.insert(task, QUEUE_A).await.unwrap();

    boot(&env).await;

    let task = env.task_store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Queued);
    assert_eq!(task.sent_timestamp, Some(original_sent));
}

#[tokio::test]
async fn test_double_resumption_is_absorbed_by_consumer_dedup() {
    let env = build_env("owner-1");
    insert_orphan(&env, 1, "owner-1", 3).await;

    boot(&env).await;

    // A second boot finds nothing resumable: the task is QUEUED now.
    boot(&env).await;
    assert_eq!(env.queue.depth(QUEUE_A) + env.queue.depth(QUEUE_B), 3);

    // Simulate the worst case: the state write was lost and a third boot
    // re-streamed every unit.
    env.task_store
        .update_state(1, TaskState::ProcessingBySubmitter, "crash replay")
        .await
        .unwrap();
    boot(&env).await;
    let total = env.queue.depth(QUEUE_A) + env.queue.depth(QUEUE_B);
    assert_eq!(total, 6, "duplicate units are expected on the queue");

    // Drive the consumer over everything; first deliveries succeed and
    // are persisted terminal by the downstream simulation, duplicates are
    // then dropped by the bookkeeping.
    let sink = RecordingSink::acking();
    let gateway = env.core.gateway(TOPOLOGY);
    for queue_name in [QUEUE_A, QUEUE_B] {
        // First pass: deliver what is visible.
        drain_queue(&gateway, &env.queue, queue_name, &sink).await;
    }
    // Downstream finished every record it saw.
    for i in 1..=3 {
        env.records
            .update_record_state(1, &format!("r-{i}"), RecordState::Success)
            .await
            .unwrap();
    }
    for queue_name in [QUEUE_A, QUEUE_B] {
        env.queue.expire_all_visibility(queue_name);
        drain_queue(&gateway, &env.queue, queue_name, &sink).await;
    }

    // Every duplicate left the queue without a second business delivery.
    assert_eq!(env.queue.depth(QUEUE_A) + env.queue.depth(QUEUE_B), 0);
    let mut seen: Vec<String> = sink
        .contexts()
        .into_iter()
        .map(|context| context.record_id)
        .collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 3, "each record reached business logic, duplicates bounded");

    // Attempt counts stayed within the budget despite double submission.
    for i in 1..=3 {
        let record = env
            .records
            .find_record(1, &format!("r-{i}"))
            .await
            .unwrap()
            .unwrap();
        assert!(record.attempt_number <= 1 + 3);
    }
}
