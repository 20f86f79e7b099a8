//! Ghost detector tests: stale-window detection, the retention-horizon
//! hard limit, queue scoping, and the reporting-stream notification.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use std::sync::Arc;

use recordflow_core::monitoring::GhostTaskDetector;
use recordflow_core::reporting::NotificationKind;
use recordflow_core::storage::{TaskDiagnosticStore, TaskStore};
use recordflow_core::TaskState;

fn detector(env: &TestEnv) -> GhostTaskDetector {
    GhostTaskDetector::new(
        env.task_store.clone(),
        env.task_store.clone(),
        env.core.reports().clone(),
        Arc::new(test_config("owner-1")),
    )
}

async fn insert_task_sent_days_ago(env: &TestEnv, task_id: i64, days: i64, state: TaskState) {
    let mut task = queued_task(task_id, "owner-1", 10);
    task.state = state;
    task.sent_timestamp = Some(Utc::now() - ChronoDuration::days(days));
    env.task_store.insert(task, QUEUE_A).await.unwrap();
}

#[tokio::test]
async fn test_stale_task_without_progress_is_a_ghost() {
    let env = build_env("owner-1");
    insert_task_sent_days_ago(&env, 1, 3, TaskState::Queued).await;

    let ghosts = detector(&env).run_once().await.unwrap();
    assert_eq!(ghosts.len(), 1);
    assert_eq!(ghosts[0].task_id, 1);
    assert!(ghosts[0].last_progress.is_none());
}

#[tokio::test]
async fn test_recent_progress_clears_the_ghost_flag() {
    let env = build_env("owner-1");
    insert_task_sent_days_ago(&env, 1, 3, TaskState::Queued).await;
    env.task_store
        .update_last_record_finished_at(1, Utc::now() - ChronoDuration::hours(1))
        .await
        .unwrap();

    let ghosts = detector(&env).run_once().await.unwrap();
    assert!(ghosts.is_empty());
}

#[tokio::test]
async fn test_stale_progress_still_ghosts() {
    let env = build_env("owner-1");
    insert_task_sent_days_ago(&env, 1, 10, TaskState::Queued).await;
    env.task_store
        .update_last_record_finished_at(1, Utc::now() - ChronoDuration::days(5))
        .await
        .unwrap();

    let ghosts = detector(&env).run_once().await.unwrap();
    assert_eq!(ghosts.len(), 1);
    assert!(ghosts[0].last_progress.is_some());
}

#[tokio::test]
async fn test_retention_horizon_ghosts_despite_recent_progress() {
    let env = build_env("owner-1");
    insert_task_sent_days_ago(&env, 1, 61, TaskState::Queued).await;
    env.task_store
        .update_last_record_finished_at(1, Utc::now() - ChronoDuration::hours(1))
        .await
        .unwrap();

    let ghosts = detector(&env).run_once().await.unwrap();
    assert_eq!(ghosts.len(), 1, "past the retention horizon progress no longer counts");
}

#[tokio::test]
async fn test_fresh_task_is_not_a_ghost() {
    let env = build_env("owner-1");
    insert_task_sent_days_ago(&env, 1, 0, TaskState::Queued).await;

    let ghosts = detector(&env).run_once().await.unwrap();
    assert!(ghosts.is_empty());
}

#[tokio::test]
async fn test_submitter_stuck_tasks_are_scanned_too() {
    let env = build_env("owner-1");
    insert_task_sent_days_ago(&env, 1, 3, TaskState::ProcessingBySubmitter).await;

    let ghosts = detector(&env).run_once().await.unwrap();
    assert_eq!(ghosts.len(), 1);
}

#[tokio::test]
async fn test_tasks_on_foreign_queues_are_ignored() {
    let env = build_env("owner-1");
    let mut task = queued_task(1, "owner-1", 10);
    task.sent_timestamp = Some(Utc::now() - ChronoDuration::days(3));
    env.task_store
        .insert(task, "some_other_process_queue")
        .await
        .unwrap();

    let ghosts = detector(&env).run_once().await.unwrap();
    assert!(ghosts.is_empty());
}

#[tokio::test]
async fn test_ghosts_are_reported_not_remediated() {
    let env = build_env("owner-1");
    let mut notifications = env.core.reports().subscribe();
    insert_task_sent_days_ago(&env, 1, 3, TaskState::Queued).await;

    detector(&env).run_once().await.unwrap();

    let notification = notifications.try_recv().unwrap();
    assert_eq!(notification.kind, NotificationKind::GhostTask);
    assert_eq!(notification.task_id, 1);

    // Detection never mutates the task.
    let task = env.task_store.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Queued);
}
