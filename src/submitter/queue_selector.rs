//! Destination queue selection: round robin with avoidance.
//!
//! Prefer a configured queue no active task of the topology is using, so
//! concurrent tasks do not interleave on one queue; when every queue is
//! busy, fall back to a random choice.

use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::models::ACTIVE_STATES;
use crate::storage::TaskStore;

#[derive(Clone)]
pub struct QueueSelector {
    task_store: Arc<dyn TaskStore>,
    topologies: HashMap<String, Vec<String>>,
}

impl QueueSelector {
    pub fn new(task_store: Arc<dyn TaskStore>, topologies: HashMap<String, Vec<String>>) -> Self {
        Self {
            task_store,
            topologies,
        }
    }

    pub async fn preferred_queue(&self, topology_name: &str) -> Result<String> {
        let configured = self
            .topologies
            .get(topology_name)
            .filter(|queues| !queues.is_empty())
            .ok_or_else(|| {
                CoreError::configuration(format!(
                    "No queues configured for topology {topology_name}"
                ))
            })?;

        let active = self
            .task_store
            .find_by_states_and_topology(&ACTIVE_STATES, topology_name)
            .await?;
        let in_use: HashSet<&str> = active.iter().map(|row| row.queue_name.as_str()).collect();

        if let Some(free) = configured
            .iter()
            .find(|queue| !in_use.contains(queue.as_str()))
        {
            return Ok(free.clone());
        }

        let index = rand::thread_rng().gen_range(0..configured.len());
        Ok(configured[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskByState, TaskState};
    use crate::storage::InMemoryTaskStore;

    fn selector_with(store: Arc<InMemoryTaskStore>, queues: Vec<&str>) -> QueueSelector {
        let mut topologies = HashMap::new();
        topologies.insert(
            "oai_harvest".to_string(),
            queues.into_iter().map(String::from).collect(),
        );
        QueueSelector::new(store, topologies)
    }

    #[tokio::test]
    async fn test_prefers_unused_queue() {
        let store = Arc::new(InMemoryTaskStore::new());
        store.insert_index_row(TaskByState {
            state: TaskState::Queued,
            topology_name: "oai_harvest".into(),
            task_id: 1,
            owner_id: "owner-1".into(),
            queue_name: "oai_1".into(),
            start_time: None,
        });

        let selector = selector_with(store, vec!["oai_1", "oai_2"]);
        assert_eq!(selector.preferred_queue("oai_harvest").await.unwrap(), "oai_2");
    }

    #[tokio::test]
    async fn test_falls_back_to_configured_queue_when_all_busy() {
        let store = Arc::new(InMemoryTaskStore::new());
        for (task_id, queue) in [(1, "oai_1"), (2, "oai_2")] {
            store.insert_index_row(TaskByState {
                state: TaskState::Queued,
                topology_name: "oai_harvest".into(),
                task_id,
                owner_id: "owner-1".into(),
                queue_name: queue.into(),
                start_time: None,
            });
        }

        let selector = selector_with(store, vec!["oai_1", "oai_2"]);
        let chosen = selector.preferred_queue("oai_harvest").await.unwrap();
        assert!(["oai_1", "oai_2"].contains(&chosen.as_str()));
    }

    #[tokio::test]
    async fn test_unknown_topology_is_a_configuration_error() {
        let store = Arc::new(InMemoryTaskStore::new());
        let selector = selector_with(store, vec!["oai_1"]);
        assert!(selector.preferred_queue("no_such_topology").await.is_err());
    }
}
