//! Configuration for one process instance of the record-processing core.
//!
//! Defaults cover a single-node deployment; every scalar can be overridden
//! through `RECORDFLOW_`-prefixed environment variables.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{CoreError, Result};

const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Identifier of this process instance; scopes crash resumption and
    /// lifecycle monitoring to tasks this instance owns
    pub owner_id: String,
    /// Business attempts allowed per record before it is terminally failed
    pub max_retries: i64,
    /// Capacity of the task-info LRU cache
    pub cache_capacity: usize,
    /// A task without progress for this long is a ghost candidate
    pub ghost_stale_after: Duration,
    /// A task older than this can never self-complete (bookkeeping
    /// retention horizon) and is always a ghost
    pub ghost_hard_limit: Duration,
    pub ghost_scan_interval: Duration,
    pub lifecycle_monitor_interval: Duration,
    /// Grace period after startup before the first lifecycle sweep
    pub lifecycle_monitor_initial_delay: Duration,
    /// In-flight delivery cap per task; tasks can lower it through the
    /// `max_parallel_deliveries` task parameter
    pub max_parallel_deliveries: usize,
    /// How long a read hides a queue message from other consumers
    pub visibility_timeout: Duration,
    /// Poll back-off when the queue is drained
    pub queue_poll_interval: Duration,
    /// Emit a submission progress log line every this many record units
    pub progress_log_frequency: u64,
    /// Destination queues per topology
    pub topologies: HashMap<String, Vec<String>>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            owner_id: generated_owner_id(),
            max_retries: 3,
            cache_capacity: 50,
            ghost_stale_after: Duration::from_secs(2 * DAY_SECS),
            ghost_hard_limit: Duration::from_secs(60 * DAY_SECS),
            ghost_scan_interval: Duration::from_secs(60 * 60),
            lifecycle_monitor_interval: Duration::from_secs(15),
            lifecycle_monitor_initial_delay: Duration::from_secs(60),
            max_parallel_deliveries: 16,
            visibility_timeout: Duration::from_secs(120),
            queue_poll_interval: Duration::from_millis(200),
            progress_log_frequency: 1000,
            topologies: HashMap::new(),
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(owner_id) = std::env::var("RECORDFLOW_OWNER_ID") {
            config.owner_id = owner_id;
        }
        if let Some(value) = parse_env("RECORDFLOW_MAX_RETRIES")? {
            config.max_retries = value;
        }
        if let Some(value) = parse_env("RECORDFLOW_CACHE_CAPACITY")? {
            config.cache_capacity = value;
        }
        if let Some(value) = parse_env("RECORDFLOW_GHOST_STALE_AFTER_SECS")? {
            config.ghost_stale_after = Duration::from_secs(value);
        }
        if let Some(value) = parse_env("RECORDFLOW_GHOST_HARD_LIMIT_SECS")? {
            config.ghost_hard_limit = Duration::from_secs(value);
        }
        if let Some(value) = parse_env("RECORDFLOW_LIFECYCLE_INTERVAL_SECS")? {
            config.lifecycle_monitor_interval = Duration::from_secs(value);
        }
        if let Some(value) = parse_env("RECORDFLOW_LIFECYCLE_INITIAL_DELAY_SECS")? {
            config.lifecycle_monitor_initial_delay = Duration::from_secs(value);
        }
        if let Some(value) = parse_env("RECORDFLOW_MAX_PARALLEL_DELIVERIES")? {
            config.max_parallel_deliveries = value;
        }
        if let Some(value) = parse_env("RECORDFLOW_VISIBILITY_TIMEOUT_SECS")? {
            config.visibility_timeout = Duration::from_secs(value);
        }

        Ok(config)
    }

    /// Register the destination queues of a topology.
    pub fn with_topology(
        mut self,
        topology_name: impl Into<String>,
        queues: Vec<String>,
    ) -> Self {
        self.topologies.insert(topology_name.into(), queues);
        self
    }

    /// All queues this process consumes from, across topologies.
    pub fn all_queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self
            .topologies
            .values()
            .flat_map(|names| names.iter().cloned())
            .collect();
        queues.sort();
        queues.dedup();
        queues
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| CoreError::configuration(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn generated_owner_id() -> String {
    format!("recordflow-{}", uuid::Uuid::new_v4())
}
