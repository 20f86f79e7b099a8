//! # Task Info Cache
//!
//! Bounded LRU cache of [`TaskInfo`] lookups, one store round-trip saved
//! per record. Task metadata referenced by the gateway (parameters,
//! harvesting details) is immutable after submission, so entries stay
//! valid until evicted or the process restarts.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::models::TaskInfo;

pub const DEFAULT_CACHE_CAPACITY: usize = 50;

struct CacheInner {
    map: HashMap<i64, TaskInfo>,
    // Recency order, least recently used at the front. Linear touch is
    // fine at the default capacity of 50.
    order: VecDeque<i64>,
}

/// Bounded, mutex-guarded LRU of task metadata.
pub struct TaskInfoCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl TaskInfoCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, task_id: i64) -> Option<TaskInfo> {
        let mut inner = self.inner.lock();
        let found = inner.map.get(&task_id).cloned();
        if found.is_some() {
            touch(&mut inner.order, task_id);
        }
        found
    }

    pub fn insert(&self, task: TaskInfo) {
        let mut inner = self.inner.lock();
        let task_id = task.task_id;
        if inner.map.insert(task_id, task).is_none() && inner.map.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.map.remove(&evicted);
            }
        }
        touch(&mut inner.order, task_id);
    }

    /// Drop one entry, e.g. after a task was killed and its cached state
    /// became misleading.
    pub fn invalidate(&self, task_id: i64) {
        let mut inner = self.inner.lock();
        inner.map.remove(&task_id);
        inner.order.retain(|id| *id != task_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskInfoCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

fn touch(order: &mut VecDeque<i64>, task_id: i64) {
    order.retain(|id| *id != task_id);
    order.push_back(task_id);
}
