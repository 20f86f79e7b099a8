//! # Topology Registry
//!
//! Maps topology names to their record enumerators. Resolved once at
//! startup by the composition root; replaces any string-switch dispatch
//! between topology implementations.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::submitter::RecordEnumerator;

#[derive(Default)]
pub struct TopologyRegistry {
    enumerators: RwLock<HashMap<String, Arc<dyn RecordEnumerator>>>,
}

impl TopologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        topology_name: impl Into<String>,
        enumerator: Arc<dyn RecordEnumerator>,
    ) {
        self.enumerators
            .write()
            .insert(topology_name.into(), enumerator);
    }

    /// Resolve the enumerator for a topology. Submitting to an unknown
    /// topology is a configuration error, not a task failure.
    pub fn resolve(&self, topology_name: &str) -> Result<Arc<dyn RecordEnumerator>> {
        self.enumerators
            .read()
            .get(topology_name)
            .cloned()
            .ok_or_else(|| {
                CoreError::configuration(format!(
                    "No enumerator registered for topology {topology_name}"
                ))
            })
    }

    pub fn registered_topologies(&self) -> Vec<String> {
        let mut names: Vec<String> = self.enumerators.read().keys().cloned().collect();
        names.sort();
        names
    }
}
