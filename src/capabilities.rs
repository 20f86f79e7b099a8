//! Capability interfaces consumed from external collaborators.
//!
//! The authorization subsystem and the post-processing machinery live
//! outside this core; these seams are everything it knows about them.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{TaskDefinition, TaskInfo};

/// Grants the access-control placeholder for a freshly submitted task so
/// operators can query it immediately.
#[async_trait]
pub trait PermissionGranter: Send + Sync {
    async fn grant_access(&self, task_id: i64) -> Result<()>;
}

/// Permission granter for deployments without an ACL subsystem.
pub struct NoopPermissionGranter;

#[async_trait]
impl PermissionGranter for NoopPermissionGranter {
    async fn grant_access(&self, _task_id: i64) -> Result<()> {
        Ok(())
    }
}

/// Decides whether a fully drained task needs a post-processing phase
/// before it can be considered done.
#[async_trait]
pub trait PostProcessingEvaluator: Send + Sync {
    async fn needs_post_processing(
        &self,
        task: &TaskInfo,
        definition: &TaskDefinition,
    ) -> Result<bool>;
}

/// Evaluator for topologies that never post-process.
pub struct NeverPostProcess;

#[async_trait]
impl PostProcessingEvaluator for NeverPostProcess {
    async fn needs_post_processing(
        &self,
        _task: &TaskInfo,
        _definition: &TaskDefinition,
    ) -> Result<bool> {
        Ok(false)
    }
}
