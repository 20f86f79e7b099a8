//! Record enumeration seam.
//!
//! Harvesting details (OAI-PMH paging, dataset traversal, file listings)
//! live outside this core; a topology plugs in a [`RecordEnumerator`] that
//! lazily yields the record identifiers belonging to a task definition.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::models::TaskDefinition;

/// One record identifier yielded during enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordIdentifier {
    pub record_id: String,
    #[serde(default)]
    pub metadata_prefix: Option<String>,
    #[serde(default)]
    pub marked_as_deleted: bool,
}

impl RecordIdentifier {
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            metadata_prefix: None,
            marked_as_deleted: false,
        }
    }

    pub fn deleted(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            metadata_prefix: None,
            marked_as_deleted: true,
        }
    }
}

/// Lazily enumerates the records belonging to a task.
///
/// Enumeration may be paged or effectively unbounded; after a crash the
/// same enumerator may re-yield identifiers it already produced, which the
/// consumer-side dedup absorbs.
#[async_trait]
pub trait RecordEnumerator: Send + Sync {
    /// Record count when the topology can know it cheaply upfront;
    /// `None` for unknown-size sources.
    async fn expected_count(&self, definition: &TaskDefinition) -> Result<Option<u64>>;

    /// Stream of record identifiers for the task.
    async fn enumerate(
        &self,
        definition: &TaskDefinition,
    ) -> Result<BoxStream<'static, Result<RecordIdentifier>>>;
}

/// Enumerator over an explicit record list carried in the task definition
/// (`input.records`). The simplest production enumerator: the caller
/// already knows every record id.
pub struct StaticRecordListEnumerator;

impl StaticRecordListEnumerator {
    fn records(definition: &TaskDefinition) -> Result<Vec<RecordIdentifier>> {
        let records = definition
            .input
            .get("records")
            .ok_or_else(|| {
                CoreError::configuration(format!(
                    "Task {} definition has no records list",
                    definition.task_id
                ))
            })?
            .clone();
        Ok(serde_json::from_value(records)?)
    }
}

#[async_trait]
impl RecordEnumerator for StaticRecordListEnumerator {
    async fn expected_count(&self, definition: &TaskDefinition) -> Result<Option<u64>> {
        Ok(Some(Self::records(definition)?.len() as u64))
    }

    async fn enumerate(
        &self,
        definition: &TaskDefinition,
    ) -> Result<BoxStream<'static, Result<RecordIdentifier>>> {
        let records = Self::records(definition)?;
        Ok(stream::iter(records.into_iter().map(Ok)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition_with_records() -> TaskDefinition {
        TaskDefinition::new(1, "transform").with_input(serde_json::json!({
            "records": [
                {"record_id": "r-1", "metadata_prefix": "edm"},
                {"record_id": "r-2", "marked_as_deleted": true},
            ]
        }))
    }

    #[tokio::test]
    async fn test_static_list_enumeration() {
        let enumerator = StaticRecordListEnumerator;
        let definition = definition_with_records();

        assert_eq!(
            enumerator.expected_count(&definition).await.unwrap(),
            Some(2)
        );

        let identifiers: Vec<_> = enumerator
            .enumerate(&definition)
            .await
            .unwrap()
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(identifiers[0].record_id, "r-1");
        assert_eq!(identifiers[0].metadata_prefix.as_deref(), Some("edm"));
        assert!(identifiers[1].marked_as_deleted);
    }

    #[tokio::test]
    async fn test_missing_records_list_is_an_error() {
        let enumerator = StaticRecordListEnumerator;
        let definition = TaskDefinition::new(2, "transform");
        assert!(enumerator.expected_count(&definition).await.is_err());
    }
}
