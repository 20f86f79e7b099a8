//! # Error Types
//!
//! Structured error handling for the record-processing core using thiserror
//! for typed errors instead of `Box<dyn Error>` patterns.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage operation failed: {operation}: {message}")]
    Storage { operation: String, message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    Queue {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Task {task_id} not found")]
    TaskNotFound { task_id: i64 },

    #[error("Task {task_id} definition is not deserializable: {message}")]
    CorruptDefinition { task_id: i64, message: String },

    #[error("Submission of task {task_id} was killed")]
    SubmissionKilled { task_id: i64 },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    /// Create a storage error
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a queue error
    pub fn queue(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Queue {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later could succeed.
    ///
    /// Storage and queue failures are transient by contract (the backing
    /// store retries internally, the queue redelivers); everything else is
    /// permanent for the piece of work that produced it.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Queue { .. })
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::storage("query", err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<pgmq::errors::PgmqError> for CoreError {
    fn from(err: pgmq::errors::PgmqError) -> Self {
        CoreError::queue("unknown", "pgmq", err.to_string())
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;
