//! # Queue Error Types
//!
//! Unified error handling for the Trellis engine, plus the serializable
//! error payload that travels on `error` commands and is persisted on failed
//! task records.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Queue operation result type
pub type QueueResult<T> = Result<T, QueueError>;

/// Error types for engine operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Store operation failed: {0}")]
    Store(#[from] trellis_redis::StoreError),

    #[error("JSON serialization/deserialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load configuration file: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Composite task '{task_name}' prepared with no children")]
    NoChildren { task_name: String },

    #[error("Unknown template: {name}")]
    UnknownTemplate { name: String },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Malformed task record at {task_id}: {reason}")]
    MalformedRecord { task_id: String, reason: String },
}

impl QueueError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a no-children preparation error
    pub fn no_children(task_name: impl Into<String>) -> Self {
        Self::NoChildren {
            task_name: task_name.into(),
        }
    }

    /// Create a malformed-record error
    pub fn malformed_record(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            task_id: task_id.into(),
            reason: reason.into(),
        }
    }
}

/// The error payload persisted on a failed task record and carried by
/// `error` commands. Kept deliberately small: a message plus optional
/// structured data supplied by the failing leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
        }
    }

    /// JSON form for persistence and command payloads.
    pub fn to_value(&self) -> Value {
        let mut value = json!({ "message": self.message });
        if let Some(data) = &self.data {
            value["data"] = data.clone();
        }
        value
    }
}
