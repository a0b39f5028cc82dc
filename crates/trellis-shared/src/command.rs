//! # Command Envelope
//!
//! The addressed message consumed by exactly one task handler:
//! `{to, to_uid, type, data}`. The canonical JSON encoding doubles as the
//! command's identity in the store's sorted sets, which makes it the locking
//! token of the whole engine — so the encoding must be byte-stable.
//!
//! `serde_json` serializes struct fields in declaration order and uses a
//! fixed escaping scheme, so equal commands always produce equal canonical
//! strings. Field order here (`to`, `to_uid`, `type`, `data`) is part of the
//! wire contract; do not reorder.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::QueueResult;

/// Command types on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// Start the target task.
    Activate,
    /// A child reports successful completion; `data.result` is optional.
    Result,
    /// A child reports failure; `data.error` carries the payload.
    Error,
    /// A group asks itself to re-check whether all children have reported.
    GroupCheck,
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommandType::Activate => "activate",
            CommandType::Result => "result",
            CommandType::Error => "error",
            CommandType::GroupCheck => "group_check",
        };
        f.write_str(name)
    }
}

/// Optional payload on `result` / `error` commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandData {
    /// Task id of the sender (the reporting child).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// An addressed message consumed by exactly one task handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub to: String,
    pub to_uid: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<CommandData>,
}

impl Command {
    pub fn activate(to: impl Into<String>, to_uid: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            to_uid: to_uid.into(),
            command_type: CommandType::Activate,
            data: None,
        }
    }

    pub fn result(
        to: impl Into<String>,
        to_uid: impl Into<String>,
        from_id: impl Into<String>,
        result: Option<Value>,
    ) -> Self {
        Self {
            to: to.into(),
            to_uid: to_uid.into(),
            command_type: CommandType::Result,
            data: Some(CommandData {
                id: Some(from_id.into()),
                result,
                error: None,
            }),
        }
    }

    pub fn error(
        to: impl Into<String>,
        to_uid: impl Into<String>,
        from_id: impl Into<String>,
        error: Value,
    ) -> Self {
        Self {
            to: to.into(),
            to_uid: to_uid.into(),
            command_type: CommandType::Error,
            data: Some(CommandData {
                id: Some(from_id.into()),
                result: None,
                error: Some(error),
            }),
        }
    }

    pub fn group_check(to: impl Into<String>, to_uid: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            to_uid: to_uid.into(),
            command_type: CommandType::GroupCheck,
            data: None,
        }
    }

    /// The canonical byte form used as this command's identity in store sets.
    pub fn canonical(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a canonical string back into a command.
    pub fn parse(raw: &str) -> QueueResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The result carried by this command, if any.
    pub fn carried_result(&self) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.result.as_ref())
    }

    /// The error carried by this command, if any.
    pub fn carried_error(&self) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.error.as_ref())
    }
}
