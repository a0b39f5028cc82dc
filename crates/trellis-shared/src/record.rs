//! # Task Record
//!
//! The persisted form of a task: a store hash mapping field name to
//! JSON-encoded value, living under `{prefix}{id}`. The codec here is the
//! single place that knows the field names and their encodings; handlers and
//! transactions go through it so the wire layout stays in one file.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{QueueError, QueueResult};
use trellis_redis::StoreOp;

/// Hash field names of the task record.
pub mod fields {
    pub const STATE: &str = "state";
    pub const ARGS: &str = "args";
    pub const CHILDREN: &str = "children";
    pub const CHILDREN_FINISHED: &str = "children_finished";
    pub const TOTAL: &str = "total";
    pub const PROGRESS: &str = "progress";
    pub const RESULT: &str = "result";
    pub const ERROR: &str = "error";
    pub const POOL: &str = "pool";
    pub const PARENT: &str = "parent";
    pub const PARENT_POOL: &str = "parent_pool";
    pub const PARENT_UID: &str = "parent_uid";
    pub const REMOVE_DELAY: &str = "removeDelay";
    pub const NAME: &str = "name";
    pub const UID: &str = "uid";
    pub const USER_DATA: &str = "user_data";
}

/// Task lifecycle states. Transitions go `waiting → idle → finished` once
/// each; there are no back-edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Waiting,
    Idle,
    Finished,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Idle => "idle",
            TaskState::Finished => "finished",
        }
    }

    /// The raw stored form of this state (hash field values are JSON).
    pub fn stored(&self) -> String {
        format!("\"{}\"", self.as_str())
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A child's reference to its parent: id + pool + uid, enough to address a
/// `result`/`error` command upward. A relation, never ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub id: String,
    pub pool: String,
    pub uid: String,
}

/// In-memory copy of one persisted task record. Re-read from the store on
/// every command; never held across suspension points as authoritative state.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    /// Key suffix under the queue prefix; not itself a hash field.
    pub id: String,
    pub uid: String,
    pub name: String,
    pub pool: String,
    pub state: TaskState,
    pub args: Vec<Value>,
    pub children: Vec<String>,
    pub children_finished: u64,
    pub total: u64,
    pub progress: u64,
    pub result: Option<Value>,
    pub error: Option<Value>,
    pub parent: Option<ParentRef>,
    /// How long a finished record lingers before the janitor may remove it.
    pub remove_delay_ms: i64,
    pub user_data: Value,
}

fn parse_field<T: DeserializeOwned>(
    id: &str,
    map: &HashMap<String, String>,
    field: &str,
) -> QueueResult<Option<T>> {
    match map.get(field) {
        None => Ok(None),
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| QueueError::malformed_record(id, format!("field '{field}': {e}"))),
    }
}

fn require_field<T: DeserializeOwned>(
    id: &str,
    map: &HashMap<String, String>,
    field: &str,
) -> QueueResult<T> {
    parse_field(id, map, field)?
        .ok_or_else(|| QueueError::malformed_record(id, format!("missing field '{field}'")))
}

impl TaskRecord {
    /// Decode a record from its raw hash fields.
    pub fn from_fields(id: impl Into<String>, map: &HashMap<String, String>) -> QueueResult<Self> {
        let id = id.into();

        let parent = match parse_field::<String>(&id, map, fields::PARENT)? {
            Some(parent_id) => Some(ParentRef {
                id: parent_id,
                pool: require_field(&id, map, fields::PARENT_POOL)?,
                uid: require_field(&id, map, fields::PARENT_UID)?,
            }),
            None => None,
        };

        Ok(Self {
            uid: require_field(&id, map, fields::UID)?,
            name: require_field(&id, map, fields::NAME)?,
            pool: require_field(&id, map, fields::POOL)?,
            state: require_field(&id, map, fields::STATE)?,
            args: parse_field(&id, map, fields::ARGS)?.unwrap_or_default(),
            children: parse_field(&id, map, fields::CHILDREN)?.unwrap_or_default(),
            children_finished: parse_field(&id, map, fields::CHILDREN_FINISHED)?.unwrap_or(0),
            total: parse_field(&id, map, fields::TOTAL)?.unwrap_or(0),
            progress: parse_field(&id, map, fields::PROGRESS)?.unwrap_or(0),
            result: map
                .get(fields::RESULT)
                .map(|raw| serde_json::from_str(raw))
                .transpose()
                .map_err(|e| QueueError::malformed_record(&id, format!("field 'result': {e}")))?,
            error: map
                .get(fields::ERROR)
                .map(|raw| serde_json::from_str(raw))
                .transpose()
                .map_err(|e| QueueError::malformed_record(&id, format!("field 'error': {e}")))?,
            parent,
            remove_delay_ms: parse_field(&id, map, fields::REMOVE_DELAY)?.unwrap_or(0),
            user_data: parse_field(&id, map, fields::USER_DATA)?.unwrap_or(Value::Null),
            id,
        })
    }

    /// Hash writes that persist every serializable field of this record.
    /// `task_key` is the full store key (`{prefix}{id}`).
    pub fn field_writes(&self, task_key: &str) -> QueueResult<Vec<StoreOp>> {
        let mut ops = Vec::with_capacity(16);

        let mut put = |field: &str, raw: String| {
            ops.push(StoreOp::HashSet {
                key: task_key.to_string(),
                field: field.to_string(),
                value: raw,
            });
        };

        put(fields::UID, serde_json::to_string(&self.uid)?);
        put(fields::NAME, serde_json::to_string(&self.name)?);
        put(fields::POOL, serde_json::to_string(&self.pool)?);
        put(fields::STATE, self.state.stored());
        put(fields::ARGS, serde_json::to_string(&self.args)?);
        put(fields::CHILDREN, serde_json::to_string(&self.children)?);
        put(
            fields::CHILDREN_FINISHED,
            serde_json::to_string(&self.children_finished)?,
        );
        put(fields::TOTAL, serde_json::to_string(&self.total)?);
        put(fields::PROGRESS, serde_json::to_string(&self.progress)?);
        put(
            fields::REMOVE_DELAY,
            serde_json::to_string(&self.remove_delay_ms)?,
        );
        put(fields::USER_DATA, serde_json::to_string(&self.user_data)?);

        if let Some(result) = &self.result {
            put(fields::RESULT, serde_json::to_string(result)?);
        }
        if let Some(error) = &self.error {
            put(fields::ERROR, serde_json::to_string(error)?);
        }
        if let Some(parent) = &self.parent {
            put(fields::PARENT, serde_json::to_string(&parent.id)?);
            put(fields::PARENT_POOL, serde_json::to_string(&parent.pool)?);
            put(fields::PARENT_UID, serde_json::to_string(&parent.uid)?);
        }

        Ok(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> TaskRecord {
        TaskRecord {
            id: "t1".to_string(),
            uid: "u1".to_string(),
            name: "chain".to_string(),
            pool: "default".to_string(),
            state: TaskState::Waiting,
            args: vec![json!(1), json!("two")],
            children: vec!["c1".to_string(), "c2".to_string()],
            children_finished: 0,
            total: 2,
            progress: 0,
            result: None,
            error: None,
            parent: Some(ParentRef {
                id: "p1".to_string(),
                pool: "default".to_string(),
                uid: "pu1".to_string(),
            }),
            remove_delay_ms: 60_000,
            user_data: Value::Null,
        }
    }

    fn fields_of(record: &TaskRecord) -> HashMap<String, String> {
        record
            .field_writes("q:t1")
            .unwrap()
            .into_iter()
            .map(|op| match op {
                StoreOp::HashSet { field, value, .. } => (field, value),
                other => panic!("unexpected op: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_codec_round_trip() {
        let record = sample_record();
        let map = fields_of(&record);
        let decoded = TaskRecord::from_fields("t1", &map).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_fields_are_json_encoded() {
        let map = fields_of(&sample_record());
        assert_eq!(map["state"], "\"waiting\"");
        assert_eq!(map["children_finished"], "0");
        assert_eq!(map["args"], "[1,\"two\"]");
        assert_eq!(map["removeDelay"], "60000");
    }

    #[test]
    fn test_absent_result_field_decodes_as_none() {
        let map = fields_of(&sample_record());
        assert!(!map.contains_key("result"));
        let decoded = TaskRecord::from_fields("t1", &map).unwrap();
        assert!(decoded.result.is_none());
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        let mut map = fields_of(&sample_record());
        map.remove("state");
        let err = TaskRecord::from_fields("t1", &map).unwrap_err();
        assert!(matches!(err, QueueError::MalformedRecord { .. }));
    }

    #[test]
    fn test_parent_triple_round_trips() {
        let map = fields_of(&sample_record());
        assert_eq!(map["parent"], "\"p1\"");
        assert_eq!(map["parent_pool"], "\"default\"");
        assert_eq!(map["parent_uid"], "\"pu1\"");
    }

    #[test]
    fn test_state_stored_form() {
        assert_eq!(TaskState::Idle.stored(), "\"idle\"");
        assert_eq!(TaskState::Finished.to_string(), "finished");
    }
}
