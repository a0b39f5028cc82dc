//! # Store Operations and Transactions
//!
//! The op vocabulary shared by every backend: plain set add/remove, sorted-set
//! add/remove, and hash set/get/increment. A [`Transaction`] bundles a list of
//! validation checks with a list of exec ops; the backend runs the checks in
//! order, compares each reply to its expected value under JSON equality, and
//! performs the exec ops only if every check passed.
//!
//! ## Wire form
//!
//! Ops serialize to the JSON array form consumed by the transaction script:
//! `["zadd", key, score, member]`, `["hget", key, field]`, and so on. The
//! whole transaction travels as one JSON document
//! `{"validate": [[expected, op], ...], "exec": [op, ...]}`.
//!
//! ## Mutating checks
//!
//! Validation ops are not restricted to reads. Callers conventionally place a
//! `SortedSetRemove` of their claimed command as the first check with expected
//! reply `1`: of all workers racing on the same command, exactly one observes
//! the removal succeed, and the losers' transactions stop before any exec op
//! runs. A check that mutates is applied immediately, exactly as the Lua
//! script applies it; only the exec section is withheld on failure.

use serde_json::{json, Value};

/// A single store operation, expressible against both backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// `SADD key member`
    SetAdd { key: String, member: String },
    /// `SREM key member`
    SetRemove { key: String, member: String },
    /// `ZADD key score member`
    SortedSetAdd {
        key: String,
        score: i64,
        member: String,
    },
    /// `ZREM key member`
    SortedSetRemove { key: String, member: String },
    /// `HSET key field value`
    HashSet {
        key: String,
        field: String,
        value: String,
    },
    /// `HINCRBY key field delta`
    HashIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    /// `HGET key field`
    HashGet { key: String, field: String },
}

impl StoreOp {
    /// Encode as the JSON array form consumed by the transaction script.
    pub fn to_wire(&self) -> Value {
        match self {
            StoreOp::SetAdd { key, member } => json!(["sadd", key, member]),
            StoreOp::SetRemove { key, member } => json!(["srem", key, member]),
            StoreOp::SortedSetAdd { key, score, member } => json!(["zadd", key, score, member]),
            StoreOp::SortedSetRemove { key, member } => json!(["zrem", key, member]),
            StoreOp::HashSet { key, field, value } => json!(["hset", key, field, value]),
            StoreOp::HashIncrBy { key, field, delta } => json!(["hincrby", key, field, delta]),
            StoreOp::HashGet { key, field } => json!(["hget", key, field]),
        }
    }
}

/// One validation entry: run `op`, require its reply to equal `expected`.
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub expected: Value,
    pub op: StoreOp,
}

impl Check {
    /// Expect an integer reply, e.g. a removal count.
    pub fn count(expected: i64, op: StoreOp) -> Self {
        Self {
            expected: json!(expected),
            op,
        }
    }

    /// Expect a hash field to hold exactly `stored` (the raw stored string,
    /// which for task records is the JSON encoding of the field value).
    pub fn field_equals(key: impl Into<String>, field: impl Into<String>, stored: String) -> Self {
        Self {
            expected: Value::String(stored),
            op: StoreOp::HashGet {
                key: key.into(),
                field: field.into(),
            },
        }
    }
}

/// A validate-then-execute transaction evaluated atomically by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub validate: Vec<Check>,
    pub exec: Vec<StoreOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a validation check.
    pub fn check(&mut self, check: Check) -> &mut Self {
        self.validate.push(check);
        self
    }

    /// Append an exec op.
    pub fn run(&mut self, op: StoreOp) -> &mut Self {
        self.exec.push(op);
        self
    }

    /// Encode as the single JSON document of the script ABI.
    pub fn to_wire(&self) -> Value {
        let validate: Vec<Value> = self
            .validate
            .iter()
            .map(|c| json!([c.expected, c.op.to_wire()]))
            .collect();
        let exec: Vec<Value> = self.exec.iter().map(StoreOp::to_wire).collect();
        json!({ "validate": validate, "exec": exec })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_wire_forms() {
        let op = StoreOp::SortedSetAdd {
            key: "q:commands".to_string(),
            score: 1700000000000,
            member: "{\"to\":\"t1\"}".to_string(),
        };
        assert_eq!(
            op.to_wire(),
            json!(["zadd", "q:commands", 1700000000000i64, "{\"to\":\"t1\"}"])
        );

        let op = StoreOp::HashIncrBy {
            key: "q:t1".to_string(),
            field: "children_finished".to_string(),
            delta: 1,
        };
        assert_eq!(op.to_wire(), json!(["hincrby", "q:t1", "children_finished", 1]));
    }

    #[test]
    fn test_transaction_wire_document() {
        let mut tx = Transaction::new();
        tx.check(Check::count(
            1,
            StoreOp::SortedSetRemove {
                key: "q:p:commands_locked".to_string(),
                member: "cmd".to_string(),
            },
        ));
        tx.run(StoreOp::HashSet {
            key: "q:t1".to_string(),
            field: "state".to_string(),
            value: "\"idle\"".to_string(),
        });

        let wire = tx.to_wire();
        assert_eq!(
            wire,
            json!({
                "validate": [[1, ["zrem", "q:p:commands_locked", "cmd"]]],
                "exec": [["hset", "q:t1", "state", "\"idle\""]],
            })
        );
    }

    #[test]
    fn test_field_equals_expects_raw_stored_string() {
        let check = Check::field_equals("q:t1", "state", "\"waiting\"".to_string());
        assert_eq!(check.expected, Value::String("\"waiting\"".to_string()));
    }
}
