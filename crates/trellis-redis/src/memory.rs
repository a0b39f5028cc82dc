//! # In-Memory Store Backend
//!
//! A hermetic interpreter for the store op vocabulary, used by tests and
//! local development. Mirrors Redis reply semantics closely enough that the
//! validate/exec transaction behaves identically on both backends: validation
//! ops apply immediately (including mutating ones), exec ops run only when
//! every check passed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::error::StoreResult;
use crate::ops::{StoreOp, Transaction};

#[derive(Debug, Default)]
struct MemoryState {
    sets: HashMap<String, HashSet<String>>,
    sorted_sets: HashMap<String, BTreeMap<String, i64>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl MemoryState {
    /// Apply one op and return its reply in Redis terms.
    fn apply(&mut self, op: &StoreOp) -> Value {
        match op {
            StoreOp::SetAdd { key, member } => {
                let inserted = self.sets.entry(key.clone()).or_default().insert(member.clone());
                json!(if inserted { 1 } else { 0 })
            }
            StoreOp::SetRemove { key, member } => {
                let removed = self
                    .sets
                    .get_mut(key)
                    .map(|s| s.remove(member))
                    .unwrap_or(false);
                json!(if removed { 1 } else { 0 })
            }
            StoreOp::SortedSetAdd { key, score, member } => {
                let added = self
                    .sorted_sets
                    .entry(key.clone())
                    .or_default()
                    .insert(member.clone(), *score)
                    .is_none();
                json!(if added { 1 } else { 0 })
            }
            StoreOp::SortedSetRemove { key, member } => {
                let removed = self
                    .sorted_sets
                    .get_mut(key)
                    .map(|s| s.remove(member).is_some())
                    .unwrap_or(false);
                json!(if removed { 1 } else { 0 })
            }
            StoreOp::HashSet { key, field, value } => {
                let added = self
                    .hashes
                    .entry(key.clone())
                    .or_default()
                    .insert(field.clone(), value.clone())
                    .is_none();
                json!(if added { 1 } else { 0 })
            }
            StoreOp::HashIncrBy { key, field, delta } => {
                let entry = self.hashes.entry(key.clone()).or_default();
                let current = entry
                    .get(field)
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(0);
                let next = current + delta;
                entry.insert(field.clone(), next.to_string());
                json!(next)
            }
            StoreOp::HashGet { key, field } => self
                .hashes
                .get(key)
                .and_then(|h| h.get(field))
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null),
        }
    }
}

/// In-memory store backend, shared across clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Millisecond wall clock. The in-memory store has no server to ask, so
    /// the local clock stands in for it.
    pub fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Evaluate a transaction: run checks in order, stop on the first
    /// mismatch, run exec ops only if all checks passed.
    pub fn eval(&self, tx: &Transaction) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        for check in &tx.validate {
            let reply = state.apply(&check.op);
            if reply != check.expected {
                return Ok(false);
            }
        }
        for op in &tx.exec {
            state.apply(op);
        }
        Ok(true)
    }

    pub fn hash_get_all(&self, key: &str) -> StoreResult<Option<HashMap<String, String>>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        Ok(state.hashes.get(key).filter(|h| !h.is_empty()).cloned())
    }

    /// Members with score <= `max`, ordered by score then member, capped at
    /// `limit`. Matches `ZRANGEBYSCORE key -inf max LIMIT 0 limit`.
    pub fn sorted_set_range_by_score(
        &self,
        key: &str,
        max: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let Some(members) = state.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };

        let mut due: Vec<(i64, &String)> = members
            .iter()
            .filter(|(_, score)| **score <= max)
            .map(|(member, score)| (*score, member))
            .collect();
        due.sort();
        Ok(due.into_iter().take(limit).map(|(_, m)| m.clone()).collect())
    }

    pub fn sorted_set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let Some(members) = state.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };
        let mut all: Vec<(i64, &String)> = members.iter().map(|(m, s)| (*s, m)).collect();
        all.sort();
        Ok(all.into_iter().map(|(_, m)| m.clone()).collect())
    }

    /// Remove a key outright, whatever its type. Janitor-style removal; the
    /// engine's own transitions never delete keys.
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let existed = state.sets.remove(key).is_some()
            | state.sorted_sets.remove(key).is_some()
            | state.hashes.remove(key).is_some();
        Ok(existed)
    }

    pub fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let mut members: Vec<String> = state
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Check;

    fn backend() -> MemoryBackend {
        MemoryBackend::new()
    }

    #[test]
    fn test_exec_only_transaction_applies_all_ops() {
        let store = backend();
        let mut tx = Transaction::new();
        tx.run(StoreOp::HashSet {
            key: "q:t1".into(),
            field: "state".into(),
            value: "\"waiting\"".into(),
        });
        tx.run(StoreOp::SetAdd {
            key: "q:waiting".into(),
            member: "t1".into(),
        });

        assert!(store.eval(&tx).unwrap());
        assert_eq!(store.set_members("q:waiting").unwrap(), vec!["t1"]);
        let record = store.hash_get_all("q:t1").unwrap().unwrap();
        assert_eq!(record["state"], "\"waiting\"");
    }

    #[test]
    fn test_failed_check_withholds_exec() {
        let store = backend();
        let mut tx = Transaction::new();
        tx.check(Check::count(
            1,
            StoreOp::SortedSetRemove {
                key: "q:p:commands_locked".into(),
                member: "cmd".into(),
            },
        ));
        tx.run(StoreOp::SetAdd {
            key: "q:idle".into(),
            member: "t1".into(),
        });

        // Nothing is locked, so the removal count is 0 and the check fails.
        assert!(!store.eval(&tx).unwrap());
        assert!(store.set_members("q:idle").unwrap().is_empty());
    }

    #[test]
    fn test_racing_removals_validate_exactly_once() {
        let store = backend();
        let mut seed = Transaction::new();
        seed.run(StoreOp::SortedSetAdd {
            key: "q:p:commands_locked".into(),
            score: 1,
            member: "cmd".into(),
        });
        store.eval(&seed).unwrap();

        let mut tx = Transaction::new();
        tx.check(Check::count(
            1,
            StoreOp::SortedSetRemove {
                key: "q:p:commands_locked".into(),
                member: "cmd".into(),
            },
        ));
        tx.run(StoreOp::SetAdd {
            key: "q:winners".into(),
            member: "w".into(),
        });

        let first = store.eval(&tx).unwrap();
        let second = store.eval(&tx).unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(store.set_members("q:winners").unwrap().len(), 1);
    }

    #[test]
    fn test_hash_incr_by_on_json_encoded_counter() {
        let store = backend();
        let mut seed = Transaction::new();
        seed.run(StoreOp::HashSet {
            key: "q:t1".into(),
            field: "children_finished".into(),
            value: "0".into(),
        });
        seed.run(StoreOp::HashIncrBy {
            key: "q:t1".into(),
            field: "children_finished".into(),
            delta: 1,
        });
        store.eval(&seed).unwrap();

        let record = store.hash_get_all("q:t1").unwrap().unwrap();
        assert_eq!(record["children_finished"], "1");
    }

    #[test]
    fn test_range_by_score_orders_and_limits() {
        let store = backend();
        let mut seed = Transaction::new();
        for (score, member) in [(30, "c"), (10, "a"), (20, "b")] {
            seed.run(StoreOp::SortedSetAdd {
                key: "q:p:commands".into(),
                score,
                member: member.into(),
            });
        }
        store.eval(&seed).unwrap();

        let due = store.sorted_set_range_by_score("q:p:commands", 25, 10).unwrap();
        assert_eq!(due, vec!["a", "b"]);
        let capped = store.sorted_set_range_by_score("q:p:commands", 100, 1).unwrap();
        assert_eq!(capped, vec!["a"]);
    }

    #[test]
    fn test_sorted_set_add_is_idempotent_per_member() {
        let store = backend();
        let mut tx = Transaction::new();
        tx.run(StoreOp::SortedSetAdd {
            key: "q:p:commands".into(),
            score: 5,
            member: "check".into(),
        });
        tx.run(StoreOp::SortedSetAdd {
            key: "q:p:commands".into(),
            score: 9,
            member: "check".into(),
        });
        store.eval(&tx).unwrap();

        // Same canonical member coalesces; the later score wins.
        assert_eq!(store.sorted_set_members("q:p:commands").unwrap(), vec!["check"]);
        assert!(store
            .sorted_set_range_by_score("q:p:commands", 8, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_hash_get_missing_field_is_null() {
        let store = backend();
        let mut tx = Transaction::new();
        tx.check(Check {
            expected: Value::Null,
            op: StoreOp::HashGet {
                key: "q:absent".into(),
                field: "state".into(),
            },
        });
        assert!(store.eval(&tx).unwrap());
    }
}
