//! # Store Key Layout
//!
//! Every durable key the engine touches, derived from one configured prefix:
//!
//! - `{prefix}{id}` — task record hash
//! - `{prefix}waiting`, `{prefix}idle` — sets of task ids by state
//! - `{prefix}finished` — sorted set of task ids, score = removal deadline
//! - `{prefix}{pool}:commands` — sorted set of canonical commands, score = enqueue ms
//! - `{prefix}{pool}:commands_locked` — canonical commands claimed by a worker

use crate::record::TaskState;

/// Key derivation for one queue namespace.
#[derive(Debug, Clone)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Task record hash key.
    pub fn task(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// State membership key: plain set for `waiting`/`idle`, sorted set for
    /// `finished` (scored by removal deadline).
    pub fn state_set(&self, state: TaskState) -> String {
        format!("{}{}", self.prefix, state.as_str())
    }

    /// Pending commands sorted set for a pool.
    pub fn commands(&self, pool: &str) -> String {
        format!("{}{}:commands", self.prefix, pool)
    }

    /// Claimed-but-unprocessed commands sorted set for a pool.
    pub fn commands_locked(&self, pool: &str) -> String {
        format!("{}{}:commands_locked", self.prefix, pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = Keyspace::new("trellis:");
        assert_eq!(keys.task("t1"), "trellis:t1");
        assert_eq!(keys.state_set(TaskState::Waiting), "trellis:waiting");
        assert_eq!(keys.state_set(TaskState::Finished), "trellis:finished");
        assert_eq!(keys.commands("default"), "trellis:default:commands");
        assert_eq!(
            keys.commands_locked("default"),
            "trellis:default:commands_locked"
        );
    }
}
