//! # TaskStore Domain Facade
//!
//! Task-level operations over a [`StoreBackend`]: record reads, transaction
//! evaluation, and the command-queue verbs (enqueue, claim, discard,
//! requeue). Wraps the backend enum behind an `Arc` so clones are cheap and
//! every worker shares one connection.
//!
//! ## Claiming is not locking
//!
//! `claim_command` copies a command into `{pool}:commands_locked` and drops
//! it from `{pool}:commands`. Two workers may both believe they hold the same
//! command; that is by contract. Mutual exclusion happens later, in the
//! handler's transaction, whose first validate entry removes the canonical
//! command from the locked set and requires the removal count to be 1.

use std::sync::Arc;

use tracing::warn;

use crate::command::Command;
use crate::errors::QueueResult;
use crate::keys::Keyspace;
use crate::record::{fields, TaskRecord, TaskState};
use trellis_redis::{Check, StoreBackend, StoreOp, Transaction};

/// Task-level store operations shared by every engine component.
#[derive(Debug, Clone)]
pub struct TaskStore {
    backend: Arc<StoreBackend>,
    keys: Keyspace,
}

impl TaskStore {
    pub fn new(backend: Arc<StoreBackend>, keys: Keyspace) -> Self {
        Self { backend, keys }
    }

    pub fn keys(&self) -> &Keyspace {
        &self.keys
    }

    pub fn backend(&self) -> &Arc<StoreBackend> {
        &self.backend
    }

    /// Millisecond clock read from the store, not the local host.
    pub async fn now(&self) -> QueueResult<i64> {
        Ok(self.backend.now_ms().await?)
    }

    /// Load one task record; `None` if the key does not exist.
    pub async fn get_task(&self, id: &str) -> QueueResult<Option<TaskRecord>> {
        let Some(map) = self.backend.hash_get_all(&self.keys.task(id)).await? else {
            return Ok(None);
        };
        Ok(Some(TaskRecord::from_fields(id, &map)?))
    }

    /// Load many records, aligned with `ids`, `None` for absent entries.
    pub async fn get_tasks(&self, ids: &[String]) -> QueueResult<Vec<Option<TaskRecord>>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            records.push(self.get_task(id).await?);
        }
        Ok(records)
    }

    /// Evaluate a validate/exec transaction. Returns whether it validated.
    pub async fn eval(&self, tx: &Transaction) -> QueueResult<bool> {
        Ok(self.backend.eval(tx).await?)
    }

    /// Run exec-only ops atomically (no validation).
    pub async fn apply(&self, ops: Vec<StoreOp>) -> QueueResult<()> {
        let tx = Transaction {
            validate: Vec::new(),
            exec: ops,
        };
        self.backend.eval(&tx).await?;
        Ok(())
    }

    // =========================================================================
    // Command queue
    // =========================================================================

    /// The op that enqueues `command` on `pool` at `at_ms`, for inclusion in
    /// a handler's transaction.
    pub fn enqueue_command_op(
        &self,
        pool: &str,
        command: &Command,
        at_ms: i64,
    ) -> QueueResult<StoreOp> {
        Ok(StoreOp::SortedSetAdd {
            key: self.keys.commands(pool),
            score: at_ms,
            member: command.canonical()?,
        })
    }

    /// Enqueue a command immediately (outside any handler transaction).
    pub async fn enqueue_command(&self, pool: &str, command: &Command, at_ms: i64) -> QueueResult<()> {
        let op = self.enqueue_command_op(pool, command, at_ms)?;
        self.apply(vec![op]).await
    }

    /// Commands on `pool` due at or before `now_ms`, parsed, capped at
    /// `limit`. A member that fails to parse is dropped from the queue so it
    /// cannot poison every later poll.
    pub async fn due_commands(
        &self,
        pool: &str,
        now_ms: i64,
        limit: usize,
    ) -> QueueResult<Vec<(Command, String)>> {
        let raw = self
            .backend
            .sorted_set_range_by_score(&self.keys.commands(pool), now_ms, limit)
            .await?;

        let mut due = Vec::with_capacity(raw.len());
        for canonical in raw {
            match Command::parse(&canonical) {
                Ok(command) => due.push((command, canonical)),
                Err(e) => {
                    warn!(pool = %pool, raw = %canonical, error = %e, "Dropping unparseable command");
                    self.apply(vec![StoreOp::SortedSetRemove {
                        key: self.keys.commands(pool),
                        member: canonical,
                    }])
                    .await?;
                }
            }
        }
        Ok(due)
    }

    /// Claim a command: copy into the locked set, drop from the pending set.
    /// Deliberately non-exclusive; see the module docs.
    pub async fn claim_command(&self, pool: &str, canonical: &str, now_ms: i64) -> QueueResult<()> {
        self.apply(vec![
            StoreOp::SortedSetAdd {
                key: self.keys.commands_locked(pool),
                score: now_ms,
                member: canonical.to_string(),
            },
            StoreOp::SortedSetRemove {
                key: self.keys.commands(pool),
                member: canonical.to_string(),
            },
        ])
        .await
    }

    /// Drop a claimed command without effecting any transition (stale uid,
    /// absent target, early group check).
    pub async fn discard_locked(&self, pool: &str, canonical: &str) -> QueueResult<()> {
        self.apply(vec![StoreOp::SortedSetRemove {
            key: self.keys.commands_locked(pool),
            member: canonical.to_string(),
        }])
        .await
    }

    /// Move a claimed command back to the pending set for redelivery at
    /// `at_ms` (handler I/O failure before its transaction was submitted).
    pub async fn requeue_locked(&self, pool: &str, canonical: &str, at_ms: i64) -> QueueResult<()> {
        self.apply(vec![
            StoreOp::SortedSetAdd {
                key: self.keys.commands(pool),
                score: at_ms,
                member: canonical.to_string(),
            },
            StoreOp::SortedSetRemove {
                key: self.keys.commands_locked(pool),
                member: canonical.to_string(),
            },
        ])
        .await
    }

    /// The mutual-exclusion check every handler transaction leads with:
    /// removing this command from the locked set must succeed exactly once.
    pub fn locked_removal_check(&self, pool: &str, canonical: &str) -> Check {
        Check::count(
            1,
            StoreOp::SortedSetRemove {
                key: self.keys.commands_locked(pool),
                member: canonical.to_string(),
            },
        )
    }

    /// Guard that the live record still holds `state`.
    pub fn state_check(&self, id: &str, state: TaskState) -> Check {
        Check::field_equals(self.keys.task(id), fields::STATE, state.stored())
    }

    // =========================================================================
    // Records and state membership
    // =========================================================================

    /// Ops persisting a freshly prepared record: all serializable fields plus
    /// membership in its state set (always `waiting` at insert).
    pub fn record_insert_ops(&self, record: &TaskRecord) -> QueueResult<Vec<StoreOp>> {
        let mut ops = record.field_writes(&self.keys.task(&record.id))?;
        ops.push(StoreOp::SetAdd {
            key: self.keys.state_set(record.state),
            member: record.id.clone(),
        });
        Ok(ops)
    }

    /// Delete a task record outright, the way the janitor (or a cancelling
    /// host) does. Engine handlers never call this; they treat a vanished
    /// record as an observed fact, not an action.
    pub async fn delete_task(&self, id: &str) -> QueueResult<bool> {
        Ok(self.backend.delete(&self.keys.task(id)).await?)
    }

    /// Ids currently in a state. `finished` reads the sorted set.
    pub async fn state_members(&self, state: TaskState) -> QueueResult<Vec<String>> {
        let key = self.keys.state_set(state);
        let members = match state {
            TaskState::Finished => self.backend.sorted_set_members(&key).await?,
            _ => self.backend.set_members(&key).await?,
        };
        Ok(members)
    }

    /// Pending canonical commands on a pool, in score order.
    pub async fn pending_commands(&self, pool: &str) -> QueueResult<Vec<String>> {
        Ok(self
            .backend
            .sorted_set_members(&self.keys.commands(pool))
            .await?)
    }

    /// Claimed canonical commands on a pool.
    pub async fn locked_commands(&self, pool: &str) -> QueueResult<Vec<String>> {
        Ok(self
            .backend
            .sorted_set_members(&self.keys.commands_locked(pool))
            .await?)
    }
}
