//! # Group Composite
//!
//! Parallel orchestration: `activate` fans out to every child in one atomic
//! burst; each child's `result` increments `children_finished` and enqueues a
//! `group_check` back to the group itself; the check that observes the full
//! count gathers every child's result — in `children` order — and finishes.
//!
//! The two-step result→check protocol exists because "am I the last?" cannot
//! be decided in the incrementing transaction: that decision would hinge on
//! the pre-increment counter, a read-modify-write the optimistic validate
//! block cannot express. Incrementing now and re-entering through a fresh
//! command lets the completion decision run against a record re-read after
//! the final increment. All `group_check`s for one group share a canonical
//! form, so the pending set coalesces them and early checks discard cheaply.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use trellis_redis::{StoreOp, Transaction};
use trellis_shared::{
    fields, Command, CommandType, QueueResult, TaskError, TaskEvent, TaskOutcome, TaskRecord,
    TaskState,
};

use crate::composite::{
    finish_transition_ops, handle_child_error, idle_transition_ops, set_field_op,
};
use crate::context::EngineContext;

/// Error message persisted when a group completes over deleted children.
const CHILDREN_DELETED: &str = "terminating task because children deleted";

/// Drives group records through their state machine.
#[derive(Debug, Clone)]
pub struct GroupLifecycle {
    context: Arc<EngineContext>,
}

impl GroupLifecycle {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self { context }
    }

    /// Route one claimed command to its handler.
    pub async fn handle(
        &self,
        pool: &str,
        record: &TaskRecord,
        command: &Command,
    ) -> QueueResult<()> {
        match command.command_type {
            CommandType::Activate => self.handle_activate(pool, record, command).await,
            CommandType::Result => self.handle_result(pool, record, command).await,
            CommandType::GroupCheck => self.handle_group_check(pool, record, command).await,
            CommandType::Error => handle_child_error(&self.context, pool, record, command).await,
        }
    }

    /// `waiting → idle`, activating every currently-present child in the
    /// same transaction. A deleted child is skipped, not an error — its
    /// absence is accounted for at completion time.
    async fn handle_activate(
        &self,
        pool: &str,
        record: &TaskRecord,
        command: &Command,
    ) -> QueueResult<()> {
        let store = self.context.store();
        let canonical = command.canonical()?;

        if record.state != TaskState::Waiting {
            debug!(task_id = %record.id, state = %record.state, "Duplicate group activation; discarding");
            return store.discard_locked(pool, &canonical).await;
        }

        let children = store.get_tasks(&record.children).await?;
        let now = store.now().await?;

        let mut tx = Transaction::new();
        tx.check(store.locked_removal_check(pool, &canonical));
        tx.check(store.state_check(&record.id, TaskState::Waiting));
        for op in idle_transition_ops(store, record) {
            tx.run(op);
        }

        let mut activated = 0usize;
        for child in children.iter().flatten() {
            tx.run(store.enqueue_command_op(
                &child.pool,
                &Command::activate(&child.id, &child.uid),
                now,
            )?);
            activated += 1;
        }
        if activated < record.children.len() {
            debug!(
                task_id = %record.id,
                present = activated,
                expected = record.children.len(),
                "Some group children missing at activation"
            );
        }

        if !store.eval(&tx).await? {
            debug!(task_id = %record.id, "Lost group activation race");
        }
        Ok(())
    }

    /// A child finished: count it and schedule a completion check. The
    /// gathering itself happens in the check's own transaction.
    async fn handle_result(
        &self,
        pool: &str,
        record: &TaskRecord,
        command: &Command,
    ) -> QueueResult<()> {
        let store = self.context.store();
        let canonical = command.canonical()?;

        if record.state != TaskState::Idle {
            debug!(task_id = %record.id, state = %record.state, "Group result in non-idle state; discarding");
            return store.discard_locked(pool, &canonical).await;
        }

        let now = store.now().await?;
        let mut tx = Transaction::new();
        tx.check(store.locked_removal_check(pool, &canonical));
        tx.check(store.state_check(&record.id, TaskState::Idle));
        tx.run(StoreOp::HashIncrBy {
            key: store.keys().task(&record.id),
            field: fields::CHILDREN_FINISHED.to_string(),
            delta: 1,
        });
        tx.run(store.enqueue_command_op(
            &record.pool,
            &Command::group_check(&record.id, &record.uid),
            now,
        )?);

        if !store.eval(&tx).await? {
            debug!(task_id = %record.id, "Lost group increment race");
        }
        Ok(())
    }

    /// Completion check: a no-op unless every child has reported, then one
    /// terminal transaction gathering results or recording the integrity
    /// failure if any child record has vanished.
    async fn handle_group_check(
        &self,
        pool: &str,
        record: &TaskRecord,
        command: &Command,
    ) -> QueueResult<()> {
        let store = self.context.store();
        let canonical = command.canonical()?;

        if record.state != TaskState::Idle {
            debug!(task_id = %record.id, state = %record.state, "Group check in non-idle state; discarding");
            return store.discard_locked(pool, &canonical).await;
        }

        let child_count = record.children.len() as u64;
        if record.children_finished < child_count {
            // Early check; a later result will enqueue another.
            debug!(
                task_id = %record.id,
                children_finished = record.children_finished,
                children = child_count,
                "Group not yet complete; discarding check"
            );
            return store.discard_locked(pool, &canonical).await;
        }

        let children = store.get_tasks(&record.children).await?;
        let now = store.now().await?;

        let mut tx = Transaction::new();
        tx.check(store.locked_removal_check(pool, &canonical));
        tx.check(store.state_check(&record.id, TaskState::Idle));
        for op in finish_transition_ops(store, record, now) {
            tx.run(op);
        }

        match children.into_iter().collect::<Option<Vec<TaskRecord>>>() {
            None => {
                let error = TaskError::new(CHILDREN_DELETED).to_value();
                tx.run(set_field_op(store, &record.id, fields::ERROR, &error)?);
                if let Some(parent) = &record.parent {
                    tx.run(store.enqueue_command_op(
                        &parent.pool,
                        &Command::error(&parent.id, &parent.uid, &record.id, error.clone()),
                        now,
                    )?);
                }

                if store.eval(&tx).await? {
                    warn!(task_id = %record.id, "Group terminated over deleted children");
                    self.context.events().publish(TaskEvent {
                        task_id: record.id.clone(),
                        name: record.name.clone(),
                        outcome: TaskOutcome::Failed { error },
                    });
                } else {
                    debug!(task_id = %record.id, "Lost group failure race");
                }
            }
            Some(children) => {
                let results: Vec<Value> = children
                    .iter()
                    .map(|child| child.result.clone().unwrap_or(Value::Null))
                    .collect();
                let result = Value::Array(results);

                tx.run(set_field_op(store, &record.id, fields::RESULT, &result)?);
                tx.run(set_field_op(store, &record.id, fields::PROGRESS, &record.total)?);
                if let Some(parent) = &record.parent {
                    tx.run(store.enqueue_command_op(
                        &parent.pool,
                        &Command::result(&parent.id, &parent.uid, &record.id, Some(result.clone())),
                        now,
                    )?);
                }

                if store.eval(&tx).await? {
                    info!(task_id = %record.id, children = record.children.len(), "Group completed");
                    self.context.events().publish(TaskEvent {
                        task_id: record.id.clone(),
                        name: record.name.clone(),
                        outcome: TaskOutcome::Completed {
                            result: Some(result),
                        },
                    });
                } else {
                    debug!(task_id = %record.id, "Lost group completion race");
                }
            }
        }
        Ok(())
    }
}
