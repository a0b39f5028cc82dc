//! # Chain Composite
//!
//! Sequential orchestration: `activate` starts the first child; each child's
//! `result` feeds the next child's argument list and activates it; the last
//! child's `result` finishes the chain and reports upward. At any moment at
//! most one child is active.
//!
//! The position of the just-finished child is the persisted
//! `children_finished` counter, not anything carried on the command: the
//! counter is incremented by the same transaction that activates the next
//! child, so a command replayed after a won race can never advance the chain
//! twice.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use trellis_redis::{StoreOp, Transaction};
use trellis_shared::{
    fields, Command, CommandType, QueueResult, TaskEvent, TaskOutcome, TaskRecord, TaskState,
};

use crate::composite::{
    finish_transition_ops, handle_child_error, idle_transition_ops, set_field_op,
};
use crate::context::EngineContext;

/// Drives chain records through their state machine.
#[derive(Debug, Clone)]
pub struct ChainLifecycle {
    context: Arc<EngineContext>,
}

impl ChainLifecycle {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self { context }
    }

    /// Route one claimed command to its handler. `pool` is the pool the
    /// command was claimed from, which owns the locked entry the handler's
    /// transaction must consume.
    pub async fn handle(
        &self,
        pool: &str,
        record: &TaskRecord,
        command: &Command,
    ) -> QueueResult<()> {
        match command.command_type {
            CommandType::Activate => self.handle_activate(pool, record, command).await,
            CommandType::Result => self.handle_result(pool, record, command).await,
            CommandType::Error => handle_child_error(&self.context, pool, record, command).await,
            CommandType::GroupCheck => {
                warn!(task_id = %record.id, "Chain received group_check; discarding");
                self.context
                    .store()
                    .discard_locked(pool, &command.canonical()?)
                    .await
            }
        }
    }

    /// `waiting → idle`, activating the first child in the same transaction.
    async fn handle_activate(
        &self,
        pool: &str,
        record: &TaskRecord,
        command: &Command,
    ) -> QueueResult<()> {
        let store = self.context.store();
        let canonical = command.canonical()?;

        if record.state != TaskState::Waiting {
            debug!(task_id = %record.id, state = %record.state, "Duplicate chain activation; discarding");
            return store.discard_locked(pool, &canonical).await;
        }

        let now = store.now().await?;
        let mut tx = Transaction::new();
        tx.check(store.locked_removal_check(pool, &canonical));
        tx.check(store.state_check(&record.id, TaskState::Waiting));
        for op in idle_transition_ops(store, record) {
            tx.run(op);
        }

        if let Some(first_id) = record.children.first() {
            match store.get_task(first_id).await? {
                Some(child) => {
                    tx.run(store.enqueue_command_op(
                        &child.pool,
                        &Command::activate(&child.id, &child.uid),
                        now,
                    )?);
                }
                None => {
                    // Deleted between scheduling and advance: skip the
                    // emission but still advance the chain.
                    debug!(
                        task_id = %record.id,
                        child_id = %first_id,
                        "First child record missing; activating chain without it"
                    );
                }
            }
        }

        if !store.eval(&tx).await? {
            debug!(task_id = %record.id, "Lost chain activation race");
        }
        Ok(())
    }

    /// A child finished. Feed its result forward and activate the next
    /// child, or finish the chain if it was the last one.
    async fn handle_result(
        &self,
        pool: &str,
        record: &TaskRecord,
        command: &Command,
    ) -> QueueResult<()> {
        let store = self.context.store();
        let canonical = command.canonical()?;

        if record.state != TaskState::Idle {
            debug!(task_id = %record.id, state = %record.state, "Chain result in non-idle state; discarding");
            return store.discard_locked(pool, &canonical).await;
        }

        let fed = command.carried_result().cloned();
        let finished_after = record.children_finished + 1;
        let child_count = record.children.len() as u64;
        let now = store.now().await?;

        let mut tx = Transaction::new();
        tx.check(store.locked_removal_check(pool, &canonical));
        tx.check(store.state_check(&record.id, TaskState::Idle));
        tx.run(StoreOp::HashIncrBy {
            key: store.keys().task(&record.id),
            field: fields::CHILDREN_FINISHED.to_string(),
            delta: 1,
        });

        if finished_after < child_count {
            let next_id = &record.children[finished_after as usize];
            match store.get_task(next_id).await? {
                Some(next) => {
                    let mut args = next.args.clone();
                    args.push(fed.clone().unwrap_or(Value::Null));
                    tx.run(set_field_op(store, &next.id, fields::ARGS, &args)?);
                    tx.run(store.enqueue_command_op(
                        &next.pool,
                        &Command::activate(&next.id, &next.uid),
                        now,
                    )?);
                }
                None => {
                    debug!(
                        task_id = %record.id,
                        child_id = %next_id,
                        "Next chain child missing; advancing without activation"
                    );
                }
            }

            if !store.eval(&tx).await? {
                debug!(task_id = %record.id, "Lost chain advance race");
            }
            return Ok(());
        }

        // Last child: finish, persist its result as ours, report upward.
        for op in finish_transition_ops(store, record, now) {
            tx.run(op);
        }
        tx.run(set_field_op(store, &record.id, fields::PROGRESS, &record.total)?);
        if let Some(result) = &fed {
            tx.run(set_field_op(store, &record.id, fields::RESULT, result)?);
        }
        if let Some(parent) = &record.parent {
            tx.run(store.enqueue_command_op(
                &parent.pool,
                &Command::result(&parent.id, &parent.uid, &record.id, fed.clone()),
                now,
            )?);
        }

        if store.eval(&tx).await? {
            info!(task_id = %record.id, children = child_count, "Chain completed");
            self.context.events().publish(TaskEvent {
                task_id: record.id.clone(),
                name: record.name.clone(),
                outcome: TaskOutcome::Completed { result: fed },
            });
        } else {
            debug!(task_id = %record.id, "Lost chain completion race");
        }
        Ok(())
    }
}
