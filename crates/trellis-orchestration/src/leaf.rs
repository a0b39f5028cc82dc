//! # Leaf Task Runner
//!
//! Executes a leaf template's injected run closure and commits the outcome in
//! one transaction: state, result or error, progress, and the report to the
//! parent. The at-most-once guarantee covers the state transition only —
//! workers racing on the same activation may each run the closure, and
//! exactly one commit lands.

use std::sync::Arc;

use tracing::{debug, warn};

use trellis_redis::Transaction;
use trellis_shared::{
    fields, Command, CommandType, QueueResult, TaskEvent, TaskOutcome, TaskRecord, TaskState,
};

use crate::composite::{finish_transition_ops, set_field_op};
use crate::context::EngineContext;
use crate::template::LeafRun;

/// Drives leaf records: `waiting → finished` around one closure run.
#[derive(Debug, Clone)]
pub struct LeafLifecycle {
    context: Arc<EngineContext>,
}

impl LeafLifecycle {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self { context }
    }

    pub async fn handle(
        &self,
        pool: &str,
        record: &TaskRecord,
        command: &Command,
        run: &LeafRun,
    ) -> QueueResult<()> {
        match command.command_type {
            CommandType::Activate => self.handle_activate(pool, record, command, run).await,
            other => {
                warn!(task_id = %record.id, command = %other, "Leaf received non-activate command; discarding");
                self.context
                    .store()
                    .discard_locked(pool, &command.canonical()?)
                    .await
            }
        }
    }

    async fn handle_activate(
        &self,
        pool: &str,
        record: &TaskRecord,
        command: &Command,
        run: &LeafRun,
    ) -> QueueResult<()> {
        let store = self.context.store();
        let canonical = command.canonical()?;

        if record.state != TaskState::Waiting {
            debug!(task_id = %record.id, state = %record.state, "Duplicate leaf activation; discarding");
            return store.discard_locked(pool, &canonical).await;
        }

        let outcome = run(record.args.clone(), record.user_data.clone()).await;
        let now = store.now().await?;

        let mut tx = Transaction::new();
        tx.check(store.locked_removal_check(pool, &canonical));
        tx.check(store.state_check(&record.id, TaskState::Waiting));
        for op in finish_transition_ops(store, record, now) {
            tx.run(op);
        }

        let event_outcome = match outcome {
            Ok(result) => {
                tx.run(set_field_op(store, &record.id, fields::RESULT, &result)?);
                tx.run(set_field_op(store, &record.id, fields::PROGRESS, &record.total)?);
                if let Some(parent) = &record.parent {
                    tx.run(store.enqueue_command_op(
                        &parent.pool,
                        &Command::result(&parent.id, &parent.uid, &record.id, Some(result.clone())),
                        now,
                    )?);
                }
                TaskOutcome::Completed {
                    result: Some(result),
                }
            }
            Err(task_error) => {
                let error = task_error.to_value();
                tx.run(set_field_op(store, &record.id, fields::ERROR, &error)?);
                if let Some(parent) = &record.parent {
                    tx.run(store.enqueue_command_op(
                        &parent.pool,
                        &Command::error(&parent.id, &parent.uid, &record.id, error.clone()),
                        now,
                    )?);
                }
                TaskOutcome::Failed { error }
            }
        };

        if store.eval(&tx).await? {
            debug!(task_id = %record.id, name = %record.name, "Leaf finished");
            self.context.events().publish(TaskEvent {
                task_id: record.id.clone(),
                name: record.name.clone(),
                outcome: event_outcome,
            });
        } else {
            debug!(task_id = %record.id, "Lost leaf completion race");
        }
        Ok(())
    }
}
