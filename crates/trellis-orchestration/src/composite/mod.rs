//! # Composite Lifecycle
//!
//! Chain and group handlers plus the pieces they share: state-transition op
//! builders, the child-error path, and recursive preparation. Every handler
//! follows the same discipline — re-read nothing after assembly, put the
//! whole transition in one transaction, lead its validate block with the
//! claimed command's removal from the locked set, and return silently when
//! another worker's transaction won.

pub mod chain;
pub mod group;
pub mod prepare;

use serde::Serialize;
use tracing::{debug, warn};

use trellis_redis::{StoreOp, Transaction};
use trellis_shared::{
    fields, Command, QueueResult, TaskError, TaskEvent, TaskOutcome, TaskRecord, TaskState,
    TaskStore,
};

use crate::context::EngineContext;

/// Ops moving a record from `waiting` to `idle`.
pub(crate) fn idle_transition_ops(store: &TaskStore, record: &TaskRecord) -> Vec<StoreOp> {
    let keys = store.keys();
    vec![
        StoreOp::HashSet {
            key: keys.task(&record.id),
            field: fields::STATE.to_string(),
            value: TaskState::Idle.stored(),
        },
        StoreOp::SetRemove {
            key: keys.state_set(TaskState::Waiting),
            member: record.id.clone(),
        },
        StoreOp::SetAdd {
            key: keys.state_set(TaskState::Idle),
            member: record.id.clone(),
        },
    ]
}

/// Ops moving a record from its current state to `finished`. The finished
/// sorted set is scored with the removal deadline the janitor honors.
pub(crate) fn finish_transition_ops(
    store: &TaskStore,
    record: &TaskRecord,
    now_ms: i64,
) -> Vec<StoreOp> {
    let keys = store.keys();
    let mut ops = vec![StoreOp::HashSet {
        key: keys.task(&record.id),
        field: fields::STATE.to_string(),
        value: TaskState::Finished.stored(),
    }];
    if record.state != TaskState::Finished {
        ops.push(StoreOp::SetRemove {
            key: keys.state_set(record.state),
            member: record.id.clone(),
        });
    }
    ops.push(StoreOp::SortedSetAdd {
        key: keys.state_set(TaskState::Finished),
        score: now_ms + record.remove_delay_ms,
        member: record.id.clone(),
    });
    ops
}

/// One JSON-encoded hash field write on a task record.
pub(crate) fn set_field_op<T: Serialize>(
    store: &TaskStore,
    id: &str,
    field: &str,
    value: &T,
) -> QueueResult<StoreOp> {
    Ok(StoreOp::HashSet {
        key: store.keys().task(id),
        field: field.to_string(),
        value: serde_json::to_string(value)?,
    })
}

/// A child reported `error`: persist it, finish the composite, and propagate
/// upward. Shared by chain and group — the policy is identical.
pub(crate) async fn handle_child_error(
    context: &EngineContext,
    pool: &str,
    record: &TaskRecord,
    command: &Command,
) -> QueueResult<()> {
    let store = context.store();
    let canonical = command.canonical()?;

    if record.state == TaskState::Finished {
        debug!(task_id = %record.id, "Error for already-finished composite; discarding");
        return store.discard_locked(pool, &canonical).await;
    }

    let error = command
        .carried_error()
        .cloned()
        .unwrap_or_else(|| TaskError::new("child task failed").to_value());
    let now = store.now().await?;

    let mut tx = Transaction::new();
    tx.check(store.locked_removal_check(pool, &canonical));
    tx.check(store.state_check(&record.id, record.state));
    for op in finish_transition_ops(store, record, now) {
        tx.run(op);
    }
    tx.run(set_field_op(store, &record.id, fields::ERROR, &error)?);
    if let Some(parent) = &record.parent {
        tx.run(store.enqueue_command_op(
            &parent.pool,
            &Command::error(&parent.id, &parent.uid, &record.id, error.clone()),
            now,
        )?);
    }

    if store.eval(&tx).await? {
        warn!(task_id = %record.id, name = %record.name, "Composite failed; error propagated");
        context.events().publish(TaskEvent {
            task_id: record.id.clone(),
            name: record.name.clone(),
            outcome: TaskOutcome::Failed { error },
        });
    } else {
        debug!(task_id = %record.id, "Lost error-transition race");
    }
    Ok(())
}
