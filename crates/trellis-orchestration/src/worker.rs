//! # Worker Command Loop
//!
//! Polls due commands off pool queues, claims each, and routes it to the
//! handler selected by the target record's template. The claim is
//! deliberately non-exclusive; every handler's transaction re-establishes
//! exclusivity by consuming the locked entry.
//!
//! Dispatch drops (with the claim) commands whose target record is gone,
//! whose `to_uid` no longer matches the live record, or whose template is
//! unregistered. A handler that returns `Ok` owns the command's fate — the
//! loop never re-enqueues after a non-error return. Only a handler error
//! (store I/O before its transaction landed) sends the command back to the
//! pending set for redelivery.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use trellis_shared::{Command, QueueResult};

use crate::composite::chain::ChainLifecycle;
use crate::composite::group::GroupLifecycle;
use crate::context::EngineContext;
use crate::leaf::LeafLifecycle;
use crate::template::TemplateBehavior;

/// One worker instance, polling a set of pools.
#[derive(Debug, Clone)]
pub struct Worker {
    context: Arc<EngineContext>,
    pools: Vec<String>,
    chain: ChainLifecycle,
    group: GroupLifecycle,
    leaf: LeafLifecycle,
}

impl Worker {
    pub fn new(context: Arc<EngineContext>, pools: Vec<String>) -> Self {
        Self {
            chain: ChainLifecycle::new(context.clone()),
            group: GroupLifecycle::new(context.clone()),
            leaf: LeafLifecycle::new(context.clone()),
            context,
            pools,
        }
    }

    pub fn pools(&self) -> &[String] {
        &self.pools
    }

    /// One poll round: claim and process every due command on every pool.
    /// Returns how many commands were handled. Deterministic entry point for
    /// tests; `run` loops it.
    pub async fn tick(&self) -> QueueResult<usize> {
        let store = self.context.store();
        let config = self.context.config();
        let mut processed = 0usize;

        for pool in &self.pools {
            let now = store.now().await?;
            let due = store.due_commands(pool, now, config.claim_batch).await?;
            for (command, canonical) in due {
                store.claim_command(pool, &canonical, now).await?;
                match self.dispatch(pool, &command, &canonical).await {
                    Ok(()) => processed += 1,
                    Err(e) => {
                        warn!(
                            pool = %pool,
                            command_to = %command.to,
                            error = %e,
                            "Handler failed; requeueing command for redelivery"
                        );
                        store
                            .requeue_locked(pool, &canonical, now + config.redeliver_delay_ms)
                            .await?;
                    }
                }
            }
        }
        Ok(processed)
    }

    /// Drain until a full round processes nothing. Test and batch helper.
    pub async fn run_until_idle(&self) -> QueueResult<usize> {
        let mut total = 0usize;
        loop {
            let processed = self.tick().await?;
            if processed == 0 {
                return Ok(total);
            }
            total += processed;
        }
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        info!(pools = ?self.pools, "Worker started");
        loop {
            if *shutdown.borrow() {
                info!("Worker shutting down");
                return Ok(());
            }
            let processed = self.tick().await?;
            if processed == 0 {
                let poll = Duration::from_millis(self.context.config().poll_interval_ms);
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        }
    }

    async fn dispatch(&self, pool: &str, command: &Command, canonical: &str) -> QueueResult<()> {
        let store = self.context.store();

        let Some(record) = store.get_task(&command.to).await? else {
            debug!(command_to = %command.to, "Target task missing; dropping command");
            return store.discard_locked(pool, canonical).await;
        };

        // UID fence: a resurrected task with the same id has a new uid, so
        // commands addressed to its predecessor die here.
        if record.uid != command.to_uid {
            debug!(
                task_id = %record.id,
                command_uid = %command.to_uid,
                live_uid = %record.uid,
                "Stale command uid; dropping"
            );
            return store.discard_locked(pool, canonical).await;
        }

        let Some(def) = self.context.registry().get(&record.name) else {
            warn!(task_id = %record.id, name = %record.name, "No registered template for task; dropping command");
            return store.discard_locked(pool, canonical).await;
        };

        match def.behavior() {
            TemplateBehavior::Leaf { run } => self.leaf.handle(pool, &record, command, run).await,
            TemplateBehavior::Chain { .. } => self.chain.handle(pool, &record, command).await,
            TemplateBehavior::Group { .. } => self.group.handle(pool, &record, command).await,
        }
    }
}
