//! # Queue Facade
//!
//! The host-facing handle: build task trees (`task`, `chain`, `group`),
//! submit them (prepare + persist + root activation), subscribe to terminal
//! events, and spawn workers. A `Queue` is cheap to clone; all durable state
//! lives in the store it wraps.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use trellis_redis::StoreBackend;
use trellis_shared::{Command, EventBus, Keyspace, QueueConfig, QueueResult, TaskStore};

use crate::composite::prepare::{collect_insert_ops, prepare_tree};
use crate::context::EngineContext;
use crate::node::{TaskFactory, TaskNode};
use crate::template::TemplateRegistry;
use crate::worker::Worker;

/// Handle to one queue namespace.
#[derive(Debug, Clone)]
pub struct Queue {
    context: Arc<EngineContext>,
    factory: TaskFactory,
}

impl Queue {
    /// A queue with a fresh default registry.
    pub fn new(backend: Arc<StoreBackend>, config: QueueConfig) -> Self {
        Self::with_registry(backend, config, Arc::new(TemplateRegistry::new()))
    }

    /// A queue over a caller-populated registry (shared across workers).
    pub fn with_registry(
        backend: Arc<StoreBackend>,
        config: QueueConfig,
        registry: Arc<TemplateRegistry>,
    ) -> Self {
        let store = TaskStore::new(backend, Keyspace::new(config.prefix.clone()));
        let context = Arc::new(EngineContext::new(
            store,
            registry.clone(),
            EventBus::default(),
            config.clone(),
        ));
        let factory = TaskFactory::new(registry, config);
        Self { context, factory }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    pub fn store(&self) -> &TaskStore {
        self.context.store()
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        self.context.registry()
    }

    pub fn events(&self) -> &EventBus {
        self.context.events()
    }

    pub fn config(&self) -> &QueueConfig {
        self.context.config()
    }

    pub fn factory(&self) -> &TaskFactory {
        &self.factory
    }

    /// Instantiate a node from a registered template.
    pub fn task(&self, name: &str, args: Vec<Value>) -> QueueResult<TaskNode> {
        self.factory.task(name, args)
    }

    /// A chain of `children`, run sequentially with result feeding.
    pub fn chain(&self, children: Vec<TaskNode>) -> TaskNode {
        self.factory.chain(children)
    }

    /// A group of `children`, run concurrently with ordered gathering.
    pub fn group(&self, children: Vec<TaskNode>) -> TaskNode {
        self.factory.group(children)
    }

    /// Prepare a tree, persist every record in one transaction, and enqueue
    /// the root's activation. Returns the root task id.
    ///
    /// Preparation failures (a composite with no children, a failing init)
    /// surface here, before anything is persisted.
    pub async fn submit(&self, mut node: TaskNode) -> QueueResult<String> {
        prepare_tree(&mut node, &self.factory).await?;

        let store = self.context.store();
        let mut ops = Vec::new();
        collect_insert_ops(&node, store, &mut ops)?;

        let now = store.now().await?;
        let root = node.record();
        ops.push(store.enqueue_command_op(
            &root.pool,
            &Command::activate(&root.id, &root.uid),
            now,
        )?);
        store.apply(ops).await?;

        info!(task_id = %root.id, name = %root.name, total = root.total, "Task tree submitted");
        Ok(root.id.clone())
    }

    /// A worker polling the given pools (the queue's default pool if empty).
    pub fn worker(&self, pools: Vec<String>) -> Worker {
        let pools = if pools.is_empty() {
            vec![self.context.config().default_pool.clone()]
        } else {
            pools
        };
        Worker::new(self.context.clone(), pools)
    }
}
