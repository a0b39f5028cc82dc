//! # Engine Context
//!
//! Shared dependencies for every lifecycle handler: the task store, the
//! template registry, the terminal-event bus, and the queue configuration.
//! Handlers hold this behind an `Arc`; the engine itself is stateless beyond
//! it — all durable state lives in the store.

use std::sync::Arc;

use trellis_shared::{EventBus, QueueConfig, TaskStore};

use crate::template::TemplateRegistry;

/// Shared handler dependencies.
#[derive(Debug, Clone)]
pub struct EngineContext {
    store: TaskStore,
    registry: Arc<TemplateRegistry>,
    events: EventBus,
    config: QueueConfig,
}

impl EngineContext {
    pub fn new(
        store: TaskStore,
        registry: Arc<TemplateRegistry>,
        events: EventBus,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            config,
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}
