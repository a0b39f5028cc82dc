//! # trellis-orchestration
//!
//! The composite task lifecycle of the Trellis engine: chain and group state
//! machines, recursive preparation, the template registry with injected leaf
//! and init closures, the worker command loop, and the `Queue` facade hosts
//! build against.
//!
//! The design is data-driven rather than inheritance-driven: a persisted
//! record's `name` selects a registered [`template::TemplateDef`], and the
//! definition's behavior enum selects the handler that drives each command.
//! Handlers hold no state between commands; every decision is made against a
//! freshly read record, and every transition is one optimistic store
//! transaction.

pub mod composite;
pub mod context;
pub mod leaf;
pub mod node;
pub mod queue;
pub mod template;
pub mod worker;

pub use composite::chain::ChainLifecycle;
pub use composite::group::GroupLifecycle;
pub use context::EngineContext;
pub use leaf::LeafLifecycle;
pub use node::{TaskFactory, TaskNode};
pub use queue::Queue;
pub use template::{
    InitContext, TemplateBehavior, TemplateBuilder, TemplateDef, TemplateRegistry, CHAIN_TEMPLATE,
    GROUP_TEMPLATE,
};
pub use worker::Worker;
