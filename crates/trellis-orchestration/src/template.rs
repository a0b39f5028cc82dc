//! # Task Templates
//!
//! A template is a registered definition a task record points back to via its
//! persisted `name` field: workers look the name up here to decide which
//! handler drives a command. Three behaviors exist — leaf (an injected run
//! closure), chain, and group (each optionally carrying an injected `init`
//! closure that supplies children at preparation time).
//!
//! `TemplateBuilder` is the registration-time factory: a value carrying the
//! base settings plus user overrides, built once and instantiated per task.
//! Closures are stored as `Arc<dyn Fn>` so definitions clone cheaply into
//! every worker.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;

use trellis_shared::{QueueError, QueueResult, TaskError};

use crate::node::{TaskFactory, TaskNode};

/// Name of the built-in chain template.
pub const CHAIN_TEMPLATE: &str = "chain";
/// Name of the built-in group template.
pub const GROUP_TEMPLATE: &str = "group";

/// Injected leaf body: `(args, user_data) -> result`.
pub type LeafRun =
    Arc<dyn Fn(Vec<Value>, Value) -> BoxFuture<'static, Result<Value, TaskError>> + Send + Sync>;

/// Injected child supplier for composite templates.
pub type InitFn =
    Arc<dyn Fn(InitContext) -> BoxFuture<'static, QueueResult<Vec<TaskNode>>> + Send + Sync>;

/// What an `init` closure sees: the instantiating task's args and user data,
/// plus a factory for minting child nodes from registered templates.
#[derive(Debug, Clone)]
pub struct InitContext {
    pub args: Vec<Value>,
    pub user_data: Value,
    factory: TaskFactory,
}

impl InitContext {
    pub(crate) fn new(args: Vec<Value>, user_data: Value, factory: TaskFactory) -> Self {
        Self {
            args,
            user_data,
            factory,
        }
    }

    pub fn factory(&self) -> &TaskFactory {
        &self.factory
    }
}

/// What kind of handler drives a task built from this template.
#[derive(Clone)]
pub enum TemplateBehavior {
    Leaf { run: LeafRun },
    Chain { init: Option<InitFn> },
    Group { init: Option<InitFn> },
}

impl TemplateBehavior {
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateBehavior::Leaf { .. } => "leaf",
            TemplateBehavior::Chain { .. } => "chain",
            TemplateBehavior::Group { .. } => "group",
        }
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self, TemplateBehavior::Leaf { .. })
    }

    /// The injected child supplier, if this is a composite with one.
    pub fn init(&self) -> Option<&InitFn> {
        match self {
            TemplateBehavior::Leaf { .. } => None,
            TemplateBehavior::Chain { init } | TemplateBehavior::Group { init } => init.as_ref(),
        }
    }
}

impl std::fmt::Debug for TemplateBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateBehavior")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// A registered task definition.
#[derive(Debug)]
pub struct TemplateDef {
    name: String,
    pool: Option<String>,
    remove_delay_ms: Option<i64>,
    total: u64,
    behavior: TemplateBehavior,
}

impl TemplateDef {
    /// Start building a template; the registration-time `extend` factory.
    pub fn builder(name: impl Into<String>) -> TemplateBuilder {
        TemplateBuilder {
            name: name.into(),
            pool: None,
            remove_delay_ms: None,
            total: 1,
            behavior: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> Option<&str> {
        self.pool.as_deref()
    }

    pub fn remove_delay_ms(&self) -> Option<i64> {
        self.remove_delay_ms
    }

    /// Leaf progress units; composites derive their total from children.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn behavior(&self) -> &TemplateBehavior {
        &self.behavior
    }

    fn built_in(name: &str, behavior: TemplateBehavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            pool: None,
            remove_delay_ms: None,
            total: 1,
            behavior,
        })
    }
}

/// Builder overlaying user overrides onto the template base.
#[derive(Debug)]
pub struct TemplateBuilder {
    name: String,
    pool: Option<String>,
    remove_delay_ms: Option<i64>,
    total: u64,
    behavior: Option<TemplateBehavior>,
}

impl TemplateBuilder {
    /// Pool tasks from this template belong to; defaults to the queue's.
    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    /// Finished-record retention override for tasks from this template.
    pub fn remove_delay_ms(mut self, delay_ms: i64) -> Self {
        self.remove_delay_ms = Some(delay_ms);
        self
    }

    /// Progress units a leaf from this template contributes.
    pub fn total(mut self, total: u64) -> Self {
        self.total = total;
        self
    }

    /// Make this a leaf template with the given run body.
    pub fn run<F, Fut>(mut self, run: F) -> Self
    where
        F: Fn(Vec<Value>, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        self.behavior = Some(TemplateBehavior::Leaf {
            run: Arc::new(
                move |args, user_data| -> BoxFuture<'static, Result<Value, TaskError>> {
                    Box::pin(run(args, user_data))
                },
            ),
        });
        self
    }

    /// Make this a chain template whose children come from `init`.
    pub fn chain_init<F, Fut>(mut self, init: F) -> Self
    where
        F: Fn(InitContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = QueueResult<Vec<TaskNode>>> + Send + 'static,
    {
        self.behavior = Some(TemplateBehavior::Chain {
            init: Some(Arc::new(
                move |ctx| -> BoxFuture<'static, QueueResult<Vec<TaskNode>>> {
                    Box::pin(init(ctx))
                },
            )),
        });
        self
    }

    /// Make this a group template whose children come from `init`.
    pub fn group_init<F, Fut>(mut self, init: F) -> Self
    where
        F: Fn(InitContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = QueueResult<Vec<TaskNode>>> + Send + 'static,
    {
        self.behavior = Some(TemplateBehavior::Group {
            init: Some(Arc::new(
                move |ctx| -> BoxFuture<'static, QueueResult<Vec<TaskNode>>> {
                    Box::pin(init(ctx))
                },
            )),
        });
        self
    }

    pub fn build(self) -> QueueResult<TemplateDef> {
        let behavior = self.behavior.ok_or_else(|| {
            QueueError::configuration(format!(
                "template '{}' has no behavior; call run(), chain_init(), or group_init()",
                self.name
            ))
        })?;
        Ok(TemplateDef {
            name: self.name,
            pool: self.pool,
            remove_delay_ms: self.remove_delay_ms,
            total: self.total,
            behavior,
        })
    }
}

/// Registered templates, keyed by name. The built-in `chain` and `group`
/// templates always resolve; user registrations may shadow them.
#[derive(Debug)]
pub struct TemplateRegistry {
    chain: Arc<TemplateDef>,
    group: Arc<TemplateDef>,
    templates: DashMap<String, Arc<TemplateDef>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self {
            chain: TemplateDef::built_in(CHAIN_TEMPLATE, TemplateBehavior::Chain { init: None }),
            group: TemplateDef::built_in(GROUP_TEMPLATE, TemplateBehavior::Group { init: None }),
            templates: DashMap::new(),
        }
    }

    /// Register a definition; a later registration under the same name wins.
    pub fn register(&self, def: TemplateDef) -> Arc<TemplateDef> {
        let def = Arc::new(def);
        self.templates.insert(def.name.clone(), def.clone());
        def
    }

    pub fn get(&self, name: &str) -> Option<Arc<TemplateDef>> {
        if let Some(def) = self.templates.get(name) {
            return Some(def.clone());
        }
        match name {
            CHAIN_TEMPLATE => Some(self.chain.clone()),
            GROUP_TEMPLATE => Some(self.group.clone()),
            _ => None,
        }
    }

    pub fn chain_template(&self) -> Arc<TemplateDef> {
        self.chain.clone()
    }

    pub fn group_template(&self) -> Arc<TemplateDef> {
        self.group.clone()
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
