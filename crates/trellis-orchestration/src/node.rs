//! # Task Nodes
//!
//! The in-memory tree a submitter builds before preparation. Nodes are
//! ephemeral scaffolding: once prepared and persisted, all coordination runs
//! over store records and commands, and the tree is dropped.

use std::sync::Arc;

use serde_json::Value;

use trellis_shared::{QueueConfig, QueueError, QueueResult, TaskRecord, TaskState};

use crate::template::{TemplateDef, TemplateRegistry};

/// One node of an unsubmitted task tree.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub(crate) def: Arc<TemplateDef>,
    pub(crate) record: TaskRecord,
    pub(crate) children: Vec<TaskNode>,
}

impl TaskNode {
    pub(crate) fn new(
        def: Arc<TemplateDef>,
        args: Vec<Value>,
        children: Vec<TaskNode>,
        config: &QueueConfig,
    ) -> Self {
        let record = TaskRecord {
            // id and uid are assigned at preparation time.
            id: String::new(),
            uid: String::new(),
            name: def.name().to_string(),
            pool: def
                .pool()
                .map(str::to_string)
                .unwrap_or_else(|| config.default_pool.clone()),
            state: TaskState::Waiting,
            args,
            children: Vec::new(),
            children_finished: 0,
            total: 0,
            progress: 0,
            result: None,
            error: None,
            parent: None,
            remove_delay_ms: def.remove_delay_ms().unwrap_or(config.remove_delay_ms),
            user_data: Value::Null,
        };
        Self {
            def,
            record,
            children,
        }
    }

    /// Attach opaque user data, persisted alongside the record and handed to
    /// a leaf's run closure.
    pub fn with_user_data(mut self, user_data: Value) -> Self {
        self.record.user_data = user_data;
        self
    }

    /// Task id; empty until the tree has been prepared.
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn record(&self) -> &TaskRecord {
        &self.record
    }

    pub fn children(&self) -> &[TaskNode] {
        &self.children
    }
}

/// Mints task nodes from registered templates. Handed to `init` closures so
/// they can build children, and backing `Queue`'s construction methods.
#[derive(Debug, Clone)]
pub struct TaskFactory {
    registry: Arc<TemplateRegistry>,
    config: QueueConfig,
}

impl TaskFactory {
    pub fn new(registry: Arc<TemplateRegistry>, config: QueueConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Instantiate a node from a registered template.
    pub fn task(&self, name: &str, args: Vec<Value>) -> QueueResult<TaskNode> {
        let def = self
            .registry
            .get(name)
            .ok_or_else(|| QueueError::UnknownTemplate {
                name: name.to_string(),
            })?;
        Ok(TaskNode::new(def, args, Vec::new(), &self.config))
    }

    /// A chain running `children` sequentially, feeding each child's result
    /// into the next child's argument list.
    pub fn chain(&self, children: Vec<TaskNode>) -> TaskNode {
        TaskNode::new(
            self.registry.chain_template(),
            Vec::new(),
            children,
            &self.config,
        )
    }

    /// A group running `children` concurrently and collecting their results
    /// in order.
    pub fn group(&self, children: Vec<TaskNode>) -> TaskNode {
        TaskNode::new(
            self.registry.group_template(),
            Vec::new(),
            children,
            &self.config,
        )
    }
}
