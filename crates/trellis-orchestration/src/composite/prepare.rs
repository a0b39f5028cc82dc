//! # Composite Preparation
//!
//! Depth-first preparation of an unsubmitted task tree: assign ids and uids,
//! invoke injected `init` closures to materialize children, link every child
//! back to its parent, and sum progress totals up to the root. Preparation is
//! the only phase in which the tree's shape is mutated; after submission all
//! coordination happens through store records.
//!
//! A composite with no children fails here, before anything is persisted.

use futures::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;

use trellis_redis::StoreOp;
use trellis_shared::{ParentRef, QueueError, QueueResult, TaskStore};

use crate::node::{TaskFactory, TaskNode};
use crate::template::{InitContext, TemplateBehavior};

/// Prepare a whole tree in place. On success every node has an id, a uid,
/// parent linkage, and a summed `total`.
pub async fn prepare_tree(node: &mut TaskNode, factory: &TaskFactory) -> QueueResult<()> {
    prepare_node(node, factory).await
}

fn prepare_node<'a>(
    node: &'a mut TaskNode,
    factory: &'a TaskFactory,
) -> BoxFuture<'a, QueueResult<()>> {
    Box::pin(async move {
        node.record.id = Uuid::new_v4().to_string();
        node.record.uid = Uuid::new_v4().to_string();

        let def = node.def.clone();
        match def.behavior() {
            TemplateBehavior::Leaf { .. } => {
                node.record.total = def.total().max(1);
            }
            behavior => {
                if let Some(init) = behavior.init() {
                    let ctx = InitContext::new(
                        node.record.args.clone(),
                        node.record.user_data.clone(),
                        factory.clone(),
                    );
                    let supplied = init(ctx).await?;
                    node.children.extend(supplied);
                }
                if node.children.is_empty() {
                    return Err(QueueError::no_children(node.record.name.clone()));
                }
                if matches!(behavior, TemplateBehavior::Group { .. }) {
                    node.record.result = Some(Value::Array(Vec::new()));
                }

                let parent = ParentRef {
                    id: node.record.id.clone(),
                    pool: node.record.pool.clone(),
                    uid: node.record.uid.clone(),
                };
                let mut total = 0u64;
                let mut child_ids = Vec::with_capacity(node.children.len());
                for child in &mut node.children {
                    prepare_node(child, factory).await?;
                    child.record.parent = Some(parent.clone());
                    total += child.record.total;
                    child_ids.push(child.record.id.clone());
                }
                node.record.total = total;
                node.record.children = child_ids;
            }
        }
        Ok(())
    })
}

/// Collect the insert ops persisting a prepared tree, depth-first. The caller
/// submits them in one transaction so the whole tree appears atomically.
pub fn collect_insert_ops(
    node: &TaskNode,
    store: &TaskStore,
    ops: &mut Vec<StoreOp>,
) -> QueueResult<()> {
    ops.extend(store.record_insert_ops(&node.record)?);
    for child in &node.children {
        collect_insert_ops(child, store, ops)?;
    }
    Ok(())
}
