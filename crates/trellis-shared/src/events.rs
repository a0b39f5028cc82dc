//! # Task Event Surface
//!
//! A broadcast bus carrying one event per terminal transition, success or
//! failure. Hosts subscribe instead of polling task state; `wait_for` is the
//! typed rendition of listening for a single task's end.
//!
//! Subscribe before submitting the task whose end you want to observe — a
//! broadcast receiver only sees events published after it was created.

use serde_json::Value;
use tokio::sync::broadcast;

/// How a task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed { result: Option<Value> },
    Failed { error: Value },
}

/// Emitted exactly once per task reaching `finished`, regardless of how many
/// workers raced on its terminal command.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub task_id: String,
    pub name: String,
    pub outcome: TaskOutcome,
}

impl TaskEvent {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Failed { .. })
    }
}

/// Broadcast bus for terminal task events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Publish a terminal event. A bus with no subscribers drops the event,
    /// which is fine: events are a notification surface, not durable state.
    pub fn publish(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }

    /// Wait on an existing subscription for the end of one specific task.
    /// Returns `None` if the bus closes first.
    pub async fn wait_for(
        rx: &mut broadcast::Receiver<TaskEvent>,
        task_id: &str,
    ) -> Option<TaskEvent> {
        loop {
            match rx.recv().await {
                Ok(event) if event.task_id == task_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_wait_for_filters_by_task_id() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(TaskEvent {
            task_id: "other".to_string(),
            name: "leaf".to_string(),
            outcome: TaskOutcome::Completed { result: None },
        });
        bus.publish(TaskEvent {
            task_id: "t1".to_string(),
            name: "chain".to_string(),
            outcome: TaskOutcome::Completed {
                result: Some(json!(8)),
            },
        });

        let event = EventBus::wait_for(&mut rx, "t1").await.unwrap();
        assert_eq!(event.name, "chain");
        assert!(!event.is_failure());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(TaskEvent {
            task_id: "t1".to_string(),
            name: "group".to_string(),
            outcome: TaskOutcome::Failed {
                error: json!({ "message": "boom" }),
            },
        });
    }
}
