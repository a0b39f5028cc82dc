//! Worker dispatch: the uid fence, absent targets, and unknown templates all
//! drop the claimed command without effecting any transition.

mod common;

use common::test_queue;
use serde_json::{json, Value};
use trellis_shared::{Command, TaskRecord, TaskState};

fn manual_record(id: &str, uid: &str, name: &str) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        uid: uid.to_string(),
        name: name.to_string(),
        pool: "default".to_string(),
        state: TaskState::Waiting,
        args: Vec::new(),
        children: Vec::new(),
        children_finished: 0,
        total: 1,
        progress: 0,
        result: None,
        error: None,
        parent: None,
        remove_delay_ms: 60_000,
        user_data: Value::Null,
    }
}

#[tokio::test]
async fn test_stale_uid_command_is_fenced_off() {
    let queue = test_queue();
    let store = queue.store();

    let record = manual_record("t1", "live-uid", "const");
    store
        .apply(store.record_insert_ops(&record).unwrap())
        .await
        .unwrap();

    // A command addressed to the task's predecessor uid.
    let stale = Command::activate("t1", "dead-uid");
    let now = store.now().await.unwrap();
    store.enqueue_command("default", &stale, now).await.unwrap();

    queue.worker(vec![]).run_until_idle().await.unwrap();

    // Dropped without a transition: the record is untouched and nothing is
    // pending or locked.
    let record = store.get_task("t1").await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Waiting);
    assert!(store.pending_commands("default").await.unwrap().is_empty());
    assert!(store.locked_commands("default").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_command_to_absent_task_is_dropped() {
    let queue = test_queue();
    let store = queue.store();

    let orphan = Command::activate("no-such-task", "u1");
    let now = store.now().await.unwrap();
    store.enqueue_command("default", &orphan, now).await.unwrap();

    queue.worker(vec![]).run_until_idle().await.unwrap();

    assert!(store.pending_commands("default").await.unwrap().is_empty());
    assert!(store.locked_commands("default").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_command_for_unregistered_template_is_dropped() {
    let queue = test_queue();
    let store = queue.store();

    let record = manual_record("t2", "u2", "never-registered");
    store
        .apply(store.record_insert_ops(&record).unwrap())
        .await
        .unwrap();

    let cmd = Command::activate("t2", "u2");
    let now = store.now().await.unwrap();
    store.enqueue_command("default", &cmd, now).await.unwrap();

    queue.worker(vec![]).run_until_idle().await.unwrap();

    let record = store.get_task("t2").await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Waiting);
    assert!(store.pending_commands("default").await.unwrap().is_empty());
    assert!(store.locked_commands("default").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_single_leaf_submission_runs_to_finished() {
    let queue = test_queue();
    let store = queue.store();

    let leaf = queue.task("const", vec![]).unwrap().with_user_data(json!(42));
    let id = queue.submit(leaf).await.unwrap();

    queue.worker(vec![]).run_until_idle().await.unwrap();

    let record = store.get_task(&id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Finished);
    assert_eq!(record.result, Some(json!(42)));
    assert_eq!(record.progress, record.total);
    assert!(store
        .state_members(TaskState::Finished)
        .await
        .unwrap()
        .contains(&id));
}
