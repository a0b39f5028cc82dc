//! Chain composite lifecycle: ordered activation, result feeding, absent
//! children, and the optimistic-transaction race discipline.

mod common;

use common::test_queue;
use serde_json::json;
use trellis_orchestration::ChainLifecycle;
use trellis_shared::{Command, EventBus, TaskOutcome, TaskState};

#[tokio::test]
async fn test_activate_moves_chain_to_idle_and_activates_first_child() {
    let queue = test_queue();
    let a = queue.task("const", vec![]).unwrap().with_user_data(json!(7));
    let b = queue.task("add_one", vec![]).unwrap();
    let chain_id = queue.submit(queue.chain(vec![a, b])).await.unwrap();

    let worker = queue.worker(vec![]);
    // First round handles only the root activation.
    assert_eq!(worker.tick().await.unwrap(), 1);

    let record = queue.store().get_task(&chain_id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Idle);
    assert_eq!(record.children_finished, 0);
    assert!(queue
        .store()
        .state_members(TaskState::Idle)
        .await
        .unwrap()
        .contains(&chain_id));

    // Exactly one pending command: the first child's activation.
    let pending = queue.store().pending_commands("default").await.unwrap();
    assert_eq!(pending.len(), 1);
    let cmd = Command::parse(&pending[0]).unwrap();
    assert_eq!(cmd.to, record.children[0]);
}

#[tokio::test]
async fn test_chain_feeds_results_and_completes() {
    let queue = test_queue();
    let mut events = queue.events().subscribe();

    let a = queue.task("const", vec![]).unwrap().with_user_data(json!(7));
    let b = queue.task("add_one", vec![]).unwrap();
    let chain_id = queue.submit(queue.chain(vec![a, b])).await.unwrap();

    queue.worker(vec![]).run_until_idle().await.unwrap();

    let record = queue.store().get_task(&chain_id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Finished);
    assert_eq!(record.children_finished, 2);
    assert_eq!(record.progress, record.total);
    assert_eq!(record.result, Some(json!(8)));

    // Result feeding: the second child's persisted args gained the first
    // child's result.
    let second = queue
        .store()
        .get_task(&record.children[1])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.args, vec![json!(7)]);

    let event = EventBus::wait_for(&mut events, &chain_id).await.unwrap();
    assert_eq!(event.outcome, TaskOutcome::Completed { result: Some(json!(8)) });
}

#[tokio::test]
async fn test_feed_appends_to_existing_args() {
    let queue = test_queue();
    let a = queue.task("const", vec![]).unwrap().with_user_data(json!(2));
    // add_one reads args[0], so the pre-set argument wins over the fed one.
    let b = queue.task("add_one", vec![json!(40)]).unwrap();
    let chain_id = queue.submit(queue.chain(vec![a, b])).await.unwrap();

    queue.worker(vec![]).run_until_idle().await.unwrap();

    let record = queue.store().get_task(&chain_id).await.unwrap().unwrap();
    let second = queue
        .store()
        .get_task(&record.children[1])
        .await
        .unwrap()
        .unwrap();
    // Law: args after feed = (args at prepare) ++ [previous result].
    assert_eq!(second.args, vec![json!(40), json!(2)]);
    assert_eq!(record.result, Some(json!(41)));
}

#[tokio::test]
async fn test_next_child_deleted_advances_without_activation() {
    let queue = test_queue();
    let a = queue.task("const", vec![]).unwrap().with_user_data(json!(1));
    let b = queue.task("add_one", vec![]).unwrap();
    let chain_id = queue.submit(queue.chain(vec![a, b])).await.unwrap();

    let record = queue.store().get_task(&chain_id).await.unwrap().unwrap();
    queue.store().delete_task(&record.children[1]).await.unwrap();

    queue.worker(vec![]).run_until_idle().await.unwrap();

    // The chain advanced past the first child and did not crash; with the
    // second child gone it simply has nothing further to drive.
    let record = queue.store().get_task(&chain_id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Idle);
    assert_eq!(record.children_finished, 1);
    assert!(queue.store().pending_commands("default").await.unwrap().is_empty());
    assert!(queue.store().locked_commands("default").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_first_child_deleted_still_activates_chain() {
    let queue = test_queue();
    let a = queue.task("const", vec![]).unwrap();
    let b = queue.task("add_one", vec![]).unwrap();
    let chain_id = queue.submit(queue.chain(vec![a, b])).await.unwrap();

    let record = queue.store().get_task(&chain_id).await.unwrap().unwrap();
    queue.store().delete_task(&record.children[0]).await.unwrap();

    queue.worker(vec![]).run_until_idle().await.unwrap();

    let record = queue.store().get_task(&chain_id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Idle);
    assert!(queue.store().pending_commands("default").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_racing_workers_on_one_activation_advance_once() {
    let queue = test_queue();
    let a = queue.task("const", vec![]).unwrap().with_user_data(json!(1));
    let b = queue.task("add_one", vec![]).unwrap();
    let chain_id = queue.submit(queue.chain(vec![a, b])).await.unwrap();

    let store = queue.store();
    let now = store.now().await.unwrap();
    let due = store.due_commands("default", now, 10).await.unwrap();
    assert_eq!(due.len(), 1);
    let (command, canonical) = due[0].clone();

    // Both "workers" claim the same command, then both dispatch against the
    // same pre-read record.
    store.claim_command("default", &canonical, now).await.unwrap();
    let record = store.get_task(&chain_id).await.unwrap().unwrap();
    let chain = ChainLifecycle::new(queue.context().clone());

    chain.handle("default", &record, &command).await.unwrap();
    // The loser returns silently without a second transition.
    chain.handle("default", &record, &command).await.unwrap();

    let record = store.get_task(&chain_id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Idle);

    // The first child was activated exactly once and nothing stayed locked.
    let pending = store.pending_commands("default").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(Command::parse(&pending[0]).unwrap().to, record.children[0]);
    assert!(store.locked_commands("default").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_terminal_result_is_discarded() {
    let queue = test_queue();
    let mut events = queue.events().subscribe();

    let a = queue.task("const", vec![]).unwrap().with_user_data(json!(7));
    let b = queue.task("add_one", vec![]).unwrap();
    let chain_id = queue.submit(queue.chain(vec![a, b])).await.unwrap();

    let worker = queue.worker(vec![]);
    worker.run_until_idle().await.unwrap();

    let record = queue.store().get_task(&chain_id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Finished);

    // Redeliver the terminal result; the transition must not run twice.
    let duplicate = Command::result(&chain_id, &record.uid, &record.children[1], Some(json!(8)));
    let now = queue.store().now().await.unwrap();
    queue
        .store()
        .enqueue_command("default", &duplicate, now)
        .await
        .unwrap();
    worker.run_until_idle().await.unwrap();

    let record = queue.store().get_task(&chain_id).await.unwrap().unwrap();
    assert_eq!(record.children_finished, 2);

    // Exactly one terminal event for the chain.
    let first = EventBus::wait_for(&mut events, &chain_id).await.unwrap();
    assert!(matches!(first.outcome, TaskOutcome::Completed { .. }));
    assert!(events.try_recv().is_err());
}
