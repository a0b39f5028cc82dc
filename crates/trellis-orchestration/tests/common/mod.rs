//! Shared fixtures for lifecycle integration tests: an in-memory queue with
//! a small set of leaf templates.

use std::sync::Arc;

use serde_json::{json, Value};
use trellis_orchestration::{Queue, TemplateDef, TemplateRegistry};
use trellis_redis::StoreBackend;
use trellis_shared::{QueueConfig, TaskError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A queue over a fresh in-memory store with the test templates registered:
///
/// - `const` — returns its `user_data` unchanged
/// - `add_one` — returns `args[0] + 1`
/// - `fail` — always errors with "leaf exploded"
pub fn test_queue() -> Queue {
    init_tracing();
    let registry = Arc::new(TemplateRegistry::new());

    registry.register(
        TemplateDef::builder("const")
            .run(|_args, user_data| async move { Ok(user_data) })
            .build()
            .expect("const template"),
    );
    registry.register(
        TemplateDef::builder("add_one")
            .run(|args, _user_data| async move {
                let n = args.first().and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(n + 1))
            })
            .build()
            .expect("add_one template"),
    );
    registry.register(
        TemplateDef::builder("fail")
            .run(|_args, _user_data| async move {
                Err::<Value, _>(TaskError::new("leaf exploded"))
            })
            .build()
            .expect("fail template"),
    );

    Queue::with_registry(
        Arc::new(StoreBackend::in_memory()),
        QueueConfig::default(),
        registry,
    )
}
