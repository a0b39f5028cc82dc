//! # trellis-shared
//!
//! Shared components of the Trellis composite-task engine: the command
//! envelope and its canonical encoding, the persisted task record codec, the
//! store key layout, queue configuration, error types, the terminal-event
//! bus, and the `TaskStore` domain facade over the store backend.

pub mod command;
pub mod config;
pub mod errors;
pub mod events;
pub mod keys;
pub mod record;
pub mod store;

pub use command::{Command, CommandData, CommandType};
pub use config::QueueConfig;
pub use errors::{QueueError, QueueResult, TaskError};
pub use events::{EventBus, TaskEvent, TaskOutcome};
pub use keys::Keyspace;
pub use record::{fields, ParentRef, TaskRecord, TaskState};
pub use store::TaskStore;
