//! # trellis-core
//!
//! Umbrella crate for the Trellis composite-task engine. Re-exports the
//! workspace crates; the end-to-end suites under `tests/` exercise the whole
//! engine against the in-memory store backend.

pub use trellis_orchestration as orchestration;
pub use trellis_redis as store;
pub use trellis_shared as shared;

pub use trellis_orchestration::{Queue, TemplateDef, TemplateRegistry, Worker};
pub use trellis_redis::StoreBackend;
pub use trellis_shared::{EventBus, QueueConfig, TaskError, TaskState};
