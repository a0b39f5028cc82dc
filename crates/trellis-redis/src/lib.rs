//! # trellis-redis
//!
//! Store layer for the Trellis composite-task engine: the op vocabulary
//! (sets, sorted sets, hashes), the validate/exec transaction, and the two
//! backends that evaluate it — real Redis via a Lua script, and an in-memory
//! interpreter with the same semantics for hermetic tests.
//!
//! The transaction is the engine's only mutual-exclusion primitive: a handler
//! validates by removing its claimed command from the pool's locked sorted
//! set and requiring the removal count to be 1. Of all workers racing on one
//! command, exactly one transaction validates.

pub mod backend;
pub mod error;
pub mod memory;
pub mod ops;
pub mod redis_backend;

pub use backend::StoreBackend;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryBackend;
pub use ops::{Check, StoreOp, Transaction};
pub use redis_backend::RedisBackend;
