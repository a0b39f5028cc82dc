//! # Store Backend Dispatch
//!
//! `StoreBackend` is an enum, not a trait object: the two variants are known
//! at compile time and enum dispatch keeps the call sites monomorphic.

use std::collections::HashMap;

use crate::error::StoreResult;
use crate::memory::MemoryBackend;
use crate::ops::Transaction;
use crate::redis_backend::RedisBackend;

/// The store backends Trellis can run against.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Redis(RedisBackend),
    Memory(MemoryBackend),
}

impl StoreBackend {
    /// Connect to Redis at `url`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        Ok(Self::Redis(RedisBackend::connect(url).await?))
    }

    /// A fresh in-memory backend (tests, local development).
    pub fn in_memory() -> Self {
        Self::Memory(MemoryBackend::new())
    }

    /// Backend name for logging/metrics.
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::Memory(_) => "in_memory",
        }
    }

    /// Millisecond store clock.
    pub async fn now_ms(&self) -> StoreResult<i64> {
        match self {
            Self::Redis(backend) => backend.now_ms().await,
            Self::Memory(backend) => Ok(backend.now_ms()),
        }
    }

    /// Evaluate a validate/exec transaction. Returns whether it validated.
    pub async fn eval(&self, tx: &Transaction) -> StoreResult<bool> {
        match self {
            Self::Redis(backend) => backend.eval(tx).await,
            Self::Memory(backend) => backend.eval(tx),
        }
    }

    /// Read a whole hash; `None` if the key does not exist.
    pub async fn hash_get_all(&self, key: &str) -> StoreResult<Option<HashMap<String, String>>> {
        match self {
            Self::Redis(backend) => backend.hash_get_all(key).await,
            Self::Memory(backend) => backend.hash_get_all(key),
        }
    }

    /// Sorted-set members with score <= `max`, capped at `limit`.
    pub async fn sorted_set_range_by_score(
        &self,
        key: &str,
        max: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        match self {
            Self::Redis(backend) => backend.sorted_set_range_by_score(key, max, limit).await,
            Self::Memory(backend) => backend.sorted_set_range_by_score(key, max, limit),
        }
    }

    /// All members of a sorted set in score order.
    pub async fn sorted_set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        match self {
            Self::Redis(backend) => backend.sorted_set_members(key).await,
            Self::Memory(backend) => backend.sorted_set_members(key),
        }
    }

    /// Remove a key outright, whatever its type.
    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        match self {
            Self::Redis(backend) => backend.delete(key).await,
            Self::Memory(backend) => backend.delete(key),
        }
    }

    /// All members of a plain set, sorted for stable assertions.
    pub async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        match self {
            Self::Redis(backend) => backend.set_members(key).await,
            Self::Memory(backend) => backend.set_members(key),
        }
    }
}
