//! # Queue Configuration
//!
//! Serde-deserializable configuration with defaults that work out of the box
//! against a local Redis or the in-memory backend. TOML loading goes through
//! the `config` crate.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::QueueResult;

/// Default finished-record retention before the janitor may remove it.
const DEFAULT_REMOVE_DELAY_MS: i64 = 30 * 60 * 1000;

/// Configuration for one queue namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Key prefix for every durable key (`trellis:` by default).
    pub prefix: String,
    /// Pool used by tasks that do not name one.
    pub default_pool: String,
    /// Retention of finished records, in milliseconds; becomes the record's
    /// `removeDelay` and the score in the finished sorted set.
    pub remove_delay_ms: i64,
    /// Worker poll interval between command rounds.
    pub poll_interval_ms: u64,
    /// Maximum commands claimed per pool per poll round.
    pub claim_batch: usize,
    /// Delay before a command whose handler hit an I/O error is redelivered.
    pub redeliver_delay_ms: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefix: "trellis:".to_string(),
            default_pool: "default".to_string(),
            remove_delay_ms: DEFAULT_REMOVE_DELAY_MS,
            poll_interval_ms: 50,
            claim_batch: 16,
            redeliver_delay_ms: 1_000,
        }
    }
}

impl QueueConfig {
    /// Load configuration from a TOML file, filling unset keys with defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> QueueResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
