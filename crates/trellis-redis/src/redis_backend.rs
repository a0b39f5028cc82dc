//! # Redis Store Backend
//!
//! Wraps a multiplexed Redis connection and the validate/exec transaction
//! script. All task-record and command-queue state lives in Redis hashes,
//! sets, and sorted sets; the script gives handlers their only atomicity
//! primitive.
//!
//! Keys travel inside the script's ARGV document rather than KEYS, so the
//! script targets single-instance Redis deployments.

use std::collections::HashMap;
use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::Script;

use crate::error::StoreResult;
use crate::ops::Transaction;

/// The validate/exec transaction script.
///
/// ARGV[1] is one JSON document
/// `{"validate": [[expected, [cmd, ...args]], ...], "exec": [[cmd, ...args], ...]}`.
/// Each validate op runs immediately and its reply must equal the expected
/// value under JSON re-encoding; on the first mismatch the script returns 0
/// without running any exec op. Otherwise every exec op runs and it returns 1.
const TRANSACTION_SCRIPT: &str = r#"
local doc = cjson.decode(ARGV[1])

for i = 1, #doc.validate do
  local expected = doc.validate[i][1]
  local op = doc.validate[i][2]
  local reply = redis.call(unpack(op))
  if reply == false then
    reply = cjson.null
  end
  if cjson.encode(reply) ~= cjson.encode(expected) then
    return 0
  end
end

for i = 1, #doc.exec do
  redis.call(unpack(doc.exec[i]))
end

return 1
"#;

/// Redis store backend over a managed multiplexed connection.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    script: Arc<Script>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend").finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1/`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            script: Arc::new(Script::new(TRANSACTION_SCRIPT)),
        })
    }

    /// Millisecond wall clock read from the Redis server, so enqueue scoring
    /// stays consistent across workers regardless of host clock skew.
    pub async fn now_ms(&self) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let (secs, micros): (i64, i64) = redis::cmd("TIME").query_async(&mut conn).await?;
        Ok(secs * 1000 + micros / 1000)
    }

    /// Evaluate a transaction via the script. Returns whether it validated.
    pub async fn eval(&self, tx: &Transaction) -> StoreResult<bool> {
        let doc = serde_json::to_string(&tx.to_wire())?;
        let mut conn = self.conn.clone();
        let reply: i64 = self.script.arg(doc).invoke_async(&mut conn).await?;
        Ok(reply == 1)
    }

    pub async fn hash_get_all(&self, key: &str) -> StoreResult<Option<HashMap<String, String>>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(if map.is_empty() { None } else { Some(map) })
    }

    /// Members with score <= `max`, capped at `limit`.
    pub async fn sorted_set_range_by_score(
        &self,
        key: &str,
        max: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(max)
            .arg("LIMIT")
            .arg(0)
            .arg(limit as i64)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    pub async fn sorted_set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    /// Remove a key outright. Janitor-style removal; the engine's own
    /// transitions never delete keys.
    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    pub async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut members: Vec<String> =
            redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await?;
        members.sort();
        Ok(members)
    }
}
