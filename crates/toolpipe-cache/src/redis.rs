//! Redis-backed [`KvClient`] (feature `redis`).

use std::fmt;
use std::time::Duration;

use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use serde::Deserialize;

use crate::error::KvError;
use crate::kv::{KvClient, KvFuture};

/// Keys fetched per `SCAN` round trip.
const SCAN_BATCH: usize = 500;

/// Connection settings for [`RedisKvClient`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RedisConfig {
    /// `redis://[:password@]host[:port][/db]`
    pub url: String,
    /// Connection pool max size.
    #[serde(default = "default_pool_max")]
    pub pool_max: usize,
}

fn default_pool_max() -> usize {
    16
}

impl RedisConfig {
    /// Creates a config for `url` with the default pool size.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_max: default_pool_max(),
        }
    }

    /// Checks the settings without connecting.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err("redis url should not be empty".to_string());
        }
        if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
            return Err(format!("redis url '{url}' must start with redis:// or rediss://"));
        }
        if self.pool_max == 0 {
            return Err("redis pool_max must be at least 1".to_string());
        }
        Ok(())
    }
}

/// [`KvClient`] over a pooled Redis connection.
///
/// Prefix clearing works through incremental `SCAN`, so it is safe to use on
/// a large shared instance.
#[derive(Clone)]
pub struct RedisKvClient {
    pool: Pool,
}

impl fmt::Debug for RedisKvClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisKvClient")
            .field("pool_size", &status.size)
            .field("pool_max", &status.max_size)
            .finish()
    }
}

impl RedisKvClient {
    /// Builds the pool. No connection is opened until the first command.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Connection`] if the config is invalid.
    pub fn new(config: RedisConfig) -> Result<Self, KvError> {
        config.validate().map_err(KvError::Connection)?;
        let mut cfg = Config::from_url(config.url);
        cfg.pool = Some(PoolConfig::new(config.pool_max));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| KvError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Connection, KvError> {
        self.pool
            .get()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))
    }
}

fn command_error(err: redis::RedisError) -> KvError {
    KvError::Command(err.to_string())
}

impl KvClient for RedisKvClient {
    fn get<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            conn.get::<_, Option<String>>(key)
                .await
                .map_err(command_error)
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Option<Duration>) -> KvFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            let result = match ttl {
                Some(ttl) => {
                    // PSETEX rejects zero.
                    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                    conn.pset_ex::<_, _, ()>(key, value, millis).await
                }
                None => conn.set::<_, _, ()>(key, value).await,
            };
            result.map_err(command_error)
        })
    }

    fn del<'a>(&'a self, keys: &'a [String]) -> KvFuture<'a, u64> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(0);
            }
            let mut conn = self.conn().await?;
            conn.del::<_, u64>(keys).await.map_err(command_error)
        })
    }

    fn exists<'a>(&'a self, keys: &'a [String]) -> KvFuture<'a, u64> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(0);
            }
            let mut conn = self.conn().await?;
            conn.exists::<_, u64>(keys).await.map_err(command_error)
        })
    }

    fn ttl<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<Duration>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            // -2: no such key, -1: no expiry.
            let millis: i64 = conn.pttl(key).await.map_err(command_error)?;
            Ok(u64::try_from(millis).ok().map(Duration::from_millis))
        })
    }

    fn flush_all(&self) -> KvFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            redis::cmd("FLUSHALL")
                .query_async::<()>(&mut conn)
                .await
                .map_err(command_error)
        })
    }

    fn keys<'a>(&'a self, pattern: &'a str) -> KvFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut conn = self.conn().await?;
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await
                    .map_err(command_error)?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            // SCAN may return a key more than once.
            keys.sort();
            keys.dedup();
            Ok(keys)
        })
    }

    fn close(&self) -> KvFuture<'_, ()> {
        Box::pin(async move {
            self.pool.close();
            Ok(())
        })
    }
}
