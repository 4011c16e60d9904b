//! Redis state store backend
//!
//! Uses a multiplexed connection manager; every operation is bounded by the
//! configured per-call deadline. Read failures degrade to empty values so a
//! slow or absent store never stalls the record flow.

use super::StateStore;
use crate::config::JobConfig;
use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Redis-backed [`StateStore`]
pub struct RedisStateStore {
    conn: Option<ConnectionManager>,
    op_timeout: Duration,
}

impl RedisStateStore {
    /// Connect to the configured endpoint
    ///
    /// Connection failure is not fatal: the store is created degraded and
    /// every read returns empty until the backend comes back.
    pub async fn connect(config: &JobConfig) -> Self {
        let url = config.redis_url();
        let op_timeout = Duration::from_millis(config.redis_timeout_ms);

        let conn = match redis::Client::open(url.as_str()) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => {
                    info!(
                        max_connections = config.redis_max_connections,
                        "connected to state store at {}:{}",
                        config.redis_host,
                        config.redis_port
                    );
                    Some(conn)
                }
                Err(e) => {
                    warn!("state store connection failed, starting degraded: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("invalid state store endpoint '{}': {}", url, e);
                None
            }
        };

        Self { conn, op_timeout }
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.conn
            .clone()
            .ok_or_else(|| RuntimeError::StateStore("not connected".to_string()))
    }

    async fn run<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RuntimeError::StateStore(format!("{op}: {e}"))),
            Err(_) => Err(RuntimeError::Timeout(format!(
                "{op} exceeded {}ms",
                self.op_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get_hash(&self, key: &str) -> Result<HashMap<String, String>> {
        let Ok(mut conn) = self.connection() else {
            return Ok(HashMap::new());
        };
        match self.run("HGETALL", conn.hgetall(key)).await {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(key, "hash read failed: {}", e);
                Ok(HashMap::new())
            }
        }
    }

    async fn set_hash(
        &self,
        key: &str,
        fields: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.connection()?;
        let items: Vec<(String, String)> = fields.into_iter().collect();
        self.run("HSET", conn.hset_multiple::<_, _, _, ()>(key, &items))
            .await?;
        self.run("EXPIRE", conn.expire::<_, ()>(key, ttl.as_secs() as i64))
            .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection()?;
        self.run("EXPIRE", conn.expire::<_, ()>(key, ttl.as_secs() as i64))
            .await
    }

    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let Ok(mut conn) = self.connection() else {
            return Ok(None);
        };
        let raw: Option<String> = match self.run("GET", conn.get(key)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, "json read failed: {}", e);
                return Ok(None);
            }
        };
        match raw {
            Some(text) => match serde_json::from_str(&text) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key, "stored value is not valid json: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set_json(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> Result<()> {
        let mut conn = self.connection()?;
        let text = serde_json::to_string(value)?;
        self.run("SETEX", conn.set_ex::<_, _, ()>(key, text, ttl.as_secs()))
            .await
    }

    async fn list_push_front(&self, key: &str, item: &str) -> Result<()> {
        let mut conn = self.connection()?;
        self.run("LPUSH", conn.lpush::<_, _, ()>(key, item)).await
    }

    async fn list_trim(&self, key: &str, stop: usize) -> Result<()> {
        let mut conn = self.connection()?;
        self.run("LTRIM", conn.ltrim::<_, ()>(key, 0, stop as isize))
            .await
    }

    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        let Ok(mut conn) = self.connection() else {
            return Ok(Vec::new());
        };
        match self
            .run("LRANGE", conn.lrange(key, 0, limit as isize - 1))
            .await
        {
            Ok(items) => Ok(items),
            Err(e) => {
                warn!(key, "list read failed: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn incr_counter(&self, key: &str, ttl_if_new: Duration) -> Result<i64> {
        let Ok(mut conn) = self.connection() else {
            return Ok(0);
        };
        let value: i64 = match self.run("INCR", conn.incr(key, 1i64)).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, "counter increment failed: {}", e);
                return Ok(0);
            }
        };
        if value == 1 {
            if let Err(e) = self
                .run(
                    "EXPIRE",
                    conn.expire::<_, ()>(key, ttl_if_new.as_secs() as i64),
                )
                .await
            {
                warn!(key, "counter ttl set failed: {}", e);
            }
        }
        Ok(value)
    }

    async fn ping(&self) -> bool {
        let Ok(mut conn) = self.connection() else {
            return false;
        };
        self.run(
            "PING",
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map(|pong| pong == "PONG")
        .unwrap_or(false)
    }
}
