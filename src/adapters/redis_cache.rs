//! `CacheClient` backed by Redis multiplexed async connections.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands};
use tracing::debug;

use crate::{
    config::RedisConfig,
    error::ProbeError,
    probe::cache::{CacheClient, CacheSession},
};

pub struct RedisCache {
    client: redis::Client,
    connect_timeout: Duration,
}

impl RedisCache {
    /// Parses the URL only; no connection is made until a probe runs.
    pub fn new(cfg: &RedisConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(cfg.url.as_str()).context("parsing redis.url")?;
        Ok(Self {
            client,
            connect_timeout: cfg.connect_timeout(),
        })
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn connect(&self) -> Result<Box<dyn CacheSession>, ProbeError> {
        let conn = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            ProbeError::connection(format!(
                "redis connect timed out after {}ms",
                self.connect_timeout.as_millis()
            ))
        })??;
        Ok(Box::new(RedisSession { conn }))
    }
}

struct RedisSession {
    conn: MultiplexedConnection,
}

#[async_trait]
impl CacheSession for RedisSession {
    async fn set_ex(&mut self, key: &str, value: &str, ttl: Duration) -> Result<(), ProbeError> {
        // Redis rejects EX 0.
        let secs = ttl.as_secs().max(1);
        self.conn.set_ex::<_, _, ()>(key, value, secs).await?;
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, ProbeError> {
        Ok(self.conn.get::<_, Option<String>>(key).await?)
    }

    async fn close(self: Box<Self>) {
        // The multiplexed driver task ends once its last handle is dropped.
        drop(self.conn);
        debug!("redis session closed");
    }
}
