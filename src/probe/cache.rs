//! Cache probe: write a short-lived key and read it straight back.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use super::{random_suffix, ProbeOutcome};
use crate::error::ProbeError;

/// Opens a fresh session against the cache.
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn CacheSession>, ProbeError>;
}

/// One open connection. [`close`](CacheSession::close) is best-effort and never fails.
#[async_trait]
pub trait CacheSession: Send {
    async fn set_ex(&mut self, key: &str, value: &str, ttl: Duration) -> Result<(), ProbeError>;
    async fn get(&mut self, key: &str) -> Result<Option<String>, ProbeError>;
    async fn close(self: Box<Self>);
}

#[derive(Clone)]
pub struct CacheProbe {
    client: Arc<dyn CacheClient>,
    key_prefix: String,
    ttl: Duration,
}

impl CacheProbe {
    pub fn new(client: Arc<dyn CacheClient>, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    /// `Success` when the value reads back unchanged, `PartialSuccess` when the
    /// calls worked but the value differs or is missing, `Fail` on any error.
    #[tracing::instrument(name = "cache_probe", skip(self))]
    pub async fn run(&self) -> ProbeOutcome {
        // Millisecond timestamps collide under concurrent requests.
        let key = format!(
            "{}:{}-{}",
            self.key_prefix,
            chrono::Utc::now().timestamp_millis(),
            random_suffix(6)
        );
        let value = format!("value-{}", random_suffix(4));

        let mut session = match self.client.connect().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "cache connect failed");
                return ProbeOutcome::fail(e);
            }
        };

        let result = write_then_read(session.as_mut(), &key, &value, self.ttl).await;
        session.close().await;

        match result {
            Ok(read_back) => {
                let details = json!({ "key": key, "value": value, "readBack": read_back });
                if read_back.as_deref() == Some(value.as_str()) {
                    info!(%key, "cache round-trip succeeded");
                    ProbeOutcome::success(details)
                } else {
                    warn!(%key, ?read_back, "cache read-back did not match written value");
                    ProbeOutcome::partial(details)
                }
            }
            Err(e) => {
                warn!(%key, error = %e, "cache round-trip failed");
                ProbeOutcome::fail(e)
            }
        }
    }
}

async fn write_then_read(
    session: &mut dyn CacheSession,
    key: &str,
    value: &str,
    ttl: Duration,
) -> Result<Option<String>, ProbeError> {
    session.set_ex(key, value, ttl).await?;
    session.get(key).await
}
