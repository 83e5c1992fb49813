//! Relational store probe: create → read → update → delete one throwaway record.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::{random_suffix, ProbeOutcome};
use crate::error::ProbeError;

/// A row of the `Tag` table, the smallest record the schema offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Tag {
    pub id: i32,
    pub name: String,
}

/// The CRUD surface the probe needs from the relational store.
#[async_trait]
pub trait TagStore: Send + Sync {
    async fn create(&self, name: &str) -> Result<Tag, ProbeError>;
    async fn find(&self, id: i32) -> Result<Option<Tag>, ProbeError>;
    async fn update(&self, id: i32, name: &str) -> Result<Tag, ProbeError>;
    async fn delete(&self, id: i32) -> Result<Tag, ProbeError>;
}

#[derive(Clone)]
pub struct RelationalProbe {
    store: Arc<dyn TagStore>,
}

impl RelationalProbe {
    pub fn new(store: Arc<dyn TagStore>) -> Self {
        Self { store }
    }

    /// Run the round-trip. The record is deleted as the last step, so a
    /// successful run leaves nothing behind.
    #[tracing::instrument(name = "relational_probe", skip(self))]
    pub async fn run(&self) -> ProbeOutcome {
        match self.round_trip().await {
            Ok(outcome) => {
                info!("relational round-trip succeeded");
                outcome
            }
            Err(e) => {
                warn!(error = %e, "relational round-trip failed");
                ProbeOutcome::fail(e)
            }
        }
    }

    async fn round_trip(&self) -> Result<ProbeOutcome, ProbeError> {
        let name = format!("demo-{}", random_suffix(6));
        let renamed = format!("{name}-updated");

        let created = self.store.create(&name).await?;
        let read = self
            .store
            .find(created.id)
            .await?
            .ok_or_else(|| ProbeError::operation(format!("tag {} not found after create", created.id)))?;
        let updated = self.store.update(created.id, &renamed).await?;
        let deleted = self.store.delete(created.id).await?;

        Ok(ProbeOutcome::success(json!({
            "created": created,
            "read": read,
            "updated": updated,
            "deleted": deleted,
        })))
    }
}
