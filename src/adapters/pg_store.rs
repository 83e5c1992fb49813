//! `TagStore` backed by a Postgres pool.
//!
//! The pool connects lazily, so the service starts even when the database is
//! down and the probe reports the outage instead.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    config::PostgresConfig,
    error::ProbeError,
    probe::relational::{Tag, TagStore},
};

pub struct PgTagStore {
    pool: PgPool,
}

impl PgTagStore {
    pub fn connect_lazy(cfg: &PostgresConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(Duration::from_millis(cfg.acquire_timeout_ms))
            .connect_lazy(&cfg.url)
            .context("parsing postgres.url")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl TagStore for PgTagStore {
    async fn create(&self, name: &str) -> Result<Tag, ProbeError> {
        let tag = sqlx::query_as::<_, Tag>(r#"INSERT INTO "Tag" (name) VALUES ($1) RETURNING id, name"#)
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(tag)
    }

    async fn find(&self, id: i32) -> Result<Option<Tag>, ProbeError> {
        let tag = sqlx::query_as::<_, Tag>(r#"SELECT id, name FROM "Tag" WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tag)
    }

    async fn update(&self, id: i32, name: &str) -> Result<Tag, ProbeError> {
        let tag = sqlx::query_as::<_, Tag>(
            r#"UPDATE "Tag" SET name = $2 WHERE id = $1 RETURNING id, name"#,
        )
        .bind(id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(tag)
    }

    async fn delete(&self, id: i32) -> Result<Tag, ProbeError> {
        let tag = sqlx::query_as::<_, Tag>(r#"DELETE FROM "Tag" WHERE id = $1 RETURNING id, name"#)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(tag)
    }
}
