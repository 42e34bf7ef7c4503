//! `PostgreSQL` pool shared by the engine tables and the boost producer.
//!
//! Queries are built at runtime rather than checked at compile time, so the
//! workspace builds without a live database. Every value is bound.

use std::time::Duration;

use points_core::config::InfrastructureConfig;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::audit_store::PgAuditSink;
use crate::boost_store::{PgBoostEventSink, PgBoostSnapshotStore};
use crate::error::DbError;
use crate::snapshot_store::PgSnapshotRepository;

/// Shared pool handle. Cloning is cheap and shares connections.
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Connect with the limits in `infra` and apply pending migrations, so
    /// `snapshots` and `point_updates` exist before the engine reads them.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if `postgres_url` does not parse,
    /// [`DbError::Postgres`] if no connection can be acquired within
    /// `acquire_timeout_secs`, or [`DbError::Migration`] if a migration
    /// fails.
    pub async fn open(infra: &InfrastructureConfig) -> Result<Self, DbError> {
        let options: PgConnectOptions = infra
            .postgres_url
            .parse()
            .map_err(|e: sqlx::Error| DbError::Config(format!("invalid postgres_url: {e}")))?;

        let pool = PgPoolOptions::new()
            .max_connections(infra.max_connections)
            .acquire_timeout(Duration::from_secs(infra.acquire_timeout_secs))
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!(
            max_connections = infra.max_connections,
            acquire_timeout_secs = infra.acquire_timeout_secs,
            "PostgreSQL ready"
        );
        Ok(Self { pool })
    }

    /// Repository over the `snapshots` table.
    pub fn snapshots(&self) -> PgSnapshotRepository {
        PgSnapshotRepository::new(self.pool.clone())
    }

    /// Audit sink appending to `point_updates`.
    pub fn audit_sink(&self) -> PgAuditSink {
        PgAuditSink::new(self.pool.clone())
    }

    /// Producer-side latest boost record per account.
    pub fn boost_snapshots(&self) -> PgBoostSnapshotStore {
        PgBoostSnapshotStore::new(self.pool.clone())
    }

    /// Sink appending boost changes to `boosts`.
    pub fn boost_events(&self) -> PgBoostEventSink {
        PgBoostEventSink::new(self.pool.clone())
    }

    /// The underlying [`PgPool`].
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Wait for in-flight queries and close every connection.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unparseable_url_is_a_config_error() {
        let infra = InfrastructureConfig {
            postgres_url: "not a database url".to_owned(),
            ..InfrastructureConfig::default()
        };
        let result = PostgresPool::open(&infra).await;
        assert!(matches!(result, Err(DbError::Config(msg)) if msg.contains("postgres_url")));
    }
}
