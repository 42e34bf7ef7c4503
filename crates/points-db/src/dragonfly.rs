//! `Dragonfly` (Redis-compatible) snapshot repository.
//!
//! A low-latency alternative to the `PostgreSQL` table for deployments that
//! keep snapshots in a shared cache.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `snapshot:{id}` | JSON | Latest snapshot of an entity |
//! | `snapshots:index` | Set | Ids of every stored snapshot |

use fred::prelude::*;
use points_core::{RepositoryError, SnapshotFilter, SnapshotRepository};
use points_types::{EntityId, IdError, Snapshot};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DbError;

/// Set holding the id of every stored snapshot.
pub const SNAPSHOT_INDEX_KEY: &str = "snapshots:index";

/// Key of the snapshot for `id`.
pub fn snapshot_key(id: &EntityId) -> String {
    format!("snapshot:{id}")
}

/// Connection handle to a `Dragonfly` instance.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at `url` (`redis://host:port[/db]`).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed, or
    /// [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    /// Serialize `value` as JSON and store it at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the write fails.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), DbError> {
        let json = serde_json::to_string(value)?;
        let _: () = self.client.set(key, json.as_str(), None, None, false).await?;
        Ok(())
    }

    /// Read and deserialize the JSON value at `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the read or deserialization fails.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DbError> {
        let value: Option<String> = self.client.get(key).await?;
        value
            .map(|s| serde_json::from_str(&s).map_err(DbError::from))
            .transpose()
    }

    /// Flush all keys. Only for tests.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the flush fails.
    pub async fn flush_all(&self) -> Result<(), DbError> {
        let _: () = self.client.flushall(false).await?;
        Ok(())
    }

    /// The underlying [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

/// Snapshot repository backed by `Dragonfly`.
#[derive(Clone)]
pub struct DragonflySnapshotRepository {
    pool: DragonflyPool,
}

impl DragonflySnapshotRepository {
    /// Create a repository on `pool`.
    pub const fn new(pool: DragonflyPool) -> Self {
        Self { pool }
    }

    /// Fetch one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the read or deserialization fails.
    pub async fn fetch(&self, id: &EntityId) -> Result<Option<Snapshot>, DbError> {
        self.pool.get_json(&snapshot_key(id)).await
    }

    /// Fetch every indexed snapshot passing `filter`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a read fails or an indexed id is invalid.
    pub async fn fetch_all(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>, DbError> {
        let members: Vec<String> = self.pool.client.smembers(SNAPSHOT_INDEX_KEY).await?;
        let mut ids = members
            .iter()
            .map(|m| {
                m.parse::<EntityId>()
                    .map_err(|e: IdError| DbError::InvalidRow(format!("{SNAPSHOT_INDEX_KEY}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        ids.retain(|id| filter.matches(id));
        ids.sort();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(snapshot_key).collect();
        let values: Vec<Option<String>> = self.pool.client.mget(keys).await?;
        let mut snapshots = Vec::with_capacity(values.len());
        // An indexed id without a value was deleted between the two reads.
        for json in values.into_iter().flatten() {
            snapshots.push(serde_json::from_str(&json)?);
        }
        Ok(snapshots)
    }

    /// Store `snapshots` and index their ids in one `MULTI` transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the transaction fails.
    pub async fn upsert_batch(&self, snapshots: &[Snapshot]) -> Result<(), DbError> {
        if snapshots.is_empty() {
            return Ok(());
        }
        let encoded = snapshots
            .iter()
            .map(|s| Ok((snapshot_key(&s.id), s.id.to_string(), serde_json::to_string(s)?)))
            .collect::<Result<Vec<_>, DbError>>()?;

        let trx = self.pool.client.multi();
        for (key, id, json) in &encoded {
            let _: () = trx.set(key.as_str(), json.as_str(), None, None, false).await?;
            let _: () = trx.sadd(SNAPSHOT_INDEX_KEY, id.as_str()).await?;
        }
        let _: Value = trx.exec(true).await?;

        tracing::debug!(count = snapshots.len(), "Upserted snapshots (MULTI)");
        Ok(())
    }

    /// Delete one snapshot and its index entry.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the transaction fails.
    pub async fn remove(&self, id: &EntityId) -> Result<(), DbError> {
        let trx = self.pool.client.multi();
        let _: () = trx.del(snapshot_key(id)).await?;
        let _: () = trx.srem(SNAPSHOT_INDEX_KEY, id.to_string()).await?;
        let _: Value = trx.exec(true).await?;
        Ok(())
    }
}

impl SnapshotRepository for DragonflySnapshotRepository {
    async fn get(&self, id: &EntityId) -> Result<Option<Snapshot>, RepositoryError> {
        Ok(self.fetch(id).await?)
    }

    async fn list(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>, RepositoryError> {
        Ok(self.fetch_all(filter).await?)
    }

    async fn upsert(&self, snapshots: &[Snapshot]) -> Result<(), RepositoryError> {
        Ok(self.upsert_batch(snapshots).await?)
    }

    async fn delete(&self, id: &EntityId) -> Result<(), RepositoryError> {
        Ok(self.remove(id).await?)
    }
}
