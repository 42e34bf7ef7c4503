//! Durable snapshot repository on the `snapshots` table.
//!
//! One row per tracked entity, replaced on every evaluation. Batch upserts
//! go through a single `UNNEST` insert inside a transaction, so a trigger's
//! replacements land together or not at all.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use points_core::{RepositoryError, SnapshotFilter, SnapshotRepository};
use points_types::{Account, EntityId, Holdings, IdError, Snapshot, TimestampMilli};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::error::DbError;

/// A row of the `snapshots` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    /// Entity id in its string form.
    pub id: String,
    /// Entity kind (`account`, `pool_share`, `position`).
    pub kind: String,
    /// Pool address for pool shares.
    pub pool: Option<String>,
    /// Evaluation time in milliseconds.
    pub timestamp_milli: i64,
    /// Controlling account, if any.
    pub owner: Option<String>,
    /// Accrual basis value.
    pub value: Decimal,
    /// Named raw amounts as a JSON object of decimal strings.
    pub amounts: serde_json::Value,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl SnapshotRow {
    /// Decode the row into a [`Snapshot`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidRow`] if the id, kind, or timestamp is
    /// inconsistent, or [`DbError::Serialization`] if `amounts` is not a map
    /// of decimals.
    pub fn into_snapshot(self) -> Result<Snapshot, DbError> {
        let id: EntityId = self
            .id
            .parse()
            .map_err(|e: IdError| DbError::InvalidRow(format!("{}: {e}", self.id)))?;
        if id.kind().as_str() != self.kind {
            return Err(DbError::InvalidRow(format!(
                "{} stored with kind {}, expected {}",
                self.id,
                self.kind,
                id.kind().as_str()
            )));
        }
        let timestamp_milli = u64::try_from(self.timestamp_milli).map_err(|e| {
            DbError::InvalidRow(format!("{} timestamp {}: {e}", self.id, self.timestamp_milli))
        })?;
        let amounts: BTreeMap<String, Decimal> = serde_json::from_value(self.amounts)?;
        Ok(Snapshot::new(
            id,
            TimestampMilli(timestamp_milli),
            self.owner.as_deref().map(Account::new),
            Holdings {
                value: self.value,
                amounts,
            },
        ))
    }
}

/// Snapshot repository backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PgSnapshotRepository {
    pool: PgPool,
}

impl PgSnapshotRepository {
    /// Create a repository on `pool`.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or the row is invalid.
    pub async fn fetch(&self, id: &EntityId) -> Result<Option<Snapshot>, DbError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r"SELECT id, kind, pool, timestamp_milli, owner, value, amounts, updated_at
              FROM snapshots
              WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(SnapshotRow::into_snapshot).transpose()
    }

    /// Fetch every snapshot passing `filter`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or a row is invalid.
    pub async fn fetch_all(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>, DbError> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r"SELECT id, kind, pool, timestamp_milli, owner, value, amounts, updated_at
              FROM snapshots
              WHERE ($1::TEXT IS NULL OR kind = $1)
                AND ($2::TEXT IS NULL OR pool = $2)
              ORDER BY id",
        )
        .bind(filter.kind.map(|k| k.as_str().to_owned()))
        .bind(filter.pool.as_ref().map(ToString::to_string))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SnapshotRow::into_snapshot).collect()
    }

    /// Insert or replace `snapshots` in one transaction. When an id appears
    /// more than once the last occurrence wins.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the insert fails.
    pub async fn upsert_batch(&self, snapshots: &[Snapshot]) -> Result<(), DbError> {
        if snapshots.is_empty() {
            return Ok(());
        }
        let latest: BTreeMap<&EntityId, &Snapshot> =
            snapshots.iter().map(|s| (&s.id, s)).collect();

        let len = latest.len();
        let mut ids = Vec::with_capacity(len);
        let mut kinds = Vec::with_capacity(len);
        let mut pools: Vec<Option<String>> = Vec::with_capacity(len);
        let mut timestamps = Vec::with_capacity(len);
        let mut owners: Vec<Option<String>> = Vec::with_capacity(len);
        let mut values = Vec::with_capacity(len);
        let mut amounts = Vec::with_capacity(len);

        for snapshot in latest.values() {
            ids.push(snapshot.id.to_string());
            kinds.push(snapshot.id.kind().as_str().to_owned());
            pools.push(snapshot.id.pool().map(ToString::to_string));
            timestamps.push(i64::try_from(snapshot.timestamp_milli.as_u64()).unwrap_or(i64::MAX));
            owners.push(snapshot.owner.as_ref().map(ToString::to_string));
            values.push(snapshot.holdings.value);
            amounts.push(serde_json::to_value(&snapshot.holdings.amounts)?);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"INSERT INTO snapshots
                (id, kind, pool, timestamp_milli, owner, value, amounts, updated_at)
              SELECT t.id, t.kind, t.pool, t.timestamp_milli, t.owner, t.value, t.amounts, now()
              FROM UNNEST(
                $1::TEXT[], $2::TEXT[], $3::TEXT[], $4::BIGINT[],
                $5::TEXT[], $6::NUMERIC[], $7::JSONB[])
                AS t(id, kind, pool, timestamp_milli, owner, value, amounts)
              ON CONFLICT (id) DO UPDATE SET
                kind = EXCLUDED.kind,
                pool = EXCLUDED.pool,
                timestamp_milli = EXCLUDED.timestamp_milli,
                owner = EXCLUDED.owner,
                value = EXCLUDED.value,
                amounts = EXCLUDED.amounts,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&ids)
        .bind(&kinds)
        .bind(&pools)
        .bind(&timestamps)
        .bind(&owners)
        .bind(&values)
        .bind(&amounts)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::debug!(count = len, "Upserted snapshots (batch UNNEST)");
        Ok(())
    }

    /// Delete one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete fails.
    pub async fn remove(&self, id: &EntityId) -> Result<(), DbError> {
        sqlx::query("DELETE FROM snapshots WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl SnapshotRepository for PgSnapshotRepository {
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

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn row(id: &str, kind: &str) -> SnapshotRow {
        SnapshotRow {
            id: id.to_owned(),
            kind: kind.to_owned(),
            pool: None,
            timestamp_milli: 1_000,
            owner: Some("0xOwner".to_owned()),
            value: dec!(5),
            amounts: serde_json::json!({ "amount0": "2.5", "amount1": "2.5" }),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn decodes_valid_row() {
        let snapshot = row("42", "position").into_snapshot().unwrap();
        assert_eq!(snapshot.id, EntityId::position("42").unwrap());
        assert_eq!(snapshot.timestamp_milli, TimestampMilli(1_000));
        assert_eq!(snapshot.owner, Some(Account::new("0xowner")));
        assert_eq!(snapshot.holdings.amounts.get("amount0"), Some(&dec!(2.5)));
    }

    #[test]
    fn rejects_kind_mismatch_and_bad_timestamps() {
        assert!(matches!(
            row("42", "account").into_snapshot(),
            Err(DbError::InvalidRow(_))
        ));
        let mut negative = row("0xabc", "account");
        negative.timestamp_milli = -1;
        assert!(matches!(negative.into_snapshot(), Err(DbError::InvalidRow(_))));
    }
}
