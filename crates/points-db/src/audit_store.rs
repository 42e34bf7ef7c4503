//! Append-only `point_updates` audit table.

use points_core::{AuditError, AuditSink};
use points_types::AuditRecord;
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::error::DbError;

/// Audit sink writing `point_update` records to `PostgreSQL`.
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    /// Create a sink on `pool`.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert `records` in one statement. Re-inserting an existing record id
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the insert fails.
    pub async fn insert_batch(&self, records: &[AuditRecord]) -> Result<(), DbError> {
        if records.is_empty() {
            return Ok(());
        }

        let len = records.len();
        let mut ids = Vec::with_capacity(len);
        let mut entity_ids = Vec::with_capacity(len);
        let mut accounts = Vec::with_capacity(len);
        let mut triggers = Vec::with_capacity(len);
        let mut points = Vec::with_capacity(len);
        let mut multipliers = Vec::with_capacity(len);
        let mut befores = Vec::with_capacity(len);
        let mut afters = Vec::with_capacity(len);
        let mut boosts = Vec::with_capacity(len);
        let mut recorded = Vec::with_capacity(len);

        for record in records {
            ids.push(record.id);
            entity_ids.push(record.entity_id.to_string());
            accounts.push(record.account.clone());
            triggers.push(record.trigger.clone());
            points.push(record.points);
            multipliers.push(record.multiplier);
            befores.push(serde_json::to_value(&record.before)?);
            afters.push(serde_json::to_value(&record.after)?);
            boosts.push(serde_json::to_value(&record.boosts)?);
            recorded.push(record.recorded_at);
        }

        sqlx::query(
            r"INSERT INTO point_updates
                (id, entity_id, account, trigger, points, multiplier,
                 before, after, boosts, recorded_at)
              SELECT * FROM UNNEST(
                $1::UUID[], $2::TEXT[], $3::TEXT[], $4::TEXT[], $5::NUMERIC[],
                $6::NUMERIC[], $7::JSONB[], $8::JSONB[], $9::JSONB[], $10::TIMESTAMPTZ[])
              ON CONFLICT (id) DO NOTHING",
        )
        .bind(&ids)
        .bind(&entity_ids)
        .bind(&accounts)
        .bind(&triggers)
        .bind(&points)
        .bind(&multipliers)
        .bind(&befores)
        .bind(&afters)
        .bind(&boosts)
        .bind(&recorded)
        .execute(&self.pool)
        .await?;

        tracing::debug!(count = len, "Inserted point updates (batch UNNEST)");
        Ok(())
    }

    /// Sum of points recorded for `account`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn total_points(&self, account: &str) -> Result<Decimal, DbError> {
        let total: Option<Decimal> =
            sqlx::query_scalar("SELECT SUM(points) FROM point_updates WHERE account = $1")
                .bind(account.to_ascii_lowercase())
                .fetch_one(&self.pool)
                .await?;
        Ok(total.unwrap_or(Decimal::ZERO))
    }
}

impl AuditSink for PgAuditSink {
    async fn emit(&self, record: &AuditRecord) -> Result<(), AuditError> {
        Ok(self.insert_batch(std::slice::from_ref(record)).await?)
    }

    async fn emit_all(&self, records: &[AuditRecord]) -> Result<(), AuditError> {
        Ok(self.insert_batch(records).await?)
    }
}
