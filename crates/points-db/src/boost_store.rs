//! Producer-side boost tables: `boost_snapshots` holds the latest record
//! per account, `boosts` receives every change.

use points_boost::{BoostError, BoostEventSink, BoostSnapshotStore};
use points_types::{Account, BoostFlags, BoostRecord, TimestampMilli};
use sqlx::PgPool;

use crate::error::DbError;

/// A row of `boost_snapshots`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BoostSnapshotRow {
    /// Normalized account address.
    pub account: String,
    /// When the record became active.
    pub timestamp_milli: i64,
    /// Active flag names as a JSON array.
    pub flags: serde_json::Value,
}

impl BoostSnapshotRow {
    /// Decode the row into a [`BoostRecord`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidRow`] for a negative timestamp, or
    /// [`DbError::Serialization`] if `flags` is not an array of names.
    pub fn into_record(self) -> Result<BoostRecord, DbError> {
        let timestamp_milli = u64::try_from(self.timestamp_milli).map_err(|e| {
            DbError::InvalidRow(format!("{} timestamp {}: {e}", self.account, self.timestamp_milli))
        })?;
        let flags: BoostFlags = serde_json::from_value(self.flags)?;
        Ok(BoostRecord::new(
            Account::new(&self.account),
            TimestampMilli(timestamp_milli),
            flags,
        ))
    }
}

/// Column arrays for an `UNNEST` insert of boost records.
struct BoostColumns {
    accounts: Vec<String>,
    timestamps: Vec<i64>,
    flags: Vec<serde_json::Value>,
}

impl BoostColumns {
    fn of(records: &[BoostRecord]) -> Result<Self, DbError> {
        let mut columns = Self {
            accounts: Vec::with_capacity(records.len()),
            timestamps: Vec::with_capacity(records.len()),
            flags: Vec::with_capacity(records.len()),
        };
        for record in records {
            columns.accounts.push(record.account.to_string());
            columns
                .timestamps
                .push(i64::try_from(record.timestamp_milli.as_u64()).unwrap_or(i64::MAX));
            columns.flags.push(serde_json::to_value(&record.flags)?);
        }
        Ok(columns)
    }
}

/// Boost snapshot store backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PgBoostSnapshotStore {
    pool: PgPool,
}

impl PgBoostSnapshotStore {
    /// Create a store on `pool`.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch the latest record for `account`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or the row is invalid.
    pub async fn fetch(&self, account: &Account) -> Result<Option<BoostRecord>, DbError> {
        let row = sqlx::query_as::<_, BoostSnapshotRow>(
            r"SELECT account, timestamp_milli, flags
              FROM boost_snapshots
              WHERE account = $1",
        )
        .bind(account.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(BoostSnapshotRow::into_record).transpose()
    }

    /// Insert or replace `records`, keyed by account.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the insert fails.
    pub async fn upsert_batch(&self, records: &[BoostRecord]) -> Result<(), DbError> {
        if records.is_empty() {
            return Ok(());
        }
        let columns = BoostColumns::of(records)?;
        sqlx::query(
            r"INSERT INTO boost_snapshots (account, timestamp_milli, flags, updated_at)
              SELECT t.account, t.timestamp_milli, t.flags, now()
              FROM UNNEST($1::TEXT[], $2::BIGINT[], $3::JSONB[])
                AS t(account, timestamp_milli, flags)
              ON CONFLICT (account) DO UPDATE SET
                timestamp_milli = EXCLUDED.timestamp_milli,
                flags = EXCLUDED.flags,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&columns.accounts)
        .bind(&columns.timestamps)
        .bind(&columns.flags)
        .execute(&self.pool)
        .await?;
        tracing::debug!(count = records.len(), "Upserted boost snapshots");
        Ok(())
    }
}

impl BoostSnapshotStore for PgBoostSnapshotStore {
    async fn get(&self, account: &Account) -> Result<Option<BoostRecord>, BoostError> {
        Ok(self.fetch(account).await?)
    }

    async fn upsert(&self, records: &[BoostRecord]) -> Result<(), BoostError> {
        Ok(self.upsert_batch(records).await?)
    }
}

/// Boost event sink appending to the `boosts` table.
#[derive(Clone)]
pub struct PgBoostEventSink {
    pool: PgPool,
}

impl PgBoostEventSink {
    /// Create a sink on `pool`.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append `records` in one statement.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the insert fails.
    pub async fn append(&self, records: &[BoostRecord]) -> Result<(), DbError> {
        if records.is_empty() {
            return Ok(());
        }
        let columns = BoostColumns::of(records)?;
        sqlx::query(
            r"INSERT INTO boosts (account, timestamp_milli, flags)
              SELECT * FROM UNNEST($1::TEXT[], $2::BIGINT[], $3::JSONB[])",
        )
        .bind(&columns.accounts)
        .bind(&columns.timestamps)
        .bind(&columns.flags)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every change recorded for `account`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or a row is invalid.
    pub async fn history(&self, account: &Account) -> Result<Vec<BoostRecord>, DbError> {
        let rows = sqlx::query_as::<_, BoostSnapshotRow>(
            r"SELECT account, timestamp_milli, flags
              FROM boosts
              WHERE account = $1
              ORDER BY timestamp_milli, recorded_at",
        )
        .bind(account.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BoostSnapshotRow::into_record).collect()
    }
}

impl BoostEventSink for PgBoostEventSink {
    async fn emit(&self, record: &BoostRecord) -> Result<(), BoostError> {
        Ok(self.append(std::slice::from_ref(record)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_flag_array() {
        let row = BoostSnapshotRow {
            account: "0xABC".to_owned(),
            timestamp_milli: 5_000,
            flags: serde_json::json!(["blueprint", "dinero"]),
        };
        let record = row.into_record().unwrap();
        assert_eq!(record.account, Account::new("0xabc"));
        assert_eq!(record.timestamp_milli, TimestampMilli(5_000));
        assert!(record.flags.contains("dinero"));
        assert!(record.flags.contains("blueprint"));
    }

    #[test]
    fn rejects_negative_timestamp_and_non_array_flags() {
        let negative = BoostSnapshotRow {
            account: "0xabc".to_owned(),
            timestamp_milli: -1,
            flags: serde_json::json!([]),
        };
        assert!(matches!(negative.into_record(), Err(DbError::InvalidRow(_))));
        let scalar = BoostSnapshotRow {
            account: "0xabc".to_owned(),
            timestamp_milli: 1,
            flags: serde_json::json!("dinero"),
        };
        assert!(matches!(scalar.into_record(), Err(DbError::Serialization(_))));
    }

    #[test]
    fn columns_follow_record_order() {
        let records = vec![
            BoostRecord::new(Account::new("0xb"), TimestampMilli(2), BoostFlags::none()),
            BoostRecord::new(
                Account::new("0xa"),
                TimestampMilli(1),
                ["dinero"].into_iter().collect(),
            ),
        ];
        let columns = BoostColumns::of(&records).unwrap();
        assert_eq!(columns.accounts, vec!["0xb".to_owned(), "0xa".to_owned()]);
        assert_eq!(columns.timestamps, vec![2, 1]);
        assert_eq!(columns.flags[1], serde_json::json!(["dinero"]));
    }
}
