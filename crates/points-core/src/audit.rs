//! Destinations for `point_update` audit records.
//!
//! The engine never reads records back; downstream aggregation owns them.

use std::future::Future;

use points_types::{AuditRecord, POINT_UPDATE_EVENT};
use tokio::sync::Mutex;

use crate::error::AuditError;

/// Tracing target under which [`TracingAuditSink`] emits records.
pub const AUDIT_TARGET: &str = "points::audit";

/// Accepts audit records.
pub trait AuditSink: Send + Sync {
    /// Record one audit entry.
    fn emit(&self, record: &AuditRecord) -> impl Future<Output = Result<(), AuditError>> + Send;

    /// Record several entries. The default emits them one by one.
    fn emit_all(
        &self,
        records: &[AuditRecord],
    ) -> impl Future<Output = Result<(), AuditError>> + Send {
        async move {
            for record in records {
                self.emit(record).await?;
            }
            Ok(())
        }
    }
}

/// Emits each record as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    async fn emit(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let payload =
            serde_json::to_string(record).map_err(|e| AuditError::Sink(e.to_string()))?;
        tracing::info!(
            target: AUDIT_TARGET,
            event = POINT_UPDATE_EVENT,
            entity = %record.entity_id,
            account = %record.account,
            trigger = %record.trigger,
            points = %record.points,
            multiplier = %record.multiplier,
            record = %payload,
        );
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record emitted so far, in order.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

impl AuditSink for MemoryAuditSink {
    async fn emit(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn emit_all(&self, records: &[AuditRecord]) -> Result<(), AuditError> {
        self.records.lock().await.extend_from_slice(records);
        Ok(())
    }
}
