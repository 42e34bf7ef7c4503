//! Configured storage backends.
//!
//! The engine is generic over its repository and audit sink; the backend
//! is chosen at runtime from `infrastructure`, so each concern gets an enum
//! that dispatches to the selected implementation. The boost producer's
//! store and sink follow the same pattern.

use points_boost::{
    BoostError, BoostEventSink, BoostSnapshotStore, MemoryBoostSnapshotStore,
    TracingBoostEventSink,
};
use points_core::config::{AuditBackend, InfrastructureConfig, SnapshotBackend};
use points_core::{
    AuditError, AuditSink, MemorySnapshotRepository, RepositoryError, SnapshotFilter,
    SnapshotRepository, TracingAuditSink,
};
use points_db::{
    DragonflyPool, DragonflySnapshotRepository, PgAuditSink, PgBoostEventSink,
    PgBoostSnapshotStore, PgSnapshotRepository, PostgresPool,
};
use points_types::{Account, AuditRecord, BoostRecord, EntityId, Snapshot};
use tracing::info;

use crate::error::IndexerError;

/// The configured snapshot repository.
pub enum SnapshotStore {
    /// In-process map.
    Memory(MemorySnapshotRepository),
    /// `snapshots` table.
    Postgres(PgSnapshotRepository),
    /// Dragonfly keys.
    Dragonfly(DragonflySnapshotRepository),
}

impl SnapshotRepository for SnapshotStore {
    async fn get(&self, id: &EntityId) -> Result<Option<Snapshot>, RepositoryError> {
        match self {
            Self::Memory(repo) => repo.get(id).await,
            Self::Postgres(repo) => repo.get(id).await,
            Self::Dragonfly(repo) => repo.get(id).await,
        }
    }

    async fn list(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>, RepositoryError> {
        match self {
            Self::Memory(repo) => repo.list(filter).await,
            Self::Postgres(repo) => repo.list(filter).await,
            Self::Dragonfly(repo) => repo.list(filter).await,
        }
    }

    async fn upsert(&self, snapshots: &[Snapshot]) -> Result<(), RepositoryError> {
        match self {
            Self::Memory(repo) => repo.upsert(snapshots).await,
            Self::Postgres(repo) => repo.upsert(snapshots).await,
            Self::Dragonfly(repo) => repo.upsert(snapshots).await,
        }
    }

    async fn delete(&self, id: &EntityId) -> Result<(), RepositoryError> {
        match self {
            Self::Memory(repo) => repo.delete(id).await,
            Self::Postgres(repo) => repo.delete(id).await,
            Self::Dragonfly(repo) => repo.delete(id).await,
        }
    }
}

/// The configured audit destination.
pub enum AuditDestination {
    /// Structured log events.
    Tracing(TracingAuditSink),
    /// `point_updates` table.
    Postgres(PgAuditSink),
}

impl AuditSink for AuditDestination {
    async fn emit(&self, record: &AuditRecord) -> Result<(), AuditError> {
        match self {
            Self::Tracing(sink) => sink.emit(record).await,
            Self::Postgres(sink) => sink.emit(record).await,
        }
    }

    async fn emit_all(&self, records: &[AuditRecord]) -> Result<(), AuditError> {
        match self {
            Self::Tracing(sink) => sink.emit_all(records).await,
            Self::Postgres(sink) => sink.emit_all(records).await,
        }
    }
}

/// Where the boost producer keeps the latest record per account.
pub enum BoostSnapshots {
    /// In-process map.
    Memory(MemoryBoostSnapshotStore),
    /// `boost_snapshots` table.
    Postgres(PgBoostSnapshotStore),
}

impl BoostSnapshotStore for BoostSnapshots {
    async fn get(&self, account: &Account) -> Result<Option<BoostRecord>, BoostError> {
        match self {
            Self::Memory(store) => store.get(account).await,
            Self::Postgres(store) => store.get(account).await,
        }
    }

    async fn upsert(&self, records: &[BoostRecord]) -> Result<(), BoostError> {
        match self {
            Self::Memory(store) => store.upsert(records).await,
            Self::Postgres(store) => store.upsert(records).await,
        }
    }
}

/// Where the boost producer sends changes.
pub enum BoostEvents {
    /// Structured log events.
    Tracing(TracingBoostEventSink),
    /// `boosts` table.
    Postgres(PgBoostEventSink),
}

impl BoostEventSink for BoostEvents {
    async fn emit(&self, record: &BoostRecord) -> Result<(), BoostError> {
        match self {
            Self::Tracing(sink) => sink.emit(record).await,
            Self::Postgres(sink) => sink.emit(record).await,
        }
    }
}

/// Producer storage: the `PostgreSQL` tables when a pool is connected,
/// otherwise process memory and log events.
pub fn producer_backends(postgres: Option<&PostgresPool>) -> (BoostSnapshots, BoostEvents) {
    match postgres {
        Some(pg) => (
            BoostSnapshots::Postgres(pg.boost_snapshots()),
            BoostEvents::Postgres(pg.boost_events()),
        ),
        None => (
            BoostSnapshots::Memory(MemoryBoostSnapshotStore::new()),
            BoostEvents::Tracing(TracingBoostEventSink),
        ),
    }
}

/// Connected backends. Holds the `PostgreSQL` pool, when one is used, so
/// it can be closed on shutdown.
pub struct Backends {
    /// Snapshot repository.
    pub snapshots: SnapshotStore,
    /// Audit destination.
    pub audit: AuditDestination,
    /// Shared `PostgreSQL` pool.
    pub postgres: Option<PostgresPool>,
}

/// Whether `infra` needs a `PostgreSQL` connection.
pub fn needs_postgres(infra: &InfrastructureConfig) -> bool {
    infra.snapshot_backend == SnapshotBackend::Postgres
        || infra.audit_backend == AuditBackend::Postgres
}

/// Connect the backends selected in `infra`, running migrations when
/// `PostgreSQL` is used.
///
/// # Errors
///
/// Returns [`IndexerError::Db`] if a connection or migration fails.
pub async fn connect(infra: &InfrastructureConfig) -> Result<Backends, IndexerError> {
    let postgres = if needs_postgres(infra) {
        Some(PostgresPool::open(infra).await?)
    } else {
        None
    };

    let snapshots = match (infra.snapshot_backend, &postgres) {
        (SnapshotBackend::Postgres, Some(pg)) => {
            SnapshotStore::Postgres(pg.snapshots())
        }
        (SnapshotBackend::Dragonfly, _) => {
            let pool = DragonflyPool::connect(&infra.dragonfly_url).await?;
            SnapshotStore::Dragonfly(DragonflySnapshotRepository::new(pool))
        }
        (SnapshotBackend::Memory | SnapshotBackend::Postgres, _) => {
            SnapshotStore::Memory(MemorySnapshotRepository::new())
        }
    };

    let audit = match (infra.audit_backend, &postgres) {
        (AuditBackend::Postgres, Some(pg)) => {
            AuditDestination::Postgres(pg.audit_sink())
        }
        (AuditBackend::Tracing | AuditBackend::Postgres, _) => {
            AuditDestination::Tracing(TracingAuditSink)
        }
    };

    info!(
        snapshot_backend = ?infra.snapshot_backend,
        audit_backend = ?infra.audit_backend,
        "Storage backends connected"
    );
    Ok(Backends {
        snapshots,
        audit,
        postgres,
    })
}
