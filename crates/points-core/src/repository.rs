//! Snapshot persistence interface and the in-memory implementation.

use std::collections::BTreeMap;
use std::future::Future;

use points_types::{Account, EntityId, EntityKind, Snapshot};
use tokio::sync::RwLock;

use crate::error::RepositoryError;

/// Restricts [`SnapshotRepository::list`] results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    /// Only pool shares of this pool.
    pub pool: Option<Account>,
    /// Only entities of this kind.
    pub kind: Option<EntityKind>,
}

impl SnapshotFilter {
    /// Match every snapshot.
    pub const fn all() -> Self {
        Self {
            pool: None,
            kind: None,
        }
    }

    /// Match shares of `pool`.
    pub fn pool(pool: &str) -> Self {
        Self {
            pool: Some(Account::new(pool)),
            kind: Some(EntityKind::PoolShare),
        }
    }

    /// Match entities of `kind`.
    pub const fn kind(kind: EntityKind) -> Self {
        Self {
            pool: None,
            kind: Some(kind),
        }
    }

    /// Whether `id` passes the filter.
    pub fn matches(&self, id: &EntityId) -> bool {
        self.kind.is_none_or(|kind| id.kind() == kind)
            && self.pool.as_ref().is_none_or(|pool| id.pool() == Some(pool))
    }
}

/// Keyed storage of the latest snapshot per entity.
pub trait SnapshotRepository: Send + Sync {
    /// The snapshot for `id`, if one is stored.
    fn get(
        &self,
        id: &EntityId,
    ) -> impl Future<Output = Result<Option<Snapshot>, RepositoryError>> + Send;

    /// Every stored snapshot passing `filter`.
    fn list(
        &self,
        filter: &SnapshotFilter,
    ) -> impl Future<Output = Result<Vec<Snapshot>, RepositoryError>> + Send;

    /// Insert or replace each snapshot. All or none are written.
    fn upsert(
        &self,
        snapshots: &[Snapshot],
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Remove the snapshot for `id`. Removing an absent id succeeds.
    fn delete(&self, id: &EntityId) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// Snapshot repository held in process memory.
#[derive(Debug, Default)]
pub struct MemorySnapshotRepository {
    snapshots: RwLock<BTreeMap<EntityId, Snapshot>>,
}

impl MemorySnapshotRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

impl SnapshotRepository for MemorySnapshotRepository {
    async fn get(&self, id: &EntityId) -> Result<Option<Snapshot>, RepositoryError> {
        Ok(self.snapshots.read().await.get(id).cloned())
    }

    async fn list(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>, RepositoryError> {
        Ok(self
            .snapshots
            .read()
            .await
            .values()
            .filter(|s| filter.matches(&s.id))
            .cloned()
            .collect())
    }

    async fn upsert(&self, snapshots: &[Snapshot]) -> Result<(), RepositoryError> {
        let mut stored = self.snapshots.write().await;
        for snapshot in snapshots {
            stored.insert(snapshot.id.clone(), snapshot.clone());
        }
        Ok(())
    }

    async fn delete(&self, id: &EntityId) -> Result<(), RepositoryError> {
        self.snapshots.write().await.remove(id);
        Ok(())
    }
}
