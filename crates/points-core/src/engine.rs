//! The accrual engine.
//!
//! Each evaluation diffs an entity's prior snapshot against "now": points
//! accrue on the value held during the elapsed interval, the entity is
//! re-valued, and the result is a replacement snapshot (or a removal) plus
//! one audit record. Evaluations of different entities are independent, so
//! a trigger touching several entities evaluates them concurrently and a
//! failure in one never blocks the others.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use futures::future::join_all;
use points_boost::{BoostSource, BoostStore, MultiplierPolicy};
use points_types::{
    Account, AuditRecord, AuditState, EntityId, MILLISECONDS_PER_DAY, NO_OWNER, Snapshot,
    TimestampMilli,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::error::EngineError;
use crate::repository::{SnapshotFilter, SnapshotRepository};
use crate::trigger::{TIME_INTERVAL_TRIGGER, Trigger};
use crate::valuation::{Valuation, ValuationProvider};

/// Default bound on concurrent evaluations during reconciliation.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

// ---------------------------------------------------------------------------
// Points computation
// ---------------------------------------------------------------------------

/// Points accrued between a prior snapshot and an evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accrual {
    /// Time advanced; these points were earned.
    Earned(Decimal),
    /// The evaluation time equals the snapshot time. Nothing accrues.
    SameInstant,
    /// The evaluation time precedes the snapshot time. Nothing accrues.
    ClockRegression,
}

impl Accrual {
    /// The accrued points, zero unless [`Accrual::Earned`].
    pub const fn points(self) -> Decimal {
        match self {
            Self::Earned(points) => points,
            Self::SameInstant | Self::ClockRegression => Decimal::ZERO,
        }
    }
}

/// Points accrued on `prior` up to `now`:
/// `value * rate * elapsed_days * multiplier`.
///
/// The elapsed milliseconds are multiplied in before dividing by the day
/// length, so whole-day intervals are exact.
///
/// # Errors
///
/// Returns [`EngineError::Overflow`] if the decimal math overflows.
pub fn accrued_points(
    prior: &Snapshot,
    now: TimestampMilli,
    daily_points_rate: Decimal,
    multiplier: Decimal,
) -> Result<Accrual, EngineError> {
    let Some(elapsed_ms) = now.checked_since(prior.timestamp_milli) else {
        return Ok(Accrual::ClockRegression);
    };
    if elapsed_ms == 0 {
        return Ok(Accrual::SameInstant);
    }
    prior
        .holdings
        .value
        .checked_mul(daily_points_rate)
        .and_then(|p| p.checked_mul(multiplier))
        .and_then(|p| p.checked_mul(Decimal::from(elapsed_ms)))
        .and_then(|p| p.checked_div(Decimal::from(MILLISECONDS_PER_DAY)))
        .map(Accrual::Earned)
        .ok_or_else(|| EngineError::Overflow {
            entity: prior.id.clone(),
        })
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// An entity whose evaluation failed.
#[derive(Debug)]
pub struct EntityFailure {
    /// The entity.
    pub entity: EntityId,
    /// Why it failed.
    pub error: EngineError,
}

/// Result of processing a trigger or a reconciliation pass.
#[derive(Debug, Default)]
pub struct TriggerReport {
    /// Entities with a replacement snapshot persisted.
    pub updated: Vec<EntityId>,
    /// Entities found to no longer exist.
    pub removed: Vec<EntityId>,
    /// Entities that failed and were left untouched.
    pub failed: Vec<EntityFailure>,
    /// Sum of points accrued across the successful evaluations.
    pub points: Decimal,
}

impl TriggerReport {
    /// Number of entities evaluated, successful or not.
    pub fn evaluated(&self) -> usize {
        self.updated
            .len()
            .saturating_add(self.removed.len())
            .saturating_add(self.failed.len())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

enum Outcome {
    Updated(Snapshot),
    Removed { had_prior: bool },
}

struct Evaluation {
    outcome: Outcome,
    audit: AuditRecord,
}

/// Turns "entity affected at time T" into an audit record and a new snapshot.
pub struct AccrualEngine<V, R, A, S> {
    valuations: V,
    repository: R,
    audit: A,
    boosts: Arc<BoostStore<S>>,
    policy: MultiplierPolicy,
    daily_points_rate: Decimal,
    max_concurrency: usize,
}

impl<V, R, A, S> AccrualEngine<V, R, A, S>
where
    V: ValuationProvider,
    R: SnapshotRepository,
    A: AuditSink,
    S: BoostSource,
{
    /// Create an engine.
    pub const fn new(
        valuations: V,
        repository: R,
        audit: A,
        boosts: Arc<BoostStore<S>>,
        policy: MultiplierPolicy,
        daily_points_rate: Decimal,
    ) -> Self {
        Self {
            valuations,
            repository,
            audit,
            boosts,
            policy,
            daily_points_rate,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Bound concurrent evaluations during reconciliation.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// The snapshot repository.
    pub const fn repository(&self) -> &R {
        &self.repository
    }

    /// The audit sink.
    pub const fn audit_sink(&self) -> &A {
        &self.audit
    }

    /// The boost store.
    pub const fn boosts(&self) -> &Arc<BoostStore<S>> {
        &self.boosts
    }

    /// The multiplier policy.
    pub const fn policy(&self) -> &MultiplierPolicy {
        &self.policy
    }

    /// Points per unit of value per day.
    pub const fn daily_points_rate(&self) -> Decimal {
        self.daily_points_rate
    }

    /// Evaluate `entity` against `prior` at `now` and emit its audit record.
    ///
    /// Returns the replacement snapshot for the caller to persist, or
    /// `None` when the entity no longer exists; in that case the prior
    /// snapshot has already been deleted.
    ///
    /// # Errors
    ///
    /// Valuation, boost, repository, and audit failures propagate. Nothing
    /// is written when valuation fails.
    pub async fn process(
        &self,
        entity: &EntityId,
        prior: Option<&Snapshot>,
        trigger: &str,
        now: TimestampMilli,
    ) -> Result<Option<Snapshot>, EngineError> {
        let evaluation = self.evaluate(entity, prior, trigger, now).await?;
        if matches!(evaluation.outcome, Outcome::Removed { had_prior: true }) {
            self.repository.delete(entity).await?;
        }
        self.audit.emit(&evaluation.audit).await?;
        Ok(match evaluation.outcome {
            Outcome::Updated(snapshot) => Some(snapshot),
            Outcome::Removed { .. } => None,
        })
    }

    /// [`Self::process`] with the prior snapshot loaded from the repository.
    ///
    /// # Errors
    ///
    /// Same as [`Self::process`].
    pub async fn process_loaded(
        &self,
        entity: &EntityId,
        trigger: &str,
        now: TimestampMilli,
    ) -> Result<Option<Snapshot>, EngineError> {
        let prior = self.repository.get(entity).await?;
        self.process(entity, prior.as_ref(), trigger, now).await
    }

    /// Evaluate every entity affected by `trigger` concurrently, persist the
    /// replacements in one batch, then emit the audit records.
    ///
    /// Entities whose evaluation fails are reported in
    /// [`TriggerReport::failed`] and left untouched.
    ///
    /// # Errors
    ///
    /// Only failures to persist the batch or emit its audit records
    /// propagate.
    pub async fn handle_trigger(&self, trigger: &Trigger) -> Result<TriggerReport, EngineError> {
        let entities = trigger.affected();
        let results = join_all(entities.into_iter().map(|entity| async move {
            let result = match self.repository.get(&entity).await {
                Ok(prior) => {
                    self.evaluate(&entity, prior.as_ref(), &trigger.label, trigger.timestamp_milli)
                        .await
                }
                Err(err) => Err(err.into()),
            };
            (entity, result)
        }))
        .await;

        let report = self.commit(results).await?;
        tracing::debug!(
            trigger = %trigger.label,
            at = %trigger.timestamp_milli,
            updated = report.updated.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "trigger handled"
        );
        Ok(report)
    }

    /// Re-evaluate every tracked snapshot passing `filter` at `now`, so
    /// accrual keeps moving for entities without chain activity.
    ///
    /// # Errors
    ///
    /// Same as [`Self::handle_trigger`], plus a failure to list snapshots.
    pub async fn reconcile(
        &self,
        now: TimestampMilli,
        filter: &SnapshotFilter,
    ) -> Result<TriggerReport, EngineError> {
        let snapshots = self.repository.list(filter).await?;
        let results: Vec<_> = futures::stream::iter(snapshots.iter())
            .map(|snapshot| async move {
                let result = self
                    .evaluate(&snapshot.id, Some(snapshot), TIME_INTERVAL_TRIGGER, now)
                    .await;
                (snapshot.id.clone(), result)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let report = self.commit(results).await?;
        tracing::info!(
            at = %now,
            tracked = snapshots.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            points = %report.points,
            "reconciliation pass complete"
        );
        Ok(report)
    }

    async fn evaluate(
        &self,
        entity: &EntityId,
        prior: Option<&Snapshot>,
        trigger: &str,
        now: TimestampMilli,
    ) -> Result<Evaluation, EngineError> {
        // Snapshot times never move backwards.
        let stamped = prior.map_or(now, |p| now.max(p.timestamp_milli));

        let (outcome, after) = match self.valuations.value_of(entity, now).await {
            Valuation::Found(state) => {
                let snapshot = Snapshot::new(entity.clone(), stamped, state.owner, state.holdings);
                let after = AuditState::from_snapshot(&snapshot);
                (Outcome::Updated(snapshot), after)
            }
            Valuation::NotFound => (
                Outcome::Removed {
                    had_prior: prior.is_some(),
                },
                AuditState::terminal(prior, stamped),
            ),
            Valuation::TransientError(detail) => {
                return Err(EngineError::Valuation {
                    entity: entity.clone(),
                    detail,
                });
            }
        };

        // Points belong to whoever held the entity during the interval.
        let credited: Option<Account> = prior
            .and_then(Snapshot::boost_account)
            .or_else(|| match &outcome {
                Outcome::Updated(snapshot) => snapshot.boost_account(),
                Outcome::Removed { .. } => entity.embedded_account(),
            })
            .cloned();
        let applied = self
            .boosts
            .multiplier_at(credited.as_ref(), now, &self.policy)
            .await?;

        let points = match prior {
            None => Decimal::ZERO,
            Some(prior) => {
                let accrual =
                    accrued_points(prior, now, self.daily_points_rate, applied.multiplier)?;
                match accrual {
                    Accrual::ClockRegression => tracing::warn!(
                        entity = %entity,
                        now = %now,
                        snapshot = %prior.timestamp_milli,
                        "evaluation time precedes snapshot, accruing nothing"
                    ),
                    Accrual::SameInstant => {
                        tracing::debug!(entity = %entity, now = %now, "same-instant trigger");
                    }
                    Accrual::Earned(_) => {}
                }
                accrual.points()
            }
        };

        tracing::debug!(
            entity = %entity,
            trigger,
            points = %points,
            multiplier = %applied.multiplier,
            "entity evaluated"
        );

        let audit = AuditRecord {
            id: Uuid::now_v7(),
            entity_id: entity.clone(),
            account: credited.map_or_else(|| NO_OWNER.to_owned(), String::from),
            trigger: trigger.to_owned(),
            points,
            before: prior.map_or_else(AuditState::absent, AuditState::from_snapshot),
            after,
            boosts: applied.record,
            multiplier: applied.multiplier,
            recorded_at: Utc::now(),
        };
        Ok(Evaluation { outcome, audit })
    }

    async fn commit(
        &self,
        results: Vec<(EntityId, Result<Evaluation, EngineError>)>,
    ) -> Result<TriggerReport, EngineError> {
        let mut report = TriggerReport::default();
        let mut snapshots = Vec::new();
        let mut deletions = Vec::new();
        let mut audits = Vec::new();

        for (entity, result) in results {
            match result {
                Ok(Evaluation { outcome, audit }) => {
                    report.points = report.points.saturating_add(audit.points);
                    audits.push(audit);
                    match outcome {
                        Outcome::Updated(snapshot) => snapshots.push(snapshot),
                        Outcome::Removed { had_prior } => {
                            if had_prior {
                                deletions.push(entity.clone());
                            }
                            report.removed.push(entity);
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(entity = %entity, error = %error, "entity evaluation failed");
                    report.failed.push(EntityFailure { entity, error });
                }
            }
        }

        if !snapshots.is_empty() {
            self.repository.upsert(&snapshots).await?;
        }
        for entity in &deletions {
            self.repository.delete(entity).await?;
        }
        if !audits.is_empty() {
            self.audit.emit_all(&audits).await?;
        }

        report.updated = snapshots.into_iter().map(|s| s.id).collect();
        Ok(report)
    }
}
