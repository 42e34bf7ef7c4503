//! Points indexer binary.
//!
//! Wires the accrual engine to its collaborators and drives it from three
//! sources: trigger messages on NATS, a reconciliation timer that keeps
//! accrual moving for idle entities, and a boost refresh timer. When the
//! boost producer is enabled, transfer messages also feed it.
//! Reconciliation runs at the newest chain time carried by a trigger, so a
//! node lagging the wall clock never has points accrued past its head.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `points-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Build the boost source and load the first boost table
//! 4. Connect storage backends
//! 5. Create the chain valuation provider
//! 6. Assemble the accrual engine
//! 7. Subscribe to triggers on NATS
//! 8. Start the boost producer, when enabled
//! 9. Run the event loop until interrupted

mod backends;
mod chain_time;
mod error;
mod nats_intake;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use points_boost::{
    BoostProducer, BoostSource, BoostStore, HttpBoostSource, SystemClock, Transfer,
};
use points_chain::{Erc20HoldingProvider, RpcClient};
use points_core::config::LoggingConfig;
use points_core::{
    AccrualEngine, AuditSink, IndexerConfig, SnapshotFilter, SnapshotRepository, Trigger,
    ValuationProvider,
};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::backends::{BoostEvents, BoostSnapshots};
use crate::chain_time::ChainTime;
use crate::error::IndexerError;
use crate::nats_intake::{TransferConsumer, TriggerConsumer};

/// Environment variable naming the configuration file.
const CONFIG_PATH_ENV: &str = "POINTS_CONFIG";

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "points-config.yaml";

/// The boost producer as wired by this binary.
type Producer = BoostProducer<RpcClient, BoostSnapshots, BoostEvents>;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any startup step fails. Failures inside the event
/// loop are logged and the loop continues.
#[tokio::main]
async fn main() -> Result<(), IndexerError> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging)?;
    info!(
        program = config.program.name,
        daily_points_rate = %config.program.daily_points_rate,
        reconcile_interval_secs = config.program.reconcile_interval_secs,
        "points-indexer starting"
    );

    // 3. Build the boost source and load the first table. A missing
    //    credential or unreachable source stops startup here.
    let policy = config.multiplier.policy();
    let source = HttpBoostSource::from_env(
        &config.boosts.url,
        config.boosts.style,
        &config.boosts.table,
        policy.flag_names(),
    )?;
    let boosts = Arc::new(BoostStore::new(
        source,
        config.boosts.store,
        Arc::new(SystemClock),
    )?);
    boosts.init().await?;
    info!(
        accounts = boosts.account_count().await,
        mode = ?config.boosts.store.mode,
        "Boost table loaded"
    );

    // 4. Connect storage backends.
    let backends = backends::connect(&config.infrastructure).await?;

    // 5. Create the chain valuation provider.
    let valuations = Erc20HoldingProvider::new(
        RpcClient::new(&config.chain.rpc_url)?,
        &config.chain.token,
        config.chain.decimals,
        config.chain.usd_price,
    )?;
    info!(
        rpc_url = config.chain.rpc_url,
        token = config.chain.token,
        "Chain valuation provider configured"
    );

    // 6. Assemble the accrual engine.
    let engine = AccrualEngine::new(
        valuations,
        backends.snapshots,
        backends.audit,
        boosts,
        policy,
        config.program.daily_points_rate,
    )
    .with_max_concurrency(config.program.max_concurrency);

    // 7. Subscribe to triggers.
    let nats = nats_intake::connect(&config.infrastructure.nats_url).await?;
    let triggers =
        TriggerConsumer::subscribe(&nats, &config.infrastructure.trigger_subject).await?;

    // 8. Start the boost producer.
    let (producer, transfers) = if config.producer.enabled {
        let rpc_url = config
            .producer
            .rpc_url
            .as_deref()
            .unwrap_or(&config.chain.rpc_url);
        let (snapshots, events) = backends::producer_backends(backends.postgres.as_ref());
        let producer = BoostProducer::new(
            RpcClient::new(rpc_url)?,
            snapshots,
            events,
            config.producer.rules.clone(),
        )?;
        let transfers =
            TransferConsumer::subscribe(&nats, &config.producer.transfer_subject).await?;
        info!(
            rpc_url = rpc_url,
            rules = producer.rules().len(),
            "Boost producer started"
        );
        (Some(producer), Some(transfers))
    } else {
        (None, None)
    };

    // 9. Run until interrupted.
    let filter = config
        .program
        .pool
        .as_deref()
        .map_or_else(SnapshotFilter::all, SnapshotFilter::pool);
    let intake = Intake {
        triggers,
        transfers,
        producer: producer.as_ref(),
    };
    run(&engine, intake, &config, &filter).await;

    if let Some(pg) = backends.postgres {
        pg.close().await;
    }
    info!("points-indexer shutdown complete");
    Ok(())
}

/// Load the configuration named by the first argument, `POINTS_CONFIG`, or
/// `points-config.yaml`, in that order. A missing default file yields the
/// built-in defaults.
fn load_config() -> Result<IndexerConfig, IndexerError> {
    let explicit = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
    let path = explicit
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    if explicit.is_some() || path.exists() {
        Ok(IndexerConfig::from_file(&path)?)
    } else {
        Ok(IndexerConfig::parse("")?)
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `logging.level`.
fn init_logging(config: &LoggingConfig) -> Result<(), IndexerError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| IndexerError::Logging {
        message: e.to_string(),
    })
}

/// Message sources for the event loop.
struct Intake<'a> {
    triggers: TriggerConsumer,
    transfers: Option<TransferConsumer>,
    producer: Option<&'a Producer>,
}

/// The next transfer, or never when the producer is off.
async fn next_transfer(
    transfers: Option<&mut TransferConsumer>,
) -> Option<Result<Transfer, IndexerError>> {
    match transfers {
        Some(consumer) => consumer.next().await,
        None => std::future::pending().await,
    }
}

/// The event loop. Messages, timer ticks, and shutdown are handled one at a
/// time, which keeps evaluations of the same entity in trigger order.
async fn run<V, R, A, S>(
    engine: &AccrualEngine<V, R, A, S>,
    mut intake: Intake<'_>,
    config: &IndexerConfig,
    filter: &SnapshotFilter,
) where
    V: ValuationProvider,
    R: SnapshotRepository,
    A: AuditSink,
    S: BoostSource,
{
    let mut reconcile = tokio::time::interval(Duration::from_secs(
        config.program.reconcile_interval_secs.max(1),
    ));
    reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut refresh = tokio::time::interval(Duration::from_millis(
        config.boosts.store.refresh_interval_ms.max(1),
    ));
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Both intervals fire immediately; the boost table is already fresh and
    // nothing is tracked yet on a cold start.
    reconcile.tick().await;
    refresh.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut chain_time = ChainTime::default();
    let mut transfers_open = intake.transfers.is_some();

    info!("Entering event loop");
    loop {
        tokio::select! {
            message = intake.triggers.next() => match message {
                Some(Ok(trigger)) => {
                    chain_time.observe(trigger.timestamp_milli);
                    if !trigger.entities.is_empty() {
                        handle_trigger(engine, &trigger).await;
                    }
                }
                Some(Err(e)) => warn!(error = %e, "Dropping undecodable trigger"),
                None => {
                    warn!("Trigger subscription closed");
                    break;
                }
            },
            message = next_transfer(intake.transfers.as_mut()), if transfers_open => {
                match (message, intake.producer) {
                    (Some(Ok(transfer)), Some(producer)) => {
                        handle_transfer(producer, &transfer).await;
                    }
                    (Some(Err(e)), _) => warn!(error = %e, "Dropping undecodable transfer"),
                    (None, _) => {
                        warn!("Transfer subscription closed; boost production stopped");
                        transfers_open = false;
                    }
                    (Some(Ok(_)), None) => {}
                }
            }
            _ = reconcile.tick() => match chain_time.latest() {
                Some(at) => {
                    if let Err(e) = engine.reconcile(at, filter).await {
                        error!(error = %e, "Reconciliation pass failed");
                    }
                }
                None => info!("No trigger seen yet; skipping reconciliation"),
            },
            _ = refresh.tick() => match engine.boosts().refresh().await {
                Ok(()) => info!(
                    accounts = engine.boosts().account_count().await,
                    "Boost table refreshed"
                ),
                Err(e) => warn!(error = %e, "Scheduled boost refresh failed"),
            },
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }
}

async fn handle_transfer(producer: &Producer, transfer: &Transfer) {
    match producer.on_transfer(transfer).await {
        Ok(changed) if !changed.is_empty() => info!(
            token = %transfer.token,
            at = %transfer.timestamp_milli,
            changed = changed.len(),
            "Boost records updated"
        ),
        Ok(_) => {}
        Err(e) => error!(
            token = %transfer.token,
            from = %transfer.from,
            to = %transfer.to,
            error = %e,
            "Boost production failed for transfer"
        ),
    }
}

async fn handle_trigger<V, R, A, S>(engine: &AccrualEngine<V, R, A, S>, trigger: &Trigger)
where
    V: ValuationProvider,
    R: SnapshotRepository,
    A: AuditSink,
    S: BoostSource,
{
    match engine.handle_trigger(trigger).await {
        Ok(report) => {
            for failure in &report.failed {
                warn!(
                    trigger = %trigger.label,
                    entity = %failure.entity,
                    error = %failure.error,
                    "Entity evaluation failed; it will be retried on its next trigger"
                );
            }
            info!(
                trigger = %trigger.label,
                at = %trigger.timestamp_milli,
                updated = report.updated.len(),
                removed = report.removed.len(),
                failed = report.failed.len(),
                points = %report.points,
                "Trigger processed"
            );
        }
        Err(e) => error!(trigger = %trigger.label, error = %e, "Trigger batch failed"),
    }
}
