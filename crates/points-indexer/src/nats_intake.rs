//! NATS message intake.
//!
//! Chain event adapters publish one JSON message per occurrence. Triggers
//! arrive on subjects under `points.triggers.` (for example
//! `points.triggers.transfer`); a heartbeat is a trigger with no entities
//! that only carries the current block time. Raw token transfers for the
//! boost producer arrive under `points.transfers.`. Each subscription
//! covers a whole subtree and yields messages in arrival order.

use std::marker::PhantomData;

use futures::StreamExt as _;
use points_boost::Transfer;
use points_core::Trigger;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::IndexerError;

/// Subscription yielding decoded `T` messages.
pub struct Subscription<T> {
    subscriber: async_nats::Subscriber,
    message: PhantomData<fn() -> T>,
}

/// Trigger intake for the accrual engine.
pub type TriggerConsumer = Subscription<Trigger>;

/// Transfer intake for the boost producer.
pub type TransferConsumer = Subscription<Transfer>;

impl<T: DeserializeOwned> Subscription<T> {
    /// Subscribe to `subject` on `client`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Nats`] if the subscription fails.
    pub async fn subscribe(
        client: &async_nats::Client,
        subject: &str,
    ) -> Result<Self, IndexerError> {
        let subscriber = client
            .subscribe(subject.to_owned())
            .await
            .map_err(|e| IndexerError::Nats {
                message: format!("failed to subscribe to {subject}: {e}"),
            })?;
        info!(subject = subject, "subscribed");
        Ok(Self {
            subscriber,
            message: PhantomData,
        })
    }

    /// The next message, decoded. `None` once the subscription closes.
    ///
    /// Cancel-safe: dropping the future before it resolves loses nothing.
    pub async fn next(&mut self) -> Option<Result<T, IndexerError>> {
        let message = self.subscriber.next().await?;
        debug!(subject = %message.subject, bytes = message.payload.len(), "message received");
        Some(decode(&message.payload))
    }
}

/// Connect to the NATS server at `url`.
///
/// # Errors
///
/// Returns [`IndexerError::Nats`] if the connection fails.
pub async fn connect(url: &str) -> Result<async_nats::Client, IndexerError> {
    info!(url = url, "connecting to NATS server");
    async_nats::connect(url).await.map_err(|e| IndexerError::Nats {
        message: format!("failed to connect to {url}: {e}"),
    })
}

/// Decode a JSON message payload.
///
/// # Errors
///
/// Returns [`IndexerError::Message`] if the payload is not a JSON `T`.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, IndexerError> {
    Ok(serde_json::from_slice(payload)?)
}
