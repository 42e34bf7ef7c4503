//! Error types for the indexer binary.
//!
//! [`IndexerError`] wraps every failure mode of startup and the main loop
//! so `main` can propagate with `?`.

/// Top-level error for the indexer binary.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: points_core::ConfigError,
    },

    /// Boost source or store construction failed.
    #[error("boost error: {source}")]
    Boost {
        /// The underlying boost error.
        #[from]
        source: points_boost::BoostError,
    },

    /// The data layer failed.
    #[error("database error: {source}")]
    Db {
        /// The underlying data layer error.
        #[from]
        source: points_db::DbError,
    },

    /// Chain access setup failed.
    #[error("chain error: {source}")]
    Chain {
        /// The underlying chain error.
        #[from]
        source: points_chain::ChainError,
    },

    /// The accrual engine failed.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: points_core::EngineError,
    },

    /// NATS connection or messaging failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the NATS failure.
        message: String,
    },

    /// A NATS message could not be decoded.
    #[error("invalid message: {source}")]
    Message {
        /// The underlying decode error.
        #[from]
        source: serde_json::Error,
    },

    /// Logging could not be initialized.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}
