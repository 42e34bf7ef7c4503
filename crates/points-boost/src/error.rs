//! Error types for boost refresh and policy validation.

/// Errors that can occur while refreshing or querying boosts.
#[derive(Debug, thiserror::Error)]
pub enum BoostError {
    /// The boost source credential is not configured.
    #[error("boost source credential missing: set {0}")]
    MissingCredential(&'static str),

    /// The boost source could not be reached or returned an error status.
    #[error("boost source request failed: {0}")]
    Http(String),

    /// The boost source answered with a payload that could not be read.
    #[error("malformed boost source response: {0}")]
    MalformedResponse(String),

    /// A refresh did not finish within the configured timeout.
    #[error("boost refresh timed out after {after_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        after_ms: u64,
    },

    /// An on-chain balance read failed while producing boost flags.
    #[error("balance read failed: {0}")]
    Balance(String),

    /// The producer's boost storage failed.
    #[error("boost storage error: {0}")]
    Storage(String),

    /// Refresh failed and the last good table is older than the hard
    /// staleness bound.
    #[error("boost table is {age_ms}ms old and refresh failed: {source}")]
    Stale {
        /// Age of the last good table.
        age_ms: u64,
        /// The refresh failure.
        source: Box<BoostError>,
    },

    /// The multiplier policy or store configuration is invalid.
    #[error("invalid boost configuration: {0}")]
    Policy(String),
}
