//! Error types for chain access.

/// Errors that can occur while talking to a chain node.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The HTTP request failed or returned a non-success status.
    #[error("RPC transport error: {0}")]
    Http(String),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the node.
        message: String,
    },

    /// The response did not have the expected shape.
    #[error("Malformed RPC response: {0}")]
    MalformedResponse(String),

    /// An address is not a 20-byte hex string.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// A quantity does not fit the target numeric type.
    #[error("Quantity out of range: {0}")]
    Overflow(String),
}
