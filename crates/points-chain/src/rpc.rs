//! Minimal Ethereum JSON-RPC client.
//!
//! Covers only the three calls the indexer needs: `eth_blockNumber`,
//! `eth_getCode`, and `eth_call`. Quantities travel as `0x`-prefixed hex
//! strings in both directions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::ChainError;

/// Bound on a single JSON-RPC request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The block a read is evaluated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    /// The most recent block.
    Latest,
    /// A specific block height.
    Number(u64),
}

impl BlockTag {
    /// The JSON-RPC parameter form.
    pub fn to_param(self) -> String {
        match self {
            Self::Latest => "latest".to_owned(),
            Self::Number(n) => format!("{n:#x}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

/// JSON-RPC client over HTTP.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a client for the node at `url`. Each request is bounded by
    /// [`REQUEST_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Http`] if the HTTP client cannot be built.
    pub fn new(url: &str) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChainError::Http(format!("failed to build RPC client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_owned(),
            next_id: AtomicU64::new(1),
        })
    }

    /// The node URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one JSON-RPC call and decode its `result`.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Http`] on transport failure or non-2xx status,
    /// [`ChainError::Rpc`] if the node returns an error object, or
    /// [`ChainError::MalformedResponse`] if neither `result` nor `error`
    /// decodes.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Http(format!("{method} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(ChainError::Http(format!(
                "{method} returned {status}: {error_body}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChainError::MalformedResponse(format!("{method}: {e}")))?;
        decode_response(method, json)
    }

    /// Height of the latest block.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if the call fails or the quantity is invalid.
    pub async fn block_number(&self) -> Result<u64, ChainError> {
        let hex: String = self.call("eth_blockNumber", serde_json::json!([])).await?;
        parse_quantity(&hex)
    }

    /// Deployed bytecode of `address` at `block`, `0x` when none.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if the call fails.
    pub async fn get_code(&self, address: &str, block: BlockTag) -> Result<String, ChainError> {
        self.call(
            "eth_getCode",
            serde_json::json!([address, block.to_param()]),
        )
        .await
    }

    /// Execute a read-only call of `data` against `to` at `block`.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if the call fails.
    pub async fn eth_call(
        &self,
        to: &str,
        data: &str,
        block: BlockTag,
    ) -> Result<String, ChainError> {
        self.call(
            "eth_call",
            serde_json::json!([{ "to": to, "data": data }, block.to_param()]),
        )
        .await
    }
}

fn decode_response<T: DeserializeOwned>(
    method: &str,
    json: serde_json::Value,
) -> Result<T, ChainError> {
    let response: RpcResponse<T> = serde_json::from_value(json)
        .map_err(|e| ChainError::MalformedResponse(format!("{method}: {e}")))?;
    if let Some(err) = response.error {
        return Err(ChainError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    response
        .result
        .ok_or_else(|| ChainError::MalformedResponse(format!("{method}: missing result")))
}

/// Parse a `0x`-prefixed hex quantity into a `u64`.
///
/// # Errors
///
/// Returns [`ChainError::MalformedResponse`] for non-hex input or
/// [`ChainError::Overflow`] when the value exceeds `u64`.
pub fn parse_quantity(hex: &str) -> Result<u64, ChainError> {
    let value = parse_word(hex)?;
    u64::try_from(value).map_err(|e| ChainError::Overflow(format!("{hex}: {e}")))
}

/// Parse a `0x`-prefixed hex word (quantity or 32-byte return value) into a
/// `u128`. Leading zeros are ignored; `0x` alone is zero.
///
/// # Errors
///
/// Returns [`ChainError::MalformedResponse`] for non-hex input or
/// [`ChainError::Overflow`] when more than 128 significant bits are set.
pub fn parse_word(hex: &str) -> Result<u128, ChainError> {
    let digits = hex
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::MalformedResponse(format!("missing 0x prefix: {hex}")))?;
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Ok(0);
    }
    if significant.len() > 32 {
        return Err(ChainError::Overflow(format!("{hex} exceeds 128 bits")));
    }
    u128::from_str_radix(significant, 16)
        .map_err(|e| ChainError::MalformedResponse(format!("{hex}: {e}")))
}

/// Validate `address` and return its 40 hex digits, lower-cased.
///
/// # Errors
///
/// Returns [`ChainError::InvalidAddress`] unless `address` is `0x` plus 40
/// hex digits.
pub fn address_digits(address: &str) -> Result<String, ChainError> {
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| ChainError::InvalidAddress(address.to_owned()))?;
    if digits.len() != 40 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ChainError::InvalidAddress(address.to_owned()));
    }
    Ok(digits.to_ascii_lowercase())
}

/// Whether `eth_getCode` returned no bytecode.
pub fn is_empty_code(code: &str) -> bool {
    code.strip_prefix("0x")
        .unwrap_or(code)
        .bytes()
        .all(|b| b == b'0')
}
