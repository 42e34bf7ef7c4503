//! Paginated boost sources.
//!
//! A source answers one page of boost rows per call; [`crate::BoostStore`]
//! drives the pagination. The HTTP implementation speaks the two analytics
//! endpoint styles the boost program exposes: a raw SQL endpoint returning
//! the full time series, and a user-boosts endpoint returning only the
//! latest state per account.

use std::future::Future;
use std::time::Duration;

use points_types::{Account, BoostFlags, TimestampMilli};
use serde_json::Value;

use crate::error::BoostError;

/// Environment variable holding the boost source credential.
pub const API_KEY_ENV: &str = "BOOSTS_API_KEY";

/// Bound on a single page request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One row from a boost source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoostRow {
    /// The boosted account.
    pub account: Account,
    /// When the row became active; absent for latest-only sources.
    pub timestamp_milli: Option<TimestampMilli>,
    /// Active boosts.
    pub flags: BoostFlags,
}

/// A paginated source of boost rows.
pub trait BoostSource: Send + Sync {
    /// Fetch up to `limit` rows starting at `offset`, as of `as_of`.
    ///
    /// A page shorter than `limit` marks the end of the data.
    fn fetch_page(
        &self,
        offset: usize,
        limit: usize,
        as_of: TimestampMilli,
    ) -> impl Future<Output = Result<Vec<BoostRow>, BoostError>> + Send;
}

/// Request and response shape of the HTTP boost endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStyle {
    /// SQL execute endpoint returning the full time series.
    SqlQuery,
    /// User-boosts endpoint returning the latest state per account.
    UserBoosts,
}

impl EndpointStyle {
    /// Boost columns the endpoint can answer. The SQL table predates the
    /// `hyperliquid` boost and never carries it.
    pub const fn served_flags(self) -> &'static [&'static str] {
        match self {
            Self::SqlQuery => &["dinero", "blueprint"],
            Self::UserBoosts => &["dinero", "blueprint", "hyperliquid"],
        }
    }
}

/// Boost source backed by an HTTP analytics endpoint.
pub struct HttpBoostSource {
    client: reqwest::Client,
    url: String,
    api_key: String,
    style: EndpointStyle,
    table: String,
    flags: Vec<String>,
}

impl HttpBoostSource {
    /// Create a source for `url`.
    ///
    /// `table` is only used by [`EndpointStyle::SqlQuery`]. `flags` names
    /// the boost columns to read.
    ///
    /// # Errors
    ///
    /// Returns [`BoostError::MissingCredential`] when `api_key` is absent or
    /// empty, [`BoostError::Policy`] when the table or a flag name is not a
    /// plain identifier, and [`BoostError::Http`] if the HTTP client cannot
    /// be built.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        style: EndpointStyle,
        table: &str,
        flags: Vec<String>,
    ) -> Result<Self, BoostError> {
        let api_key = api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(BoostError::MissingCredential(API_KEY_ENV))?;
        if !is_identifier(table) {
            return Err(BoostError::Policy(format!("invalid boost table name: {table}")));
        }
        if let Some(bad) = flags.iter().find(|f| !is_identifier(f)) {
            return Err(BoostError::Policy(format!("invalid boost flag name: {bad}")));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BoostError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_owned(),
            api_key,
            style,
            table: table.to_owned(),
            flags,
        })
    }

    /// Create a source reading its credential from [`API_KEY_ENV`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::new`].
    pub fn from_env(
        url: &str,
        style: EndpointStyle,
        table: &str,
        flags: Vec<String>,
    ) -> Result<Self, BoostError> {
        Self::new(url, std::env::var(API_KEY_ENV).ok(), style, table, flags)
    }

    fn request_body(&self, offset: usize, limit: usize, as_of: TimestampMilli) -> Value {
        match self.style {
            EndpointStyle::SqlQuery => serde_json::json!({
                "sqlQuery": {
                    "sql": history_sql(&self.table, &self.flags, offset, limit),
                    "size": limit,
                }
            }),
            EndpointStyle::UserBoosts => serde_json::json!({
                "limit": limit,
                "offset": offset,
                "timestamp": as_of.as_u64() / 1000,
            }),
        }
    }
}

impl BoostSource for HttpBoostSource {
    async fn fetch_page(
        &self,
        offset: usize,
        limit: usize,
        as_of: TimestampMilli,
    ) -> Result<Vec<BoostRow>, BoostError> {
        let body = self.request_body(offset, limit, as_of);

        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BoostError::Http(format!("request to {} failed: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(BoostError::Http(format!("{} returned {status}: {error_body}", self.url)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| BoostError::MalformedResponse(format!("response is not JSON: {e}")))?;

        parse_rows(&json, self.style, &self.flags)
    }
}

/// SQL selecting one page of the boost time series, oldest first.
fn history_sql(table: &str, flags: &[String], offset: usize, limit: usize) -> String {
    let columns: String = flags.iter().map(|f| format!(", {f}")).collect();
    format!(
        "select lower(account) as account, \
         toUnixTimestamp(timestamp) * 1000 as timestampMilli{columns} \
         from {table} order by timestamp asc limit {limit} offset {offset}"
    )
}

/// Extract boost rows from an endpoint response.
///
/// # Errors
///
/// Returns [`BoostError::MalformedResponse`] when the `result` object is
/// missing or a row has no account.
pub fn parse_rows(
    json: &Value,
    style: EndpointStyle,
    flags: &[String],
) -> Result<Vec<BoostRow>, BoostError> {
    let result = match style {
        EndpointStyle::SqlQuery => json.get("result"),
        EndpointStyle::UserBoosts => json.get("syncSqlResponse").and_then(|r| r.get("result")),
    }
    .filter(|r| r.is_object())
    .ok_or_else(|| BoostError::MalformedResponse("response has no result object".to_owned()))?;

    let Some(rows) = result.get("rows").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    rows.iter()
        .map(|row| {
            let account = row
                .get("account")
                .and_then(Value::as_str)
                .map(Account::new)
                .ok_or_else(|| {
                    BoostError::MalformedResponse(format!("row without account: {row}"))
                })?;
            let timestamp_milli = row.get("timestampMilli").and_then(as_millis);
            let flags = flags
                .iter()
                .filter(|flag| {
                    let column = match style {
                        EndpointStyle::SqlQuery => (*flag).clone(),
                        EndpointStyle::UserBoosts => format!("{flag}_boost"),
                    };
                    row.get(column).is_some_and(is_active)
                })
                .cloned()
                .collect();
            Ok(BoostRow {
                account,
                timestamp_milli,
                flags,
            })
        })
        .collect()
}

/// A fixed in-memory boost source, paginated like a remote one.
#[derive(Debug, Clone, Default)]
pub struct StaticBoostSource {
    rows: Vec<BoostRow>,
}

impl StaticBoostSource {
    /// Serve `rows` in the given order.
    pub const fn new(rows: Vec<BoostRow>) -> Self {
        Self { rows }
    }
}

impl BoostSource for StaticBoostSource {
    async fn fetch_page(
        &self,
        offset: usize,
        limit: usize,
        _as_of: TimestampMilli,
    ) -> Result<Vec<BoostRow>, BoostError> {
        Ok(self.rows.iter().skip(offset).take(limit).cloned().collect())
    }
}

fn as_millis(value: &Value) -> Option<TimestampMilli> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(f64_to_millis)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .map(TimestampMilli)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn f64_to_millis(f: f64) -> u64 {
    f.trunc() as u64
}

fn is_active(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => {
            n.as_u64() == Some(1) || n.as_f64().is_some_and(|f| (f - 1.0).abs() < f64::EPSILON)
        }
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
