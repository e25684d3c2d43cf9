//! Classification of alloy transport errors.

use alloy_json_rpc::RpcError as JsonRpcError;
use alloy_transport::{TransportError, TransportErrorKind};
use std::time::Duration;
use txsweep_core::RpcError;

/// JSON-RPC error code some providers use for rate limiting.
const RATE_LIMIT_CODE: i64 = -32005;

/// Wording that marks a message as a rate limit. A bare `429` is not enough, since it can
/// show up inside revert data or hashes.
const RATE_LIMIT_PHRASES: [&str; 8] = [
    "rate limit",
    "too many requests",
    "quota exceeded",
    "status 429",
    "status code 429",
    "http 429",
    "\"code\":429",
    "\"code\":-32005",
];

/// Maps an alloy [`TransportError`] onto the pipeline's [`RpcError`].
///
/// Rate limits are recognized by HTTP status 429, error code `-32005`, or the wording of the
/// message, since some providers answer with a body that does not parse as a JSON-RPC response.
pub fn classify(err: TransportError) -> RpcError {
    match err {
        JsonRpcError::ErrorResp(payload) => {
            if payload.code == 429
                || payload.code == RATE_LIMIT_CODE
                || mentions_rate_limit(&payload.message)
            {
                RpcError::RateLimited { retry_after: parse_retry_after(&payload.message) }
            } else {
                RpcError::Other(payload.to_string())
            }
        }
        JsonRpcError::NullResp => RpcError::NotFound,
        JsonRpcError::DeserError { err, text } => {
            if mentions_rate_limit(&text) {
                RpcError::RateLimited { retry_after: parse_retry_after(&text) }
            } else {
                RpcError::Malformed(err.to_string())
            }
        }
        JsonRpcError::Transport(kind) => classify_transport(kind),
        other => RpcError::Other(other.to_string()),
    }
}

fn classify_transport(kind: TransportErrorKind) -> RpcError {
    match kind {
        TransportErrorKind::HttpError(http) if http.status == 429 => {
            RpcError::RateLimited { retry_after: parse_retry_after(&http.body) }
        }
        TransportErrorKind::HttpError(http) if http.status >= 500 => {
            RpcError::Connection(format!("HTTP {}: {}", http.status, http.body))
        }
        TransportErrorKind::HttpError(http) => {
            RpcError::Other(format!("HTTP {}: {}", http.status, http.body))
        }
        TransportErrorKind::BackendGone => {
            RpcError::Connection("backend connection task has stopped".into())
        }
        TransportErrorKind::Custom(err) => {
            if let Some(err) = err.downcast_ref::<reqwest::Error>() {
                if err.is_timeout() {
                    return RpcError::Timeout;
                }
                return RpcError::Connection(err.to_string());
            }
            let message = err.to_string();
            if message.contains("timed out") {
                RpcError::Timeout
            } else if mentions_rate_limit(&message) {
                RpcError::RateLimited { retry_after: parse_retry_after(&message) }
            } else {
                RpcError::Connection(message)
            }
        }
        other => RpcError::Other(other.to_string()),
    }
}

fn mentions_rate_limit(text: &str) -> bool {
    let text = text.to_ascii_lowercase().replace("\": ", "\":");
    RATE_LIMIT_PHRASES.iter().any(|phrase| text.contains(phrase))
}

/// Extracts a wait hint such as `retry after 3s`, `retry-after: 1500ms` or
/// `try again in 2 seconds` from an error message.
pub fn parse_retry_after(text: &str) -> Option<Duration> {
    let text = text.to_ascii_lowercase();
    let rest = ["retry after", "retry-after", "try again in"]
        .iter()
        .find_map(|marker| text.find(marker).map(|at| &text[at + marker.len()..]))?;
    let rest = rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace());

    let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let amount: u64 = rest[..digits].parse().ok()?;
    let unit = rest[digits..].trim_start();
    if unit.starts_with("ms") || unit.starts_with("milli") {
        Some(Duration::from_millis(amount))
    } else {
        Some(Duration::from_secs(amount))
    }
}
