use std::time::Duration;
use thiserror::Error;

/// Longest slice of a raw reply body carried inside a `Parse` error.
pub const SNIPPET_LIMIT: usize = 200;

/// Failure of a single pod RPC call.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("{method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("rpc error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("unparseable reply ({reason}): {snippet}")]
    Parse { reason: String, snippet: String },
}

impl RpcError {
    pub fn parse(reason: impl Into<String>, body: &str) -> Self {
        RpcError::Parse {
            reason: reason.into(),
            snippet: truncate_snippet(body),
        }
    }
}

/// Bounded view of a reply body for diagnostics.
pub fn truncate_snippet(body: &str) -> String {
    match body.char_indices().nth(SNIPPET_LIMIT) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    /// Every bootstrap candidate errored or returned an empty roster.
    /// `errors` holds one message per candidate, in the order they were tried.
    #[error("all {} bootstrap candidates failed", errors.len())]
    AllBootstrapsFailed { errors: Vec<String> },
}

/// Errors that escape a poll cycle.
#[derive(Debug, Clone, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MonitorError {
    /// Machine-readable failure status for API consumers.
    pub fn status(&self) -> &'static str {
        match self {
            MonitorError::Discovery(DiscoveryError::AllBootstrapsFailed { .. }) => {
                "bootstrap_failed"
            }
            MonitorError::Internal(_) => "internal_error",
        }
    }

    pub fn diagnostics(&self) -> Vec<String> {
        match self {
            MonitorError::Discovery(DiscoveryError::AllBootstrapsFailed { errors }) => {
                errors.clone()
            }
            MonitorError::Internal(msg) => vec![msg.clone()],
        }
    }
}
