//! Error types for ModelRelay.

/// Top-level error type for the proxy core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),
}

/// Configuration-related errors.
///
/// Only schema-level problems (wrong types, unreadable files) surface as
/// errors; missing providers or unmapped statuses fall back to defaults.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Unsupported configuration format: {path}")]
    UnsupportedFormat { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by an [`Upstream`](crate::routing::Upstream) attempt.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    Status {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpstreamError {
    /// HTTP status associated with this failure, when one was observed.
    ///
    /// Transport failures without a response resolve to `None`; the router
    /// treats them with the conservative per-route default action.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// One attempted route, recorded for the exhaustion surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteAttempt {
    /// Provider the attempt ran against.
    pub provider: String,
    /// Provider-side model name.
    pub model: String,
    /// Last HTTP status observed on this route, if any request was sent.
    pub last_status: Option<u16>,
}

impl std::fmt::Display for RouteAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.last_status {
            Some(status) => write!(f, "{}/{} ({})", self.provider, self.model, status),
            None => write!(f, "{}/{} (no attempt)", self.provider, self.model),
        }
    }
}

/// Routing errors surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(
        "All routes exhausted for model {logical_model} after {} attempt(s)",
        .attempts.len()
    )]
    Exhausted {
        logical_model: String,
        /// Every route that was attempted, in order.
        attempts: Vec<RouteAttempt>,
        /// Status of the last upstream failure, if any request was sent.
        final_status: Option<u16>,
    },

    #[error("No routes configured for model {logical_model}")]
    NoRoutes { logical_model: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for the proxy core.
pub type Result<T> = std::result::Result<T, Error>;
