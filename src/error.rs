//! Error types for the crawl library.

use std::fmt;

use thiserror::Error;

/// Result type alias for crawl operations.
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Errors that can occur during a crawl.
#[derive(Error, Debug)]
pub enum CrawlError {
    /// Fatal startup error (missing or empty proxy file, bad settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every client in the pool has been deactivated.
    #[error("no active proxies left")]
    NoActiveProxies,

    /// The retry budget was exhausted without a successful exchange.
    #[error("all proxies failed for {url}")]
    AllProxiesFailed {
        /// URL of the request that exhausted the pool.
        url: String,
    },

    /// A network failure tagged with a semantic kind.
    #[error("{kind}: {message}")]
    Classified {
        /// Semantic failure category.
        kind: FailureKind,
        /// Human-readable detail.
        message: String,
    },

    /// Response body did not match the expected JSON shape. Never retried.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The caller requested cancellation.
    #[error("operation cancelled")]
    Cancelled,

    /// HTTP request failed at the transport level.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Failed to parse a fetched page.
    #[error("failed to parse page: {0}")]
    Parse(String),
}

/// Semantic category of a failed HTTP exchange.
///
/// Derived from the response status or the error message, first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// 403 or "forbidden" - the proxy is likely blocked.
    Blocked,
    /// 429 or "too many" - rate limited.
    RateLimited,
    /// 401 or "unauthorized".
    Unauthorized,
    /// 404 or "not found".
    NotFound,
    /// 500 or "internal server".
    ServerError,
    /// 502 or "bad gateway".
    BadGateway,
    /// 503 or "service unavailable".
    ServiceUnavailable,
    /// Anything else that broke at the network level.
    Network,
}

impl FailureKind {
    /// Classifies an error message into a failure kind.
    ///
    /// Matching is case-insensitive and ordered; the first matching
    /// pattern decides the kind.
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();

        if message.contains("403") || message.contains("forbidden") {
            FailureKind::Blocked
        } else if message.contains("429") || message.contains("too many") {
            FailureKind::RateLimited
        } else if message.contains("401") || message.contains("unauthorized") {
            FailureKind::Unauthorized
        } else if message.contains("404") || message.contains("not found") {
            FailureKind::NotFound
        } else if message.contains("500") || message.contains("internal server") {
            FailureKind::ServerError
        } else if message.contains("502") || message.contains("bad gateway") {
            FailureKind::BadGateway
        } else if message.contains("503") || message.contains("service unavailable") {
            FailureKind::ServiceUnavailable
        } else {
            FailureKind::Network
        }
    }

    /// Maps a gating status code (401/403/429) to its failure kind.
    pub fn from_gating_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(FailureKind::Unauthorized),
            403 => Some(FailureKind::Blocked),
            429 => Some(FailureKind::RateLimited),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Blocked => "Blocked (403)",
            FailureKind::RateLimited => "Rate Limited (429)",
            FailureKind::Unauthorized => "Unauthorized (401)",
            FailureKind::NotFound => "Not Found (404)",
            FailureKind::ServerError => "Server Error (500)",
            FailureKind::BadGateway => "Bad Gateway (502)",
            FailureKind::ServiceUnavailable => "Service Unavailable (503)",
            FailureKind::Network => "Network Error",
        };
        f.write_str(label)
    }
}
