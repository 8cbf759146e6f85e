use pricewatch_core::ErrorCategory;
use thiserror::Error;

/// Errors raised while fetching or extracting a page.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("fetch timed out after {timeout_secs}s: {url}")]
    FetchTimeout { url: String, timeout_secs: u64 },

    #[error("invalid target url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("target {url} points at non-public address {host}")]
    UnroutableAddress { url: String, host: String },

    #[error("dns lookup failed for {host}")]
    Dns {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("rate limiter shut down")]
    LimiterClosed,
}

impl ScrapeError {
    /// Outcome category this error maps to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Http(err) if err.is_timeout() => ErrorCategory::Timeout,
            Self::FetchTimeout { .. } => ErrorCategory::Timeout,
            // A URL that cannot be fetched at all is a broken link, not a
            // transient network problem.
            Self::InvalidUrl { .. } | Self::UnroutableAddress { .. } => ErrorCategory::NotFound,
            Self::Http(_) | Self::Dns { .. } | Self::LimiterClosed => ErrorCategory::Network,
        }
    }
}
