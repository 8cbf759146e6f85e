//! Failure taxonomy shared by the extraction, healing, and scheduling layers.
//!
//! Every failed attempt resolves to exactly one [`ErrorCategory`]. The
//! category decides whether the failure is retried locally, absorbed into
//! the healing cycle, or surfaced as a terminal state.

use serde::{Deserialize, Serialize};

/// Category of an extraction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connection-level failure (DNS, reset, TLS).
    Network,
    /// Fetch or operation deadline elapsed.
    Timeout,
    /// HTTP 5xx from the origin.
    ServerError,
    /// HTTP 429, or 503 carrying a rate-limit marker.
    RateLimited,
    /// HTTP 403 without a challenge page.
    Forbidden,
    /// HTTP 404; the product page is gone.
    NotFound,
    /// Anti-bot wall, login wall, or access-denied page.
    Blocked,
    /// CAPTCHA or interactive challenge page.
    Challenged,
    /// No strategy produced a complete field set.
    ParseFailure,
    /// A price was extracted but fell outside the plausible range.
    ValidationFailure,
    /// Previously working selectors now match nothing on a page that loads fine.
    StructureChange,
    /// A selector regeneration attempt failed.
    RegenerationFailed,
    /// The daily model-extraction budget is spent; work is deferred, not failed.
    BudgetExhausted,
}

impl ErrorCategory {
    /// Transient categories are retried locally per the retry table and never
    /// surfaced beyond a log record unless retries are exhausted.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::Timeout
                | Self::ServerError
                | Self::RateLimited
                | Self::Forbidden
        )
    }

    /// Healable categories feed the counter-and-healing cycle instead of
    /// immediate retry.
    #[must_use]
    pub fn is_healable(self) -> bool {
        matches!(
            self,
            Self::ParseFailure | Self::ValidationFailure | Self::StructureChange
        )
    }

    /// Non-transient, non-healable categories surface immediately as terminal
    /// states with no healing attempt.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::NotFound | Self::Blocked | Self::Challenged)
    }
}

/// Why a target was marked terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// 404 with zero retries; the URL no longer resolves to a product.
    BrokenLink,
    /// Blocked or challenged; a human must decide how to proceed.
    NeedsReview,
    /// Healing attempts exhausted; manual retry required.
    NeedsAttention,
}
