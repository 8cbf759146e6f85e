//! Category-aware retry policy.
//!
//! `decide` is a pure function of (category, attempts so far) so every
//! branch is testable without clocks or sleeps. The engine adds jitter when
//! it actually sleeps.

use std::time::Duration;

use pricewatch_core::{ErrorCategory, TerminalReason};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the fetch after the given delay.
    RetryAfter(Duration),
    /// Stop this run. `Some` means the target should be marked terminal.
    GiveUp(Option<TerminalReason>),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_base: Duration,
    rate_limit_base: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(
        max_retries: u32,
        backoff_base: Duration,
        rate_limit_base: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self {
            max_retries,
            backoff_base,
            rate_limit_base,
            max_backoff,
        }
    }

    /// Decides the next step after attempt number `attempts` (1-based)
    /// failed with `category`.
    #[must_use]
    pub fn decide(&self, category: ErrorCategory, attempts: u32) -> RetryDecision {
        use ErrorCategory as C;
        match category {
            C::Network | C::Timeout | C::ServerError => {
                if attempts < self.max_retries {
                    RetryDecision::RetryAfter(self.backoff(self.backoff_base, attempts))
                } else {
                    RetryDecision::GiveUp(None)
                }
            }
            C::RateLimited => {
                if attempts < self.max_retries {
                    RetryDecision::RetryAfter(self.backoff(self.rate_limit_base, attempts))
                } else {
                    RetryDecision::GiveUp(None)
                }
            }
            // One immediate retry; some denials are per-request flukes.
            C::Forbidden => {
                if attempts < 2 {
                    RetryDecision::RetryAfter(Duration::ZERO)
                } else {
                    RetryDecision::GiveUp(Some(TerminalReason::NeedsReview))
                }
            }
            C::NotFound => RetryDecision::GiveUp(Some(TerminalReason::BrokenLink)),
            C::Blocked | C::Challenged => {
                RetryDecision::GiveUp(Some(TerminalReason::NeedsReview))
            }
            // Healable and budget categories never retry within a run; the
            // page will not change between back-to-back fetches.
            C::ParseFailure
            | C::ValidationFailure
            | C::StructureChange
            | C::RegenerationFailed
            | C::BudgetExhausted => RetryDecision::GiveUp(None),
        }
    }

    fn backoff(&self, base: Duration, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        base.saturating_mul(2u32.saturating_pow(exp)).min(self.max_backoff)
    }
}
