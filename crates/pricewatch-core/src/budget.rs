//! Shared daily token budget for model-assisted extraction.
//!
//! The budget is injected (`Arc<CostBudget>`) into every caller rather than
//! accessed as a hidden singleton. Reads and decrements are atomic across
//! concurrent workers; when exhausted, callers degrade to "skip, report
//! deferred" rather than blocking or erroring.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, DurationRound, Utc};

/// Process-wide daily budget of model-extraction tokens.
///
/// Resets lazily at the UTC-midnight boundary: the first check after the
/// boundary passes restores the full allowance.
#[derive(Debug)]
pub struct CostBudget {
    daily_limit: i64,
    remaining: AtomicI64,
    window_start: Mutex<DateTime<Utc>>,
}

impl CostBudget {
    #[must_use]
    pub fn new(daily_limit: i64) -> Self {
        Self {
            daily_limit,
            remaining: AtomicI64::new(daily_limit),
            window_start: Mutex::new(utc_midnight(Utc::now())),
        }
    }

    /// Attempts to consume `tokens` from today's allowance.
    ///
    /// Returns `false` when the allowance is spent; the caller should defer
    /// the work to the next window, not fail it.
    pub fn try_consume(&self, tokens: i64) -> bool {
        self.roll_window(Utc::now());
        let prev = self.remaining.fetch_sub(tokens, Ordering::SeqCst);
        if prev < tokens {
            // Raced past zero; undo so later smaller requests can still fit.
            self.remaining.fetch_add(tokens, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Records tokens spent by a call whose cost was only known afterwards.
    pub fn record_spent(&self, tokens: i64) {
        self.roll_window(Utc::now());
        self.remaining.fetch_sub(tokens, Ordering::SeqCst);
    }

    /// Tokens still available in the current window. May be negative when a
    /// metered call overshot the allowance.
    pub fn remaining(&self) -> i64 {
        self.roll_window(Utc::now());
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() <= 0
    }

    fn roll_window(&self, now: DateTime<Utc>) {
        let boundary = utc_midnight(now);
        let mut start = match self.window_start.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *start < boundary {
            *start = boundary;
            self.remaining.store(self.daily_limit, Ordering::SeqCst);
        }
    }

    #[cfg(test)]
    fn backdate_window(&self, days: i64) {
        let mut start = self.window_start.lock().unwrap();
        *start -= Duration::days(days);
    }
}

fn utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::days(1)).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_within_limit_succeeds() {
        let budget = CostBudget::new(100);
        assert!(budget.try_consume(60));
        assert!(budget.try_consume(40));
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn consume_past_limit_is_refused_and_rolled_back() {
        let budget = CostBudget::new(100);
        assert!(budget.try_consume(80));
        assert!(!budget.try_consume(30));
        // The refused request must not eat into the allowance.
        assert_eq!(budget.remaining(), 20);
        assert!(budget.try_consume(20));
    }

    #[test]
    fn exhausted_reports_true_at_zero() {
        let budget = CostBudget::new(10);
        assert!(!budget.is_exhausted());
        assert!(budget.try_consume(10));
        assert!(budget.is_exhausted());
    }

    #[test]
    fn record_spent_may_overshoot() {
        let budget = CostBudget::new(10);
        budget.record_spent(25);
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), -15);
    }

    #[test]
    fn window_rollover_restores_allowance() {
        let budget = CostBudget::new(50);
        assert!(budget.try_consume(50));
        assert!(budget.is_exhausted());
        budget.backdate_window(1);
        assert_eq!(budget.remaining(), 50);
        assert!(budget.try_consume(50));
    }
}
