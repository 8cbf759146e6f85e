//! Cadence validation and next-due math.
//!
//! Cron expressions are the 6-field form with seconds first, matching the
//! job scheduler. A schedule is accepted only when every gap between
//! consecutive occurrences is at least the configured minimum, and each
//! target gets a deterministic jitter offset so a whole store's products do
//! not land on the site in the same second.

use chrono::{DateTime, Duration, Utc};
use croner::Cron;
use pricewatch_core::ScheduleSpec;
use thiserror::Error;
use uuid::Uuid;

/// Occurrence pairs examined when validating the minimum interval.
const VALIDATION_LOOKAHEAD: usize = 5;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("schedule {expr:?} runs more often than every {min_hours}h")]
    IntervalTooShort { expr: String, min_hours: i64 },
}

fn parse(expr: &str) -> Result<Cron, ScheduleError> {
    Cron::new(expr)
        .with_seconds_optional()
        .parse()
        .map_err(|e| ScheduleError::InvalidCron {
            expr: expr.to_owned(),
            reason: e.to_string(),
        })
}

/// Accepts a cron expression only if consecutive occurrences are always at
/// least `min_interval` apart.
///
/// # Errors
///
/// [`ScheduleError::InvalidCron`] when the expression does not parse,
/// [`ScheduleError::IntervalTooShort`] when it fires too often.
pub fn validate_cron(expr: &str, min_interval: Duration) -> Result<(), ScheduleError> {
    let cron = parse(expr)?;
    let mut cursor = Utc::now();
    let mut previous: Option<DateTime<Utc>> = None;
    for _ in 0..=VALIDATION_LOOKAHEAD {
        let next = cron
            .find_next_occurrence(&cursor, false)
            .map_err(|e| ScheduleError::InvalidCron {
                expr: expr.to_owned(),
                reason: e.to_string(),
            })?;
        if let Some(prev) = previous {
            if next - prev < min_interval {
                return Err(ScheduleError::IntervalTooShort {
                    expr: expr.to_owned(),
                    min_hours: min_interval.num_hours(),
                });
            }
        }
        previous = Some(next);
        cursor = next;
    }
    Ok(())
}

/// Effective cadence for a target: its own schedule beats the store's,
/// which beats the system default.
#[must_use]
pub fn resolve_cron<'a>(
    product: Option<&'a ScheduleSpec>,
    store: Option<&'a ScheduleSpec>,
    default_cron: &'a str,
) -> &'a str {
    product
        .map(|s| s.cron.as_str())
        .or_else(|| store.map(|s| s.cron.as_str()))
        .unwrap_or(default_cron)
}

/// Deterministic per-target jitter in `-max_minutes..=max_minutes`. The
/// same target always gets the same offset, so due times stay stable
/// across restarts.
#[must_use]
pub fn jitter_for(target: Uuid, max_minutes: i64) -> Duration {
    if max_minutes <= 0 {
        return Duration::zero();
    }
    let span = 2 * max_minutes + 1;
    #[allow(clippy::cast_possible_wrap)]
    let hash = (target.as_u128() % u128::try_from(span).unwrap_or(1)) as i64;
    Duration::minutes(hash - max_minutes)
}

/// Next due time for a target after `after`, with its jitter applied.
///
/// # Errors
///
/// Returns [`ScheduleError::InvalidCron`] when the expression is unusable.
pub fn next_due(
    expr: &str,
    after: DateTime<Utc>,
    target: Uuid,
    max_jitter_minutes: i64,
) -> Result<DateTime<Utc>, ScheduleError> {
    let cron = parse(expr)?;
    let base = cron
        .find_next_occurrence(&after, false)
        .map_err(|e| ScheduleError::InvalidCron {
            expr: expr.to_owned(),
            reason: e.to_string(),
        })?;
    Ok(base + jitter_for(target, max_jitter_minutes))
}
