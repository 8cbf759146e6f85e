//! Maps a failed run's category and counters to the recovery action.

use pricewatch_core::{ErrorCategory, FailureCounter, TerminalReason};

#[derive(Debug, Clone, Copy)]
pub struct HealingPolicy {
    /// Consecutive failures before regeneration is considered.
    pub failure_threshold: u32,
    /// Regeneration attempts before the target leaves rotation.
    pub max_healing_attempts: u32,
}

/// What the batch runner should do after recording a failed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Nothing beyond the recorded failure; the next run may recover.
    Wait,
    /// Regenerate the domain's selectors.
    TriggerHeal,
    /// Take the target out of rotation.
    MarkTerminal(TerminalReason),
}

/// Decides the follow-up for a failure. `counter` is the state *after* the
/// failure was counted.
#[must_use]
pub fn next_action(
    category: ErrorCategory,
    counter: FailureCounter,
    policy: &HealingPolicy,
) -> NextAction {
    use ErrorCategory as C;
    match category {
        C::NotFound => NextAction::MarkTerminal(TerminalReason::BrokenLink),
        // Forbidden reaches here only after its single retry failed too.
        C::Blocked | C::Challenged | C::Forbidden => {
            NextAction::MarkTerminal(TerminalReason::NeedsReview)
        }
        C::ParseFailure | C::ValidationFailure | C::StructureChange => {
            if counter.consecutive_failures < policy.failure_threshold {
                NextAction::Wait
            } else if counter.healing_attempts >= policy.max_healing_attempts {
                NextAction::MarkTerminal(TerminalReason::NeedsAttention)
            } else {
                NextAction::TriggerHeal
            }
        }
        // Transient infrastructure trouble; selectors are not the problem.
        C::Network | C::Timeout | C::ServerError | C::RateLimited => NextAction::Wait,
        // Deferrals and internal healing bookkeeping never escalate here.
        C::BudgetExhausted | C::RegenerationFailed => NextAction::Wait,
    }
}
