//! Target lifecycle state, derived from counters rather than stored.

use pricewatch_core::{FailureCounter, TerminalReason};

/// Where a target stands in the failure lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Extracting normally.
    Healthy,
    /// Failing, but below the healing threshold.
    Degraded { failures: u32 },
    /// At or past the threshold; healing is in play.
    AwaitingHeal { attempts: u32 },
    /// Out of rotation until a manual retry.
    Terminal(TerminalReason),
}

impl TargetState {
    /// Derives the state from persisted counters and terminal mark.
    #[must_use]
    pub fn derive(
        terminal: Option<TerminalReason>,
        counter: FailureCounter,
        failure_threshold: u32,
    ) -> Self {
        if let Some(reason) = terminal {
            return Self::Terminal(reason);
        }
        if counter.consecutive_failures == 0 {
            Self::Healthy
        } else if counter.consecutive_failures < failure_threshold {
            Self::Degraded {
                failures: counter.consecutive_failures,
            }
        } else {
            Self::AwaitingHeal {
                attempts: counter.healing_attempts,
            }
        }
    }
}
