//! Per-domain user-agent assignment.
//!
//! Each domain keeps a sticky agent so a session looks like one browser,
//! not a new one per request. Block responses count against the current
//! agent; after enough of them the domain rotates to its least-burned
//! alternative, and a success wipes the current agent's slate.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

/// Block responses on one agent before the domain rotates away from it.
const ROTATE_AFTER_FAILURES: u32 = 3;

/// Realistic desktop browsers to fall back to when the configured agent
/// starts drawing blocks.
const ALTERNATE_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

struct DomainAssignment {
    current: usize,
    /// Block count per agent index.
    failures: Vec<u32>,
}

pub struct UserAgentPool {
    agents: Vec<String>,
    domains: Mutex<HashMap<String, DomainAssignment>>,
}

impl UserAgentPool {
    /// Builds a pool with `primary` (the configured agent) tried first.
    #[must_use]
    pub fn new(primary: impl Into<String>) -> Self {
        let primary = primary.into();
        let mut agents = vec![primary.clone()];
        agents.extend(
            ALTERNATE_AGENTS
                .iter()
                .map(|a| (*a).to_owned())
                .filter(|a| *a != primary),
        );
        Self {
            agents,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// The agent currently assigned to `domain`. Stable across calls until
    /// failures force a rotation.
    #[must_use]
    pub fn agent_for(&self, domain: &str) -> String {
        let mut domains = lock(&self.domains);
        let assignment = domains
            .entry(domain.to_owned())
            .or_insert_with(|| DomainAssignment {
                current: 0,
                failures: vec![0; self.agents.len()],
            });
        self.agents[assignment.current].clone()
    }

    /// Clears the block count of the domain's current agent.
    pub fn report_success(&self, domain: &str) {
        let mut domains = lock(&self.domains);
        if let Some(assignment) = domains.get_mut(domain) {
            assignment.failures[assignment.current] = 0;
        }
    }

    /// Counts a block response against the domain's current agent and
    /// rotates to the least-blocked agent once the threshold is reached.
    pub fn report_failure(&self, domain: &str) {
        let mut domains = lock(&self.domains);
        let Some(assignment) = domains.get_mut(domain) else {
            return;
        };
        assignment.failures[assignment.current] += 1;
        if assignment.failures[assignment.current] < ROTATE_AFTER_FAILURES {
            return;
        }
        let least_burned = assignment
            .failures
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != assignment.current)
            .min_by_key(|(_, count)| **count)
            .map(|(index, _)| index);
        if let Some(next) = least_burned {
            debug!(domain, from = assignment.current, to = next, "rotating user agent");
            assignment.current = next;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
