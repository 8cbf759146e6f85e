//! Rolling per-domain health, derived from attempt records.
//!
//! Health is advisory: it powers the domain-flagged event and the health
//! read API, and is recomputed from the in-window samples on every read.
//! Budget deferrals are not failures and never count against a domain.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use pricewatch_core::{AttemptRecord, ErrorCategory, HealthEvents, StoreHealth};
use tracing::warn;
use uuid::Uuid;

/// Below this many in-window samples the success rate is too noisy to flag.
const MIN_SAMPLES_TO_FLAG: usize = 5;

#[derive(Default)]
struct DomainWindow {
    samples: VecDeque<(DateTime<Utc>, bool)>,
    last_success_at: Option<DateTime<Utc>>,
    attention: HashSet<Uuid>,
    flagged: bool,
}

pub struct HealthTracker {
    window: Duration,
    flag_rate: f64,
    attention_threshold: usize,
    events: Arc<dyn HealthEvents>,
    domains: Mutex<HashMap<String, DomainWindow>>,
}

impl HealthTracker {
    #[must_use]
    pub fn new(
        window: Duration,
        flag_rate: f64,
        attention_threshold: usize,
        events: Arc<dyn HealthEvents>,
    ) -> Self {
        Self {
            window,
            flag_rate,
            attention_threshold,
            events,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Folds one completed attempt into the domain's window.
    pub async fn record(&self, record: &AttemptRecord) {
        if record.outcome.error == Some(ErrorCategory::BudgetExhausted) {
            return;
        }
        let success = record.outcome.success();

        let flag = {
            let mut domains = lock(&self.domains);
            let window = domains.entry(record.domain.clone()).or_default();
            window.samples.push_back((record.at, success));
            if success {
                window.last_success_at = Some(record.at);
                window.attention.remove(&record.target_id);
            }
            prune(window, Utc::now() - self.window);
            self.flag_change(window)
        };
        self.emit(&record.domain, flag).await;
    }

    /// Notes that a target at this domain was marked needs-attention.
    pub async fn mark_attention(&self, domain: &str, target: Uuid) {
        let flag = {
            let mut domains = lock(&self.domains);
            let window = domains.entry(domain.to_owned()).or_default();
            window.attention.insert(target);
            self.flag_change(window)
        };
        self.emit(domain, flag).await;
    }

    /// Current derived health for a domain.
    #[must_use]
    pub fn health(&self, domain: &str) -> StoreHealth {
        let mut domains = lock(&self.domains);
        let Some(window) = domains.get_mut(domain) else {
            return StoreHealth {
                domain: domain.to_owned(),
                success_rate: 1.0,
                sample_count: 0,
                last_success_at: None,
                flagged: false,
            };
        };
        prune(window, Utc::now() - self.window);
        StoreHealth {
            domain: domain.to_owned(),
            success_rate: success_rate(window),
            sample_count: window.samples.len(),
            last_success_at: window.last_success_at,
            flagged: window.flagged,
        }
    }

    /// Re-evaluates the flag; returns the rate when it just flipped on.
    fn flag_change(&self, window: &mut DomainWindow) -> Option<f64> {
        let rate = success_rate(window);
        let should_flag = (window.samples.len() >= MIN_SAMPLES_TO_FLAG && rate < self.flag_rate)
            || window.attention.len() >= self.attention_threshold;
        let newly_flagged = should_flag && !window.flagged;
        window.flagged = should_flag;
        newly_flagged.then_some(rate)
    }

    async fn emit(&self, domain: &str, flag: Option<f64>) {
        if let Some(rate) = flag {
            warn!(domain, success_rate = rate, "domain flagged as unhealthy");
            self.events.domain_flagged(domain, rate).await;
        }
    }
}

fn prune(window: &mut DomainWindow, cutoff: DateTime<Utc>) {
    while window
        .samples
        .front()
        .is_some_and(|(at, _)| *at < cutoff)
    {
        window.samples.pop_front();
    }
}

fn success_rate(window: &DomainWindow) -> f64 {
    if window.samples.is_empty() {
        return 1.0;
    }
    let successes = window.samples.iter().filter(|(_, ok)| *ok).count();
    #[allow(clippy::cast_precision_loss)]
    {
        successes as f64 / window.samples.len() as f64
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
