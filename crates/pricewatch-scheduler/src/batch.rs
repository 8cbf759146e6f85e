//! Domain-grouped batch execution.
//!
//! A batch run loads every due target, groups by domain so per-domain
//! pacing and selector reads are shared, and processes groups concurrently
//! with bounded fan-out inside each group. Domains still being processed by
//! a previous run are skipped; their targets are simply due again next tick.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use pricewatch_core::{
    AttemptRecord, ErrorCategory, ExtractionOutcome, ExtractionTarget, FailureCounter,
    HealthEvents, SelectorSet, TargetRepository, TerminalReason,
};
use pricewatch_healing::regenerate::{HealOutcome, SelectorRegenerator};
use pricewatch_healing::{next_action, HealingPolicy, HealthTracker, NextAction};
use pricewatch_scraper::ExtractionEngine;
use tracing::{info, warn};
use uuid::Uuid;

pub struct BatchRunner {
    engine: Arc<ExtractionEngine>,
    repo: Arc<dyn TargetRepository>,
    regenerator: Arc<SelectorRegenerator>,
    health: Arc<HealthTracker>,
    events: Arc<dyn HealthEvents>,
    policy: HealingPolicy,
    domain_concurrency: usize,
    intra_domain_concurrency: usize,
    running: Mutex<HashSet<String>>,
}

impl BatchRunner {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<ExtractionEngine>,
        repo: Arc<dyn TargetRepository>,
        regenerator: Arc<SelectorRegenerator>,
        health: Arc<HealthTracker>,
        events: Arc<dyn HealthEvents>,
        policy: HealingPolicy,
        domain_concurrency: usize,
        intra_domain_concurrency: usize,
    ) -> Self {
        Self {
            engine,
            repo,
            regenerator,
            health,
            events,
            policy,
            domain_concurrency,
            intra_domain_concurrency,
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Processes everything due at `now`. Targets that became due during a
    /// missed tick are included here too, so delayed ticks coalesce into
    /// one pass instead of stacking.
    pub async fn run_due(&self, now: DateTime<Utc>) {
        let targets = match self.repo.load_due_targets(now).await {
            Ok(targets) => targets,
            Err(err) => {
                warn!(%err, "could not load due targets, skipping run");
                return;
            }
        };
        if targets.is_empty() {
            return;
        }

        let mut groups: HashMap<String, Vec<ExtractionTarget>> = HashMap::new();
        for target in targets {
            groups.entry(target.domain.clone()).or_default().push(target);
        }

        let claimed: Vec<(String, Vec<ExtractionTarget>)> = {
            let mut running = lock(&self.running);
            groups
                .into_iter()
                .filter(|(domain, _)| running.insert(domain.clone()))
                .collect()
        };
        info!(domains = claimed.len(), "batch run starting");

        stream::iter(claimed)
            .for_each_concurrent(self.domain_concurrency, |(domain, targets)| async move {
                self.process_domain(&domain, targets).await;
                lock(&self.running).remove(&domain);
            })
            .await;
    }

    async fn process_domain(&self, domain: &str, targets: Vec<ExtractionTarget>) {
        info!(domain, targets = targets.len(), "processing domain batch");
        stream::iter(targets)
            .for_each_concurrent(self.intra_domain_concurrency, |target| async move {
                self.process_target(&target).await;
            })
            .await;
    }

    /// Runs one target end to end: extract, record, and follow up on the
    /// outcome. Also the path behind manual "check now".
    pub async fn process_target(&self, target: &ExtractionTarget) -> ExtractionOutcome {
        let selectors = match self.repo.selector_set(&target.domain).await {
            Ok(set) => set,
            Err(err) => {
                warn!(domain = %target.domain, %err, "selector read failed, extracting without");
                None
            }
        };

        let started = Instant::now();
        let outcome = self.engine.extract(target, selectors.as_ref()).await;

        let record = AttemptRecord {
            target_id: target.id,
            domain: target.domain.clone(),
            outcome: outcome.clone(),
            duration: started.elapsed(),
            at: Utc::now(),
        };
        if let Err(err) = self.repo.save_outcome(record.clone()).await {
            warn!(target = %target.id, %err, "could not persist attempt record");
        }
        self.health.record(&record).await;

        if outcome.success() {
            self.reset_counter(target.id).await;
            return outcome;
        }
        let Some(category) = outcome.error else {
            return outcome;
        };
        if category == ErrorCategory::BudgetExhausted {
            // A deferral, not a failure; the next window retries for free.
            return outcome;
        }

        let mut counter = match self.repo.failure_counter(target.id).await {
            Ok(counter) => counter,
            Err(err) => {
                warn!(target = %target.id, %err, "counter read failed");
                FailureCounter::default()
            }
        };
        counter.consecutive_failures += 1;

        match next_action(category, counter, &self.policy) {
            NextAction::Wait => self.store_counter(target.id, counter).await,
            NextAction::MarkTerminal(reason) => {
                self.store_counter(target.id, counter).await;
                self.mark_terminal(target, reason).await;
            }
            NextAction::TriggerHeal => {
                self.store_counter(target.id, counter).await;
                self.heal(target, selectors.as_ref(), counter).await;
            }
        }
        outcome
    }

    async fn heal(
        &self,
        target: &ExtractionTarget,
        selectors: Option<&SelectorSet>,
        mut counter: FailureCounter,
    ) {
        let failed_version = selectors.map_or(0, |set| set.version);
        match self.regenerator.regenerate(target, failed_version).await {
            HealOutcome::Updated { .. } | HealOutcome::Superseded => {
                // Fresh selectors get a clean failure window.
                counter.consecutive_failures = 0;
                self.store_counter(target.id, counter).await;
            }
            // A deferral is not an attempt; the next budget window retries.
            HealOutcome::Deferred => {}
            // Only failed regenerations count toward the attempt cap.
            HealOutcome::Failed => {
                counter.healing_attempts += 1;
                self.store_counter(target.id, counter).await;
                if counter.healing_attempts >= self.policy.max_healing_attempts {
                    self.mark_terminal(target, TerminalReason::NeedsAttention).await;
                }
            }
        }
    }

    async fn mark_terminal(&self, target: &ExtractionTarget, reason: TerminalReason) {
        info!(target = %target.id, ?reason, "target leaving rotation");
        if let Err(err) = self.repo.mark_terminal(target.id, reason).await {
            warn!(target = %target.id, %err, "could not mark target terminal");
        }
        if reason == TerminalReason::NeedsAttention {
            self.events
                .target_needs_attention(target.id, &target.domain)
                .await;
            self.health.mark_attention(&target.domain, target.id).await;
        }
    }

    async fn reset_counter(&self, target: Uuid) {
        match self.repo.failure_counter(target).await {
            Ok(counter) if counter != FailureCounter::default() => {
                self.store_counter(target, FailureCounter::default()).await;
            }
            Ok(_) => {}
            Err(err) => warn!(%target, %err, "counter read failed"),
        }
    }

    async fn store_counter(&self, target: Uuid, counter: FailureCounter) {
        if let Err(err) = self.repo.set_failure_counter(target, counter).await {
            warn!(%target, %err, "could not persist failure counter");
        }
    }

    /// Derived health for one domain, for the read API.
    #[must_use]
    pub fn domain_health(&self, domain: &str) -> pricewatch_core::StoreHealth {
        self.health.health(domain)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
