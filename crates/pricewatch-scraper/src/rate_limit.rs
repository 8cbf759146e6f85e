//! Global and per-domain request pacing.
//!
//! Three gates apply, in order: a memory-pressure gate, randomized
//! per-domain spacing with an exponential penalty after rate-limit
//! responses, and a global concurrency cap. Spacing is served before a
//! global slot is taken, so a heavily penalized domain never idles
//! capacity other domains could use. The returned [`Permit`] releases the
//! global slot on drop, including on panic or cancellation.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::error::ScrapeError;
use crate::memory::MemoryGauge;

/// How often the memory gate re-checks pressure.
const MEMORY_POLL: Duration = Duration::from_millis(500);

/// Penalty doublings stop here; with the delay cap this is plenty.
const MAX_PENALTY: u32 = 6;

struct DomainPacing {
    next_slot: Instant,
    penalty: u32,
    /// Floor on the spacing, from the site's robots.txt crawl-delay.
    min_delay: Option<Duration>,
}

impl DomainPacing {
    fn starting_now() -> Self {
        Self {
            next_slot: Instant::now(),
            penalty: 0,
            min_delay: None,
        }
    }
}

pub struct RateLimiter {
    global: Arc<Semaphore>,
    pacing: Mutex<HashMap<String, DomainPacing>>,
    delay_secs: RangeInclusive<u64>,
    max_delay: Duration,
    gauge: Arc<dyn MemoryGauge>,
    memory_threshold: f64,
}

/// A held global fetch slot. Domain spacing has already been served by the
/// time a permit exists.
pub struct Permit {
    _slot: OwnedSemaphorePermit,
}

impl RateLimiter {
    #[must_use]
    pub fn new(
        global_concurrency: usize,
        delay_secs: RangeInclusive<u64>,
        max_delay: Duration,
        gauge: Arc<dyn MemoryGauge>,
        memory_threshold: f64,
    ) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_concurrency)),
            pacing: Mutex::new(HashMap::new()),
            delay_secs,
            max_delay,
            gauge,
            memory_threshold,
        }
    }

    /// Waits for all three gates and returns the fetch permit.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::LimiterClosed`] only if the limiter is dropped
    /// while waiters are queued.
    pub async fn acquire(&self, domain: &str) -> Result<Permit, ScrapeError> {
        loop {
            let utilization = self.gauge.utilization();
            if utilization <= self.memory_threshold {
                break;
            }
            debug!(utilization, domain, "memory pressure high, holding fetch");
            tokio::time::sleep(MEMORY_POLL).await;
        }

        let start = self.reserve_slot(domain);
        tokio::time::sleep_until(start).await;

        let slot = Arc::clone(&self.global)
            .acquire_owned()
            .await
            .map_err(|_| ScrapeError::LimiterClosed)?;

        Ok(Permit { _slot: slot })
    }

    /// Clears the domain's rate-limit penalty.
    pub fn report_success(&self, domain: &str) {
        let mut pacing = lock(&self.pacing);
        if let Some(entry) = pacing.get_mut(domain) {
            entry.penalty = 0;
        }
    }

    /// Doubles the domain's spacing after a rate-limit response.
    pub fn report_rate_limited(&self, domain: &str) {
        let mut pacing = lock(&self.pacing);
        let entry = pacing
            .entry(domain.to_owned())
            .or_insert_with(DomainPacing::starting_now);
        entry.penalty = (entry.penalty + 1).min(MAX_PENALTY);
        debug!(domain, penalty = entry.penalty, "domain rate limited, widening delay");
    }

    /// Sets a minimum spacing for the domain, typically the crawl-delay
    /// advertised by its robots.txt. Honored even past the delay cap.
    pub fn note_crawl_delay(&self, domain: &str, delay: Duration) {
        let mut pacing = lock(&self.pacing);
        let entry = pacing
            .entry(domain.to_owned())
            .or_insert_with(DomainPacing::starting_now);
        entry.min_delay = Some(delay);
    }

    /// Reserves the next send slot for the domain and returns when it opens.
    fn reserve_slot(&self, domain: &str) -> Instant {
        let now = Instant::now();
        let mut pacing = lock(&self.pacing);
        let entry = pacing
            .entry(domain.to_owned())
            .or_insert_with(DomainPacing::starting_now);

        let base = rand::rng().random_range(self.delay_secs.clone());
        let mut delay = Duration::from_secs(base)
            .saturating_mul(2u32.saturating_pow(entry.penalty))
            .min(self.max_delay);
        if let Some(floor) = entry.min_delay {
            delay = delay.max(floor);
        }

        let start = entry.next_slot.max(now);
        entry.next_slot = start + delay;
        start
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlagGauge(AtomicBool);

    impl MemoryGauge for FlagGauge {
        fn utilization(&self) -> f64 {
            if self.0.load(Ordering::SeqCst) {
                0.95
            } else {
                0.10
            }
        }
    }

    fn calm_gauge() -> Arc<FlagGauge> {
        Arc::new(FlagGauge(AtomicBool::new(false)))
    }

    #[tokio::test(start_paused = true)]
    async fn same_domain_requests_are_spaced() {
        let limiter = RateLimiter::new(
            4,
            3..=3,
            Duration::from_secs(60),
            calm_gauge(),
            0.70,
        );
        let t0 = Instant::now();
        let _a = limiter.acquire("shop.example.com").await.unwrap();
        let _b = limiter.acquire("shop.example.com").await.unwrap();
        assert!(Instant::now() - t0 >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn different_domains_do_not_wait_on_each_other() {
        let limiter = RateLimiter::new(
            4,
            30..=30,
            Duration::from_secs(60),
            calm_gauge(),
            0.70,
        );
        let t0 = Instant::now();
        let _a = limiter.acquire("a.example.com").await.unwrap();
        let _b = limiter.acquire("b.example.com").await.unwrap();
        assert!(Instant::now() - t0 < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn global_cap_limits_concurrent_permits() {
        let limiter = Arc::new(RateLimiter::new(
            1,
            0..=0,
            Duration::from_secs(60),
            calm_gauge(),
            0.70,
        ));
        let first = limiter.acquire("a.example.com").await.unwrap();

        let limiter2 = Arc::clone(&limiter);
        let waiter =
            tokio::spawn(async move { limiter2.acquire("b.example.com").await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn penalty_widens_and_success_resets() {
        let limiter = RateLimiter::new(
            4,
            2..=2,
            Duration::from_secs(600),
            calm_gauge(),
            0.70,
        );
        limiter.report_rate_limited("shop.example.com");
        limiter.report_rate_limited("shop.example.com");

        let t0 = Instant::now();
        let _a = limiter.acquire("shop.example.com").await.unwrap();
        let _b = limiter.acquire("shop.example.com").await.unwrap();
        // Penalty of 2 doublings: 2s base becomes 8s.
        assert!(Instant::now() - t0 >= Duration::from_secs(8));

        limiter.report_success("shop.example.com");
        // The reservation made while penalized still stands; spacing after
        // it returns to the base delay.
        let _c = limiter.acquire("shop.example.com").await.unwrap();
        let t1 = Instant::now();
        let _d = limiter.acquire("shop.example.com").await.unwrap();
        let spacing = Instant::now() - t1;
        assert!(spacing >= Duration::from_secs(2) && spacing < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn domain_spacing_does_not_hold_the_global_slot() {
        let limiter = Arc::new(RateLimiter::new(
            1,
            5..=5,
            Duration::from_secs(60),
            calm_gauge(),
            0.70,
        ));
        drop(limiter.acquire("a.example.com").await.unwrap());

        // Second hit on the same domain sleeps out its spacing.
        let limiter2 = Arc::clone(&limiter);
        let waiter =
            tokio::spawn(async move { limiter2.acquire("a.example.com").await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // While it sleeps, the only permit stays available to other domains.
        let t0 = Instant::now();
        let b = limiter.acquire("b.example.com").await.unwrap();
        assert!(Instant::now() - t0 < Duration::from_secs(1));

        drop(b);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn crawl_delay_floors_the_spacing() {
        let limiter = RateLimiter::new(
            4,
            2..=2,
            Duration::from_secs(60),
            calm_gauge(),
            0.70,
        );
        limiter.note_crawl_delay("shop.example.com", Duration::from_secs(10));

        let t0 = Instant::now();
        let _a = limiter.acquire("shop.example.com").await.unwrap();
        let _b = limiter.acquire("shop.example.com").await.unwrap();
        assert!(Instant::now() - t0 >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn memory_gate_holds_until_pressure_drops() {
        let gauge = Arc::new(FlagGauge(AtomicBool::new(true)));
        let limiter = Arc::new(RateLimiter::new(
            4,
            0..=0,
            Duration::from_secs(60),
            Arc::clone(&gauge) as Arc<dyn MemoryGauge>,
            0.70,
        ));

        let limiter2 = Arc::clone(&limiter);
        let waiter =
            tokio::spawn(async move { limiter2.acquire("shop.example.com").await.map(|_| ()) });
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        gauge.0.store(false, Ordering::SeqCst);
        waiter.await.unwrap().unwrap();
    }
}
