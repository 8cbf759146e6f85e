//! One target through the whole extraction path: permit, fetch, block
//! triage, strategy waterfall, category-aware retries, all under a single
//! wall-clock budget.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pricewatch_core::{
    ErrorCategory, ExtractionOutcome, ExtractionTarget, ProductFields, SelectorSet, StrategyKind,
};
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::block::{self, Verdict};
use crate::fetch::{FetchResult, PageFetcher};
use crate::price::validate_price;
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::robots::RobotsGuard;
use crate::strategies::StrategyChain;

pub struct ExtractionEngine {
    fetcher: Arc<dyn PageFetcher>,
    chain: StrategyChain,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    robots: Option<Arc<RobotsGuard>>,
    operation_timeout: Duration,
    max_plausible_price: Decimal,
}

impl ExtractionEngine {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        chain: StrategyChain,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        operation_timeout: Duration,
        max_plausible_price: Decimal,
    ) -> Self {
        Self {
            fetcher,
            chain,
            limiter,
            policy,
            robots: None,
            operation_timeout,
            max_plausible_price,
        }
    }

    /// Enables robots.txt enforcement: disallowed paths are never fetched
    /// and an advertised crawl-delay widens the domain's pacing.
    #[must_use]
    pub fn with_robots(mut self, robots: Arc<RobotsGuard>) -> Self {
        self.robots = Some(robots);
        self
    }

    /// Runs the full extraction for one target. Never panics and never
    /// exceeds the operation timeout; every path ends in an outcome.
    pub async fn extract(
        &self,
        target: &ExtractionTarget,
        selectors: Option<&SelectorSet>,
    ) -> ExtractionOutcome {
        let attempts = AtomicU32::new(0);
        let run = self.run(target, selectors, &attempts);
        match tokio::time::timeout(self.operation_timeout, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    target = %target.id,
                    url = %target.url,
                    timeout_secs = self.operation_timeout.as_secs(),
                    "operation timeout, abandoning target for this run"
                );
                ExtractionOutcome::failed(
                    ErrorCategory::Timeout,
                    attempts.load(Ordering::SeqCst).max(1),
                )
            }
        }
    }

    async fn run(
        &self,
        target: &ExtractionTarget,
        selectors: Option<&SelectorSet>,
        attempts: &AtomicU32,
    ) -> ExtractionOutcome {
        loop {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.attempt(target, selectors).await {
                Ok((strategy, fields)) => {
                    self.limiter.report_success(&target.domain);
                    info!(
                        target = %target.id,
                        strategy = ?strategy,
                        price = %fields.price,
                        attempt,
                        "extraction succeeded"
                    );
                    return ExtractionOutcome::ok(strategy, fields, attempt);
                }
                Err(category) => {
                    if category == ErrorCategory::RateLimited {
                        self.limiter.report_rate_limited(&target.domain);
                    }
                    match self.policy.decide(category, attempt) {
                        RetryDecision::RetryAfter(delay) => {
                            debug!(
                                target = %target.id,
                                ?category,
                                attempt,
                                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                "retrying after backoff"
                            );
                            tokio::time::sleep(jittered(delay)).await;
                        }
                        RetryDecision::GiveUp(_) => {
                            info!(
                                target = %target.id,
                                url = %target.url,
                                ?category,
                                attempt,
                                "extraction failed"
                            );
                            return ExtractionOutcome::failed(category, attempt);
                        }
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        target: &ExtractionTarget,
        selectors: Option<&SelectorSet>,
    ) -> Result<(StrategyKind, ProductFields), ErrorCategory> {
        if let Some(robots) = &self.robots {
            let verdict = robots.verdict(&target.url).await;
            if let Some(delay) = verdict.crawl_delay {
                self.limiter.note_crawl_delay(&target.domain, delay);
            }
            if !verdict.allowed {
                warn!(target = %target.id, url = %target.url, "robots.txt disallows this url");
                return Err(ErrorCategory::Blocked);
            }
        }

        let permit = self
            .limiter
            .acquire(&target.domain)
            .await
            .map_err(|e| e.category())?;
        let fetched = self.fetcher.fetch(target).await.map_err(|e| {
            debug!(target = %target.id, err = %e, "fetch failed");
            e.category()
        });
        drop(permit);
        let fetched = fetched?;

        self.triage(target, selectors, &fetched).await
    }

    async fn triage(
        &self,
        target: &ExtractionTarget,
        selectors: Option<&SelectorSet>,
        fetched: &FetchResult,
    ) -> Result<(StrategyKind, ProductFields), ErrorCategory> {
        if fetched.status == 404 || fetched.status == 410 {
            return Err(ErrorCategory::NotFound);
        }

        match block::classify(fetched) {
            Verdict::Challenged => return Err(ErrorCategory::Challenged),
            Verdict::Blocked => {
                return Err(match fetched.status {
                    429 | 503 => ErrorCategory::RateLimited,
                    403 => ErrorCategory::Forbidden,
                    _ => ErrorCategory::Blocked,
                });
            }
            Verdict::Clean | Verdict::Empty => {}
        }

        if fetched.status >= 500 {
            return Err(ErrorCategory::ServerError);
        }
        if fetched.status >= 400 {
            return Err(ErrorCategory::Network);
        }

        let result = self.chain.run(fetched, selectors).await;
        match result.found {
            Some((strategy, fields)) => {
                if !validate_price(fields.price, self.max_plausible_price) {
                    warn!(
                        target = %target.id,
                        price = %fields.price,
                        "extracted price failed plausibility check"
                    );
                    return Err(ErrorCategory::ValidationFailure);
                }
                Ok((strategy, fields))
            }
            None if result.deferred => Err(ErrorCategory::BudgetExhausted),
            None => {
                // A miss with configured selectors on a page that loads
                // fine points at a layout change, not a one-off glitch.
                if selectors.is_some_and(|s| !s.is_empty()) {
                    Err(ErrorCategory::StructureChange)
                } else {
                    Err(ErrorCategory::ParseFailure)
                }
            }
        }
    }
}

fn jittered(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let factor = rand::rng().random_range(0.8..1.2);
    delay.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScrapeError;
    use crate::memory::MemoryGauge;
    use async_trait::async_trait;
    use pricewatch_core::CostBudget;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct CalmGauge;

    impl MemoryGauge for CalmGauge {
        fn utilization(&self) -> f64 {
            0.1
        }
    }

    struct ScriptedFetcher {
        responses: Mutex<VecDeque<Result<FetchResult, ScrapeError>>>,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<FetchResult, ScrapeError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(&self, _target: &ExtractionTarget) -> Result<FetchResult, ScrapeError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("fetcher called more times than scripted")
        }
    }

    struct NeverFetcher;

    #[async_trait]
    impl PageFetcher for NeverFetcher {
        async fn fetch(&self, _target: &ExtractionTarget) -> Result<FetchResult, ScrapeError> {
            std::future::pending().await
        }
    }

    fn target() -> ExtractionTarget {
        ExtractionTarget {
            id: Uuid::new_v4(),
            url: "https://shop.example.com/p/1".to_owned(),
            domain: "shop.example.com".to_owned(),
            wait_hint: None,
        }
    }

    fn ok_page(body: &str) -> Result<FetchResult, ScrapeError> {
        page(200, body)
    }

    fn page(status: u16, body: &str) -> Result<FetchResult, ScrapeError> {
        Ok(FetchResult {
            final_url: "https://shop.example.com/p/1".to_owned(),
            status,
            body: body.to_owned(),
            elapsed: Duration::from_millis(50),
        })
    }

    fn timeout_err() -> Result<FetchResult, ScrapeError> {
        Err(ScrapeError::FetchTimeout {
            url: "https://shop.example.com/p/1".to_owned(),
            timeout_secs: 30,
        })
    }

    fn product_body(price: &str) -> String {
        format!(
            r#"<html><head><script type="application/ld+json">
            {{"@type":"Product","name":"Acme Widget","offers":{{"price":"{price}","priceCurrency":"CAD"}}}}
            </script></head><body></body></html>"#
        )
    }

    fn engine(fetcher: Arc<dyn PageFetcher>) -> ExtractionEngine {
        let limiter = Arc::new(RateLimiter::new(
            3,
            0..=0,
            Duration::from_secs(60),
            Arc::new(CalmGauge),
            0.70,
        ));
        let policy = RetryPolicy::new(
            3,
            Duration::from_secs(1),
            Duration::from_secs(5),
            Duration::from_secs(60),
        );
        ExtractionEngine::new(
            fetcher,
            StrategyChain::waterfall("CAD", None, Arc::new(CostBudget::new(100_000))),
            limiter,
            policy,
            Duration::from_secs(120),
            Decimal::new(100_000_000, 2),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![ok_page(&product_body("19.99"))]));
        let outcome = engine(fetcher).extract(&target(), None).await;
        assert!(outcome.success());
        assert_eq!(outcome.strategy, Some(StrategyKind::JsonLd));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_retry_then_give_up() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            timeout_err(),
            timeout_err(),
            timeout_err(),
        ]));
        let outcome = engine(fetcher).extract(&target(), None).await;
        assert!(!outcome.success());
        assert_eq!(outcome.error, Some(ErrorCategory::Timeout));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            timeout_err(),
            ok_page(&product_body("19.99")),
        ]));
        let outcome = engine(fetcher).extract(&target(), None).await;
        assert!(outcome.success());
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_immediate() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![page(404, "gone")]));
        let outcome = engine(fetcher).extract(&target(), None).await;
        assert_eq!(outcome.error, Some(ErrorCategory::NotFound));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_retries_exactly_once() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            page(403, "<html>Forbidden</html>"),
            page(403, "<html>Forbidden</html>"),
        ]));
        let outcome = engine(fetcher).extract(&target(), None).await;
        assert_eq!(outcome.error, Some(ErrorCategory::Forbidden));
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn captcha_page_is_challenged_without_retry() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![page(
            403,
            "<html><div class=\"g-recaptcha\"></div></html>",
        )]));
        let outcome = engine(fetcher).extract(&target(), None).await;
        assert_eq!(outcome.error, Some(ErrorCategory::Challenged));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_then_success() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            page(429, ""),
            ok_page(&product_body("19.99")),
        ]));
        let outcome = engine(fetcher).extract(&target(), None).await;
        assert!(outcome.success());
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn implausible_price_is_validation_failure() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![ok_page(&product_body("0.00"))]));
        let outcome = engine(fetcher).extract(&target(), None).await;
        assert_eq!(outcome.error, Some(ErrorCategory::ValidationFailure));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn selector_miss_with_configured_set_is_structure_change() {
        let body = format!(
            "<html><body><h2>Landing</h2><p>news text</p>{}</body></html>",
            "<p>filler paragraph for body length</p>".repeat(20)
        );
        let fetcher = Arc::new(ScriptedFetcher::new(vec![ok_page(&body)]));
        let selectors = SelectorSet {
            domain: "shop.example.com".to_owned(),
            version: 3,
            name: vec!["h1.product-title".to_owned()],
            price: vec!["span.sale-price".to_owned()],
            ..SelectorSet::default()
        };
        let outcome = engine(fetcher).extract(&target(), Some(&selectors)).await;
        assert_eq!(outcome.error, Some(ErrorCategory::StructureChange));
    }

    #[tokio::test(start_paused = true)]
    async fn miss_without_selectors_is_parse_failure() {
        let body = format!(
            "<html><body><h2>Landing</h2>{}</body></html>",
            "<p>filler paragraph for body length</p>".repeat(20)
        );
        let fetcher = Arc::new(ScriptedFetcher::new(vec![ok_page(&body)]));
        let outcome = engine(fetcher).extract(&target(), None).await;
        assert_eq!(outcome.error, Some(ErrorCategory::ParseFailure));
    }

    #[tokio::test(start_paused = true)]
    async fn operation_timeout_bounds_the_run() {
        let outcome = engine(Arc::new(NeverFetcher)).extract(&target(), None).await;
        assert_eq!(outcome.error, Some(ErrorCategory::Timeout));
    }
}
