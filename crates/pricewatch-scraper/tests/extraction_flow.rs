//! End-to-end extraction against a local mock storefront.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pricewatch_core::{
    build_config, CostBudget, ErrorCategory, ExtractionTarget, PipelineConfig, StrategyKind,
};
use pricewatch_scraper::memory::MemoryGauge;
use pricewatch_scraper::strategies::StrategyChain;
use pricewatch_scraper::{
    ExtractionEngine, HttpFetcher, RateLimiter, RetryPolicy, RobotsGuard,
};
use rust_decimal::Decimal;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct CalmGauge;

impl MemoryGauge for CalmGauge {
    fn utilization(&self) -> f64 {
        0.1
    }
}

fn config() -> PipelineConfig {
    // The mock storefront lives on loopback, which production config rejects.
    build_config(|key| match key {
        "PRICEWATCH_ALLOW_PRIVATE_TARGETS" => Ok("true".to_owned()),
        _ => Err(std::env::VarError::NotPresent),
    })
    .unwrap()
}

fn engine() -> ExtractionEngine {
    let config = config();
    let fetcher = Arc::new(HttpFetcher::new(&config).unwrap());
    let limiter = Arc::new(RateLimiter::new(
        config.global_concurrency,
        0..=0,
        config.max_domain_delay,
        Arc::new(CalmGauge),
        config.memory_threshold,
    ));
    let policy = RetryPolicy::new(
        config.max_retries,
        Duration::from_millis(10),
        Duration::from_millis(10),
        Duration::from_millis(100),
    );
    ExtractionEngine::new(
        fetcher,
        StrategyChain::waterfall(
            &config.default_currency,
            None,
            Arc::new(CostBudget::new(config.daily_token_budget)),
        ),
        limiter,
        policy,
        config.operation_timeout,
        config.max_plausible_price,
    )
}

fn target_for(server: &MockServer, route: &str) -> ExtractionTarget {
    ExtractionTarget {
        id: Uuid::new_v4(),
        url: format!("{}{route}", server.uri()),
        domain: "127.0.0.1".to_owned(),
        wait_hint: None,
    }
}

const PRODUCT_PAGE: &str = r#"<html><head>
<title>Acme Widget | Example Shop</title>
<script type="application/ld+json">
{"@context":"https://schema.org","@type":"Product","name":"Acme Widget",
 "image":"/img/widget.jpg",
 "offers":{"@type":"Offer","price":"1299.99","priceCurrency":"CAD",
           "availability":"https://schema.org/InStock"}}
</script></head>
<body><h1>Acme Widget</h1><span class="price">$1,299.99</span></body></html>"#;

#[tokio::test]
async fn structured_product_page_extracts_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/widget"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PRODUCT_PAGE))
        .mount(&server)
        .await;

    let outcome = engine().extract(&target_for(&server, "/p/widget"), None).await;
    assert!(outcome.success(), "outcome: {outcome:?}");
    assert_eq!(outcome.strategy, Some(StrategyKind::JsonLd));
    let fields = outcome.fields.unwrap();
    assert_eq!(fields.price, Decimal::new(129999, 2));
    assert_eq!(fields.currency, "CAD");
}

#[tokio::test]
async fn unstructured_page_falls_back_to_markup() {
    let body = r#"<html><head><title>Plain Widget</title></head><body>
        <h1>Plain Widget</h1>
        <div class="product-price">$45.00</div>
        <p>In stock and ready to ship from our warehouse today.</p>
    </body></html>"#;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let outcome = engine().extract(&target_for(&server, "/p/plain"), None).await;
    assert!(outcome.success(), "outcome: {outcome:?}");
    assert_eq!(outcome.strategy, Some(StrategyKind::Fallback));
    assert_eq!(outcome.fields.unwrap().price, Decimal::new(4500, 2));
}

#[tokio::test]
async fn removed_product_reports_broken_link_category() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let outcome = engine().extract(&target_for(&server, "/p/gone"), None).await;
    assert_eq!(outcome.error, Some(ErrorCategory::NotFound));
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn server_errors_are_retried_until_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/flaky"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let outcome = engine().extract(&target_for(&server, "/p/flaky"), None).await;
    assert_eq!(outcome.error, Some(ErrorCategory::ServerError));
    assert_eq!(outcome.attempts, 3);
}

#[tokio::test]
async fn robots_disallowed_path_is_never_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /p/"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/p/widget"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PRODUCT_PAGE))
        .expect(0)
        .mount(&server)
        .await;

    let robots = Arc::new(RobotsGuard::new(&config()).unwrap());
    let engine = engine().with_robots(robots);
    let outcome = engine.extract(&target_for(&server, "/p/widget"), None).await;
    assert_eq!(outcome.error, Some(ErrorCategory::Blocked));
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn bot_interstitial_is_detected_before_parsing() {
    let body = r#"<html><body>
        <h1>Pardon Our Interruption</h1>
        <p>As you were browsing something about your browser made us think you were a bot.</p>
    </body></html>"#;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/blocked"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let outcome = engine().extract(&target_for(&server, "/p/blocked"), None).await;
    assert_eq!(outcome.error, Some(ErrorCategory::Blocked));
    assert_eq!(outcome.attempts, 1);
}
