//! Extraction from embedded schema.org JSON-LD.
//!
//! The most reliable source when present: structured, machine-written, and
//! stable across cosmetic redesigns. Handles `@graph` wrappers, nested
//! `mainEntity`, offer arrays, and `AggregateOffer` price ranges.

use std::sync::LazyLock;

use async_trait::async_trait;
use pricewatch_core::{ProductFields, SelectorSet, StrategyKind};
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;

use crate::fetch::FetchResult;
use crate::price::{normalize_price, sanitize_product_name};
use crate::strategies::{resolve_image_url, ExtractionStrategy, StrategyOutcome};

static LD_SCRIPT: LazyLock<Selector> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Selector::parse(r#"script[type="application/ld+json"]"#).unwrap()
});

pub struct JsonLdStrategy {
    default_currency: String,
}

impl JsonLdStrategy {
    #[must_use]
    pub fn new(default_currency: impl Into<String>) -> Self {
        Self {
            default_currency: default_currency.into(),
        }
    }

    fn extract_sync(&self, page: &FetchResult) -> StrategyOutcome {
        let doc = Html::parse_document(&page.body);
        for script in doc.select(&LD_SCRIPT) {
            let raw = script.text().collect::<String>();
            let value: Value = match serde_json::from_str(raw.trim()) {
                Ok(v) => v,
                Err(err) => {
                    debug!(url = %page.final_url, %err, "skipping malformed ld+json block");
                    continue;
                }
            };
            if let Some(product) = find_product(&value) {
                if let Some(fields) =
                    fields_from_product(product, &page.final_url, &self.default_currency)
                {
                    return StrategyOutcome::Found(fields);
                }
            }
        }
        StrategyOutcome::NoMatch
    }
}

#[async_trait]
impl ExtractionStrategy for JsonLdStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::JsonLd
    }

    async fn extract(
        &self,
        page: &FetchResult,
        _selectors: Option<&SelectorSet>,
    ) -> StrategyOutcome {
        self.extract_sync(page)
    }
}

fn find_product(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(map) => {
            if is_product(map) {
                return Some(map);
            }
            ["@graph", "mainEntity", "itemListElement"]
                .iter()
                .filter_map(|key| map.get(*key))
                .find_map(find_product)
        }
        Value::Array(items) => items.iter().find_map(find_product),
        _ => None,
    }
}

fn is_product(map: &Map<String, Value>) -> bool {
    match map.get("@type") {
        Some(Value::String(t)) => t.eq_ignore_ascii_case("product"),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| t.eq_ignore_ascii_case("product")),
        _ => false,
    }
}

fn fields_from_product(
    product: &Map<String, Value>,
    page_url: &str,
    default_currency: &str,
) -> Option<ProductFields> {
    let name = sanitize_product_name(product.get("name")?.as_str()?)?;
    let offer = first_priced_offer(product.get("offers")?)?;

    let price = offer_price(offer)?;
    let currency = offer
        .get("priceCurrency")
        .and_then(Value::as_str)
        .unwrap_or(default_currency)
        .to_owned();
    let original_price = value_to_price(offer.get("highPrice")).filter(|high| *high > price);
    let in_stock = offer
        .get("availability")
        .and_then(Value::as_str)
        .is_none_or(|a| {
            let a = a.to_lowercase();
            !(a.contains("outofstock") || a.contains("soldout") || a.contains("discontinued"))
        });
    let image_url = image_source(product.get("image"))
        .and_then(|src| resolve_image_url(page_url, &src));

    Some(ProductFields {
        name,
        price,
        original_price,
        currency,
        in_stock,
        image_url,
    })
}

/// First offer object carrying a usable price. `offers` may be a single
/// object or an array; `AggregateOffer` carries `lowPrice` instead.
fn first_priced_offer(offers: &Value) -> Option<&Map<String, Value>> {
    match offers {
        Value::Object(map) => offer_price(map).is_some().then_some(map),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_object)
            .find(|map| offer_price(map).is_some()),
        _ => None,
    }
}

fn offer_price(offer: &Map<String, Value>) -> Option<Decimal> {
    value_to_price(offer.get("price")).or_else(|| value_to_price(offer.get("lowPrice")))
}

fn value_to_price(value: Option<&Value>) -> Option<Decimal> {
    match value? {
        Value::String(s) => normalize_price(s),
        Value::Number(n) => normalize_price(&n.to_string()),
        _ => None,
    }
}

fn image_source(image: Option<&Value>) -> Option<String> {
    match image? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|v| image_source(Some(v))),
        Value::Object(map) => map.get("url").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn page(body: &str) -> FetchResult {
        FetchResult {
            final_url: "https://shop.example.com/p/1".to_owned(),
            status: 200,
            body: body.to_owned(),
            elapsed: Duration::from_millis(100),
        }
    }

    fn ld_page(json: &str) -> FetchResult {
        page(&format!(
            r#"<html><head><script type="application/ld+json">{json}</script></head><body></body></html>"#
        ))
    }

    async fn run(json: &str) -> StrategyOutcome {
        JsonLdStrategy::new("CAD").extract(&ld_page(json), None).await
    }

    #[tokio::test]
    async fn simple_product_extracts() {
        let outcome = run(
            r#"{"@context":"https://schema.org","@type":"Product","name":"Acme Widget",
                "image":"/img/widget.jpg",
                "offers":{"@type":"Offer","price":"1299.99","priceCurrency":"CAD",
                          "availability":"https://schema.org/InStock"}}"#,
        )
        .await;
        let StrategyOutcome::Found(fields) = outcome else {
            panic!("expected Found, got {outcome:?}");
        };
        assert_eq!(fields.name, "Acme Widget");
        assert_eq!(fields.price, Decimal::new(129999, 2));
        assert_eq!(fields.currency, "CAD");
        assert!(fields.in_stock);
        assert_eq!(
            fields.image_url.as_deref(),
            Some("https://shop.example.com/img/widget.jpg")
        );
    }

    #[tokio::test]
    async fn product_inside_graph_is_found() {
        let outcome = run(
            r#"{"@context":"https://schema.org","@graph":[
                {"@type":"WebSite","name":"Shop"},
                {"@type":"Product","name":"Graph Widget",
                 "offers":{"price":49.5}}]}"#,
        )
        .await;
        let StrategyOutcome::Found(fields) = outcome else {
            panic!("expected Found, got {outcome:?}");
        };
        assert_eq!(fields.name, "Graph Widget");
        assert_eq!(fields.price, Decimal::new(4950, 2));
    }

    #[tokio::test]
    async fn aggregate_offer_uses_low_price() {
        let outcome = run(
            r#"{"@type":"Product","name":"Ranged Widget",
                "offers":{"@type":"AggregateOffer","lowPrice":"10.99","highPrice":"24.99"}}"#,
        )
        .await;
        let StrategyOutcome::Found(fields) = outcome else {
            panic!("expected Found, got {outcome:?}");
        };
        assert_eq!(fields.price, Decimal::new(1099, 2));
        assert_eq!(fields.original_price, Some(Decimal::new(2499, 2)));
    }

    #[tokio::test]
    async fn out_of_stock_availability_is_carried() {
        let outcome = run(
            r#"{"@type":"Product","name":"Gone Widget",
                "offers":{"price":"5.00","availability":"https://schema.org/OutOfStock"}}"#,
        )
        .await;
        let StrategyOutcome::Found(fields) = outcome else {
            panic!("expected Found, got {outcome:?}");
        };
        assert!(!fields.in_stock);
    }

    #[tokio::test]
    async fn malformed_block_is_skipped_for_later_block() {
        let body = format!(
            r#"<html><head>
            <script type="application/ld+json">{{not json</script>
            <script type="application/ld+json">{}</script>
            </head></html>"#,
            r#"{"@type":"Product","name":"Second Widget","offers":{"price":"9.99"}}"#
        );
        let outcome = JsonLdStrategy::new("CAD").extract(&page(&body), None).await;
        assert!(matches!(outcome, StrategyOutcome::Found(_)));
    }

    #[tokio::test]
    async fn non_product_ld_is_no_match() {
        let outcome = run(r#"{"@type":"BreadcrumbList","itemListElement":[]}"#).await;
        assert_eq!(outcome, StrategyOutcome::NoMatch);
    }

    #[tokio::test]
    async fn product_without_price_is_no_match() {
        let outcome = run(r#"{"@type":"Product","name":"Priceless Widget"}"#).await;
        assert_eq!(outcome, StrategyOutcome::NoMatch);
    }
}
