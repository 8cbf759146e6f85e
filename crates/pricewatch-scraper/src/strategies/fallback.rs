//! Last-resort structural extraction.
//!
//! Tries the selectors that most storefront themes share: microdata
//! attributes, OpenGraph metas, and common price class names. Catches
//! domains with no configured selector set and no structured data.

use std::sync::LazyLock;

use async_trait::async_trait;
use pricewatch_core::{ProductFields, SelectorSet, StrategyKind};
use regex::Regex;
use scraper::Html;

use crate::fetch::FetchResult;
use crate::price::{normalize_price, sanitize_product_name};
use crate::strategies::css::{first_image, first_value};
use crate::strategies::{resolve_image_url, ExtractionStrategy, StrategyOutcome};

const PRICE_SELECTORS: &[&str] = &[
    "meta[property='product:price:amount']",
    "[itemprop='price']",
    ".price-current",
    ".sale-price",
    ".product-price",
    ".price",
];

const NAME_SELECTORS: &[&str] = &[
    "[itemprop='name']",
    "meta[property='og:title']",
    "h1.product-title",
    "h1",
];

const IMAGE_SELECTORS: &[&str] = &[
    "meta[property='og:image']",
    "[itemprop='image']",
    ".product-image img",
];

static OUT_OF_STOCK: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)out of stock|sold out|currently unavailable").unwrap()
});

pub struct FallbackStrategy {
    default_currency: String,
}

impl FallbackStrategy {
    #[must_use]
    pub fn new(default_currency: impl Into<String>) -> Self {
        Self {
            default_currency: default_currency.into(),
        }
    }

    fn extract_sync(&self, page: &FetchResult) -> StrategyOutcome {
        let doc = Html::parse_document(&page.body);

        let Some(name) =
            first_value(&doc, NAME_SELECTORS).and_then(|raw| sanitize_product_name(&raw))
        else {
            return StrategyOutcome::NoMatch;
        };
        let Some(price) = first_value(&doc, PRICE_SELECTORS).and_then(|raw| normalize_price(&raw))
        else {
            return StrategyOutcome::NoMatch;
        };

        let image_url = first_image(&doc, IMAGE_SELECTORS)
            .and_then(|src| resolve_image_url(&page.final_url, &src));

        StrategyOutcome::Found(ProductFields {
            name,
            price,
            original_price: None,
            currency: self.default_currency.clone(),
            in_stock: !OUT_OF_STOCK.is_match(&page.body),
            image_url,
        })
    }
}

#[async_trait]
impl ExtractionStrategy for FallbackStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Fallback
    }

    async fn extract(
        &self,
        page: &FetchResult,
        _selectors: Option<&SelectorSet>,
    ) -> StrategyOutcome {
        self.extract_sync(page)
    }
}
