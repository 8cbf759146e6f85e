//! Extraction with the domain's configured CSS selectors.
//!
//! Selectors are ordered most specific first; the first matching element
//! per field wins. `<meta>`-style elements contribute their `content`
//! attribute, everything else its text.

use async_trait::async_trait;
use pricewatch_core::{ProductFields, SelectorSet, StrategyKind};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::fetch::FetchResult;
use crate::price::{normalize_price, sanitize_product_name};
use crate::strategies::{
    in_stock_from_text, resolve_image_url, ExtractionStrategy, StrategyOutcome,
};

pub struct CssStrategy {
    default_currency: String,
}

impl CssStrategy {
    #[must_use]
    pub fn new(default_currency: impl Into<String>) -> Self {
        Self {
            default_currency: default_currency.into(),
        }
    }

    fn extract_sync(&self, page: &FetchResult, set: &SelectorSet) -> StrategyOutcome {
        let doc = Html::parse_document(&page.body);

        let Some(name) =
            first_value(&doc, &set.name).and_then(|raw| sanitize_product_name(&raw))
        else {
            return StrategyOutcome::NoMatch;
        };
        let Some(price) = first_value(&doc, &set.price).and_then(|raw| normalize_price(&raw))
        else {
            return StrategyOutcome::NoMatch;
        };

        let original_price = first_value(&doc, &set.original_price)
            .and_then(|raw| normalize_price(&raw))
            .filter(|orig| *orig > price);
        let in_stock = first_value(&doc, &set.availability)
            .is_none_or(|text| in_stock_from_text(&text, &set.in_stock_patterns));
        let image_url = first_image(&doc, &set.image)
            .and_then(|src| resolve_image_url(&page.final_url, &src));

        StrategyOutcome::Found(ProductFields {
            name,
            price,
            original_price,
            currency: self.default_currency.clone(),
            in_stock,
            image_url,
        })
    }
}

#[async_trait]
impl ExtractionStrategy for CssStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CssSelector
    }

    async fn extract(
        &self,
        page: &FetchResult,
        selectors: Option<&SelectorSet>,
    ) -> StrategyOutcome {
        match selectors {
            Some(set) if !set.is_empty() => self.extract_sync(page, set),
            _ => StrategyOutcome::NoMatch,
        }
    }
}

fn first_element<'a>(doc: &'a Html, selectors: &[impl AsRef<str>]) -> Option<ElementRef<'a>> {
    selectors.iter().find_map(|raw| {
        let selector = match Selector::parse(raw.as_ref()) {
            Ok(s) => s,
            Err(err) => {
                debug!(selector = raw.as_ref(), %err, "unparseable selector skipped");
                return None;
            }
        };
        doc.select(&selector).next()
    })
}

/// Text or `content` value of the first element any selector matches.
pub(crate) fn first_value(doc: &Html, selectors: &[impl AsRef<str>]) -> Option<String> {
    let element = first_element(doc, selectors)?;
    if let Some(content) = element.attr("content") {
        return Some(content.to_owned());
    }
    let text = element.text().collect::<String>();
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// Image source of the first matching element, trying the usual attributes.
pub(crate) fn first_image(doc: &Html, selectors: &[impl AsRef<str>]) -> Option<String> {
    let element = first_element(doc, selectors)?;
    ["content", "src", "data-src", "href"]
        .iter()
        .find_map(|attr| element.attr(attr))
        .map(str::to_owned)
}
