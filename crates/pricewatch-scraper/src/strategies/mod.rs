//! Extraction strategy waterfall.
//!
//! Strategies run in fixed order from most structured to most expensive:
//! JSON-LD, configured CSS selectors, structural fallback, then the
//! model-assisted extractor. The chain stops at the first strategy that
//! yields a complete field set; plausibility checks happen in the engine.

pub mod css;
pub mod fallback;
pub mod json_ld;
pub mod llm;

use async_trait::async_trait;
use pricewatch_core::{ProductFields, SelectorSet, StrategyKind};
use tracing::debug;
use url::Url;

use crate::fetch::FetchResult;

pub use css::CssStrategy;
pub use fallback::FallbackStrategy;
pub use json_ld::JsonLdStrategy;
pub use llm::LlmStrategy;

/// Result of a single strategy's pass over a page.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    /// Complete field set (at minimum name and price).
    Found(ProductFields),
    /// Nothing usable on this page for this strategy.
    NoMatch,
    /// Strategy skipped itself; today only the model strategy does this
    /// when the token budget is spent.
    Deferred,
}

/// One extraction approach. Implementations must not error out of the
/// waterfall; an internal failure is a `NoMatch` plus a log line.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn extract(
        &self,
        page: &FetchResult,
        selectors: Option<&SelectorSet>,
    ) -> StrategyOutcome;
}

/// Outcome of running the full waterfall.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainResult {
    pub found: Option<(StrategyKind, ProductFields)>,
    /// True when nothing matched and the model strategy deferred for
    /// budget, so the miss should not count as a parse failure.
    pub deferred: bool,
}

pub struct StrategyChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl StrategyChain {
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// The standard waterfall: JSON-LD, configured CSS, structural fallback,
    /// then the model extractor when one is wired in.
    #[must_use]
    pub fn waterfall(
        default_currency: &str,
        model: Option<std::sync::Arc<dyn pricewatch_core::ModelExtractor>>,
        budget: std::sync::Arc<pricewatch_core::CostBudget>,
    ) -> Self {
        let mut strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(JsonLdStrategy::new(default_currency)),
            Box::new(CssStrategy::new(default_currency)),
            Box::new(FallbackStrategy::new(default_currency)),
        ];
        if let Some(model) = model {
            strategies.push(Box::new(LlmStrategy::new(model, budget, default_currency)));
        }
        Self::new(strategies)
    }

    pub async fn run(
        &self,
        page: &FetchResult,
        selectors: Option<&SelectorSet>,
    ) -> ChainResult {
        let mut deferred = false;
        for strategy in &self.strategies {
            match strategy.extract(page, selectors).await {
                StrategyOutcome::Found(fields) => {
                    debug!(strategy = ?strategy.kind(), url = %page.final_url, "strategy matched");
                    return ChainResult {
                        found: Some((strategy.kind(), fields)),
                        deferred: false,
                    };
                }
                StrategyOutcome::NoMatch => {
                    debug!(strategy = ?strategy.kind(), url = %page.final_url, "strategy missed");
                }
                StrategyOutcome::Deferred => deferred = true,
            }
        }
        ChainResult {
            found: None,
            deferred,
        }
    }
}

/// Resolves a possibly relative or protocol-relative image source against
/// the page URL.
pub(crate) fn resolve_image_url(page_url: &str, src: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    let base = Url::parse(page_url).ok()?;
    base.join(src).ok().map(String::from)
}

/// Decides stock status from an availability element's text.
///
/// With configured patterns, any match means in stock. Without patterns we
/// fall back to common out-of-stock phrases, defaulting to in stock.
pub(crate) fn in_stock_from_text(text: &str, patterns: &[String]) -> bool {
    let lowered = text.to_lowercase();
    if patterns.is_empty() {
        return !(lowered.contains("out of stock")
            || lowered.contains("sold out")
            || lowered.contains("currently unavailable"));
    }
    patterns.iter().any(|p| lowered.contains(&p.to_lowercase()))
}
