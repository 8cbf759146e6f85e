//! Model-assisted extraction, last in the waterfall.
//!
//! Every call is token-metered against the shared daily budget. When the
//! budget is spent the strategy defers instead of failing, so a miss here
//! is retried on the next scheduled run for free.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use pricewatch_core::{CostBudget, ModelExtractor, ProductFields, SelectorSet, StrategyKind};
use regex::Regex;
use scraper::Html;
use tracing::{debug, warn};

use crate::fetch::FetchResult;
use crate::price::sanitize_product_name;
use crate::strategies::{ExtractionStrategy, StrategyOutcome};

/// Characters of cleaned page text sent to the model.
const MAX_TEXT_CHARS: usize = 15_000;

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap()
});

pub struct LlmStrategy {
    model: Arc<dyn ModelExtractor>,
    budget: Arc<CostBudget>,
    default_currency: String,
}

impl LlmStrategy {
    #[must_use]
    pub fn new(
        model: Arc<dyn ModelExtractor>,
        budget: Arc<CostBudget>,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            model,
            budget,
            default_currency: default_currency.into(),
        }
    }
}

#[async_trait]
impl ExtractionStrategy for LlmStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Llm
    }

    async fn extract(
        &self,
        page: &FetchResult,
        _selectors: Option<&SelectorSet>,
    ) -> StrategyOutcome {
        if self.budget.is_exhausted() {
            debug!(url = %page.final_url, "token budget spent, deferring model extraction");
            return StrategyOutcome::Deferred;
        }

        let text = clean_text(&page.body);
        if text.is_empty() {
            return StrategyOutcome::NoMatch;
        }

        let proposed = match self.model.extract_fields(&text, &self.default_currency).await {
            Ok(p) => p,
            Err(err) => {
                warn!(url = %page.final_url, %err, "model extraction failed");
                return StrategyOutcome::NoMatch;
            }
        };
        self.budget.record_spent(proposed.tokens_spent);

        match sanitize_product_name(&proposed.fields.name) {
            Some(name) => StrategyOutcome::Found(ProductFields {
                name,
                ..proposed.fields
            }),
            None => StrategyOutcome::NoMatch,
        }
    }
}

/// Visible page text, whitespace-collapsed and capped for prompt size.
/// Also used by selector regeneration, which sends the same cleaned text.
#[must_use]
pub fn clean_text(body: &str) -> String {
    let stripped = SCRIPT_OR_STYLE.replace_all(body, " ");
    let text = extract_text(&stripped);
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_TEXT_CHARS)
        .collect()
}

fn extract_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    doc.root_element().text().collect::<Vec<_>>().join(" ")
}
