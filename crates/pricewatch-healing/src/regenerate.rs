//! Model-assisted selector regeneration.
//!
//! When a domain's selectors stop matching, we fetch the page once, ask the
//! model what the fields are and where they live, validate the proposed
//! selectors against that same page, and commit them with a version
//! compare-and-swap. Regeneration is serialized per domain so sibling
//! targets cannot burn tokens proposing the same fix.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pricewatch_core::{
    CommitOutcome, CostBudget, ExtractionTarget, ModelExtractor, TargetRepository,
};
use pricewatch_scraper::block::{self, Verdict};
use pricewatch_scraper::fetch::PageFetcher;
use pricewatch_scraper::price::{sanitize_product_name, validate_price};
use pricewatch_scraper::strategies::llm::clean_text;
use pricewatch_scraper::strategies::{CssStrategy, ExtractionStrategy, StrategyOutcome};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Result of one regeneration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealOutcome {
    /// New selector set committed at this version.
    Updated { version: u64 },
    /// Someone else already replaced the set this attempt was based on.
    Superseded,
    /// Token budget spent; retry in the next window at no cost to counters.
    Deferred,
    /// The attempt ran and did not produce a working set.
    Failed,
}

pub struct SelectorRegenerator {
    fetcher: Arc<dyn PageFetcher>,
    model: Arc<dyn ModelExtractor>,
    repo: Arc<dyn TargetRepository>,
    budget: Arc<CostBudget>,
    validator: CssStrategy,
    max_plausible_price: Decimal,
    default_currency: String,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SelectorRegenerator {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        model: Arc<dyn ModelExtractor>,
        repo: Arc<dyn TargetRepository>,
        budget: Arc<CostBudget>,
        max_plausible_price: Decimal,
        default_currency: impl Into<String>,
    ) -> Self {
        let default_currency = default_currency.into();
        Self {
            fetcher,
            model,
            repo,
            budget,
            validator: CssStrategy::new(default_currency.clone()),
            max_plausible_price,
            default_currency,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Regenerates selectors for the target's domain.
    ///
    /// `failed_version` is the selector-set version the failing extraction
    /// used, 0 when none existed. If the stored version has moved past it
    /// by the time the domain lock is held, a sibling already healed the
    /// domain and this attempt is superseded.
    pub async fn regenerate(&self, target: &ExtractionTarget, failed_version: u64) -> HealOutcome {
        if self.budget.is_exhausted() {
            info!(domain = %target.domain, "token budget spent, deferring regeneration");
            return HealOutcome::Deferred;
        }

        let lock = self.domain_lock(&target.domain);
        let _guard = lock.lock().await;

        let current = match self.repo.selector_set(&target.domain).await {
            Ok(set) => set,
            Err(err) => {
                warn!(domain = %target.domain, %err, "selector read failed");
                return HealOutcome::Failed;
            }
        };
        let current_version = current.map_or(0, |set| set.version);
        if current_version != failed_version {
            info!(
                domain = %target.domain,
                failed_version,
                current_version,
                "selectors already replaced, skipping regeneration"
            );
            return HealOutcome::Superseded;
        }

        let page = match self.fetcher.fetch(target).await {
            Ok(page) => page,
            Err(err) => {
                warn!(domain = %target.domain, %err, "regeneration fetch failed");
                return HealOutcome::Failed;
            }
        };
        if page.status >= 400 || !matches!(block::classify(&page), Verdict::Clean | Verdict::Empty)
        {
            warn!(
                domain = %target.domain,
                status = page.status,
                "page unusable for regeneration"
            );
            return HealOutcome::Failed;
        }

        let text = clean_text(&page.body);
        if text.is_empty() {
            return HealOutcome::Failed;
        }

        let fields = match self.model.extract_fields(&text, &self.default_currency).await {
            Ok(proposed) => {
                self.budget.record_spent(proposed.tokens_spent);
                proposed.fields
            }
            Err(err) => {
                warn!(domain = %target.domain, %err, "model field extraction failed");
                return HealOutcome::Failed;
            }
        };
        if sanitize_product_name(&fields.name).is_none()
            || !validate_price(fields.price, self.max_plausible_price)
        {
            warn!(domain = %target.domain, "model fields failed validation");
            return HealOutcome::Failed;
        }

        let mut set = match self.model.propose_selectors(&text, &fields).await {
            Ok(proposed) => {
                self.budget.record_spent(proposed.tokens_spent);
                proposed.set
            }
            Err(err) => {
                warn!(domain = %target.domain, %err, "selector proposal failed");
                return HealOutcome::Failed;
            }
        };
        set.domain = target.domain.clone();
        set.version = current_version + 1;

        // Proposed selectors must reproduce a sane result on the very page
        // they were derived from, or they are not worth committing.
        match self.validator.extract(&page, Some(&set)).await {
            StrategyOutcome::Found(extracted)
                if validate_price(extracted.price, self.max_plausible_price) => {}
            other => {
                warn!(domain = %target.domain, ?other, "proposed selectors failed validation");
                return HealOutcome::Failed;
            }
        }

        match self
            .repo
            .commit_selector_set(&target.domain, current_version, set.clone())
            .await
        {
            Ok(CommitOutcome::Committed) => {
                info!(
                    domain = %target.domain,
                    version = set.version,
                    "selector set regenerated"
                );
                HealOutcome::Updated {
                    version: set.version,
                }
            }
            Ok(CommitOutcome::VersionConflict) => HealOutcome::Superseded,
            Err(err) => {
                warn!(domain = %target.domain, %err, "selector commit failed");
                HealOutcome::Failed
            }
        }
    }

    fn domain_lock(&self, domain: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            locks
                .entry(domain.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}
