//! Shared data model for the extraction pipeline.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::category::ErrorCategory;

/// A product page the pipeline is asked to extract from.
///
/// Owned by the external product registry; read-only input to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionTarget {
    pub id: Uuid,
    pub url: String,
    /// Registrable domain, used as the grouping and rate-limiting key.
    pub domain: String,
    /// Optional selector to wait for before considering the page loaded.
    pub wait_hint: Option<String>,
}

/// Which extraction strategy produced a result. Order here is waterfall order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Embedded schema.org structured data.
    JsonLd,
    /// Configured per-domain CSS selectors.
    CssSelector,
    /// Positional/structural fallback selectors.
    Fallback,
    /// Model-assisted extraction (token-costed).
    Llm,
}

/// Fields extracted from a product page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFields {
    pub name: String,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    pub currency: String,
    pub in_stock: bool,
    pub image_url: Option<String>,
}

/// Outcome of one extraction run for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    /// Strategy that produced the fields; `None` on failure.
    pub strategy: Option<StrategyKind>,
    pub fields: Option<ProductFields>,
    pub error: Option<ErrorCategory>,
    /// Total fetch attempts made, including retries.
    pub attempts: u32,
}

impl ExtractionOutcome {
    #[must_use]
    pub fn success(&self) -> bool {
        self.fields.is_some() && self.error.is_none()
    }

    /// Successful outcome via `strategy`.
    #[must_use]
    pub fn ok(strategy: StrategyKind, fields: ProductFields, attempts: u32) -> Self {
        Self {
            strategy: Some(strategy),
            fields: Some(fields),
            error: None,
            attempts,
        }
    }

    /// Failed outcome with the given category.
    #[must_use]
    pub fn failed(error: ErrorCategory, attempts: u32) -> Self {
        Self {
            strategy: None,
            fields: None,
            error: Some(error),
            attempts,
        }
    }
}

/// Append-only record of one completed attempt; the scrape-log equivalent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub target_id: Uuid,
    pub domain: String,
    pub outcome: ExtractionOutcome,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub at: DateTime<Utc>,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        u64::try_from(d.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Per-target failure counters, mutated across runs.
///
/// Invariant: both counters reset to zero on the first success after any
/// failure streak; `healing_attempts` only moves after a healing trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounter {
    pub consecutive_failures: u32,
    pub healing_attempts: u32,
}

impl FailureCounter {
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.healing_attempts = 0;
    }
}

/// Ordered CSS selectors for one field, most specific first.
pub type FieldSelectors = Vec<String>;

/// Per-domain selector configuration, shared by every product at the domain.
///
/// Versioned: the repository commits a replacement set atomically with a
/// compare-and-swap on `version`, so readers see either the old or the new
/// complete set, never a mix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSet {
    pub domain: String,
    pub version: u64,
    pub name: FieldSelectors,
    pub price: FieldSelectors,
    pub original_price: FieldSelectors,
    pub image: FieldSelectors,
    pub availability: FieldSelectors,
    /// Substrings that mark an availability element as in-stock.
    pub in_stock_patterns: Vec<String>,
    /// Selector to wait for before the page counts as loaded.
    pub wait_for: Option<String>,
}

impl SelectorSet {
    /// A set with no selectors configured for any field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.price.is_empty()
            && self.original_price.is_empty()
            && self.image.is_empty()
            && self.availability.is_empty()
    }
}

/// Derived rolling health for one store domain. Not authoritative;
/// re-derive on demand when precision matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHealth {
    pub domain: String,
    /// Successes over total attempts within the window, 0.0..=1.0.
    pub success_rate: f64,
    pub sample_count: usize,
    pub last_success_at: Option<DateTime<Utc>>,
    pub flagged: bool,
}

/// What a schedule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleScope {
    Product(Uuid),
    Store(String),
    SystemDefault,
}

/// A recurring check cadence. Created by the user-facing layer; the core
/// validates it and resolves the effective spec per target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub cron: String,
    pub scope: ScheduleScope,
}
