//! Page fetching, block detection, and the multi-strategy extractor.
//!
//! One call into [`engine::ExtractionEngine`] takes an extraction target
//! through rate limiting, fetch, block triage, the strategy waterfall, and
//! category-aware retries, and returns a single
//! [`pricewatch_core::ExtractionOutcome`].

pub mod agents;
pub mod block;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod memory;
pub mod price;
pub mod rate_limit;
pub mod retry;
pub mod robots;
pub mod strategies;
pub mod validate;

pub use agents::UserAgentPool;
pub use engine::ExtractionEngine;
pub use error::ScrapeError;
pub use fetch::{FetchResult, HttpFetcher, PageFetcher};
pub use rate_limit::RateLimiter;
pub use retry::{RetryDecision, RetryPolicy};
pub use robots::{RobotsGuard, RobotsRules, RobotsVerdict};
pub use validate::validate_target_url;
