//! Environment-based pipeline configuration.
//!
//! All knobs are read from `PRICEWATCH_*` env vars with documented defaults.
//! The parsing core is decoupled from the process environment so tests can
//! drive it with a plain `HashMap` lookup.

use std::ops::RangeInclusive;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

/// Tunables for the whole extraction-and-recovery pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Timeout for a single page fetch.
    pub fetch_timeout: Duration,
    /// Wall-clock budget for processing one target end to end.
    pub operation_timeout: Duration,
    /// Maximum simultaneous in-flight fetch sessions across all domains.
    pub global_concurrency: usize,
    /// Concurrent targets within a single domain batch.
    pub intra_domain_concurrency: usize,
    /// Block new acquisitions while system memory utilization exceeds this.
    pub memory_threshold: f64,
    /// Randomized inter-request delay per domain, in seconds.
    pub domain_delay_secs: RangeInclusive<u64>,
    /// Cap on the exponential per-domain penalty delay.
    pub max_domain_delay: Duration,
    /// Retries for transient categories (network/timeout/5xx/429).
    pub max_retries: u32,
    /// Base backoff delay for transient retries.
    pub backoff_base: Duration,
    /// Longer base for rate-limited responses.
    pub rate_limit_backoff_base: Duration,
    /// Consecutive failures before healing is considered.
    pub failure_threshold: u32,
    /// Healing attempts before a target is marked terminal.
    pub max_healing_attempts: u32,
    /// Rolling window for domain health.
    pub health_window: Duration,
    /// Flag a domain below this 7-day success rate.
    pub health_flag_rate: f64,
    /// Flag a domain once this many targets need attention.
    pub health_flag_attention_count: usize,
    /// Prices above this are rejected as implausible.
    pub max_plausible_price: Decimal,
    /// Daily token budget shared by the LLM strategy and the regenerator.
    pub daily_token_budget: i64,
    pub user_agent: String,
    /// Permit targets on loopback and private addresses. Off in production;
    /// test environments fetching from a local mock server turn it on.
    pub allow_private_targets: bool,
    /// Currency assumed when a page does not state one.
    pub default_currency: String,
    /// System-default cadence (6-field cron, seconds first).
    pub default_cron: String,
    /// Maximum jitter applied around the default cadence, in minutes.
    pub default_jitter_minutes: i64,
    /// Minimum hours between runs of any accepted schedule.
    pub min_interval_hours: u32,
}

/// Loads configuration from the process environment, reading `.env` first.
///
/// # Errors
///
/// Returns [`ConfigError`] if a `PRICEWATCH_*` var holds an unparseable value.
pub fn load_config() -> Result<PipelineConfig, ConfigError> {
    dotenvy::dotenv().ok();
    build_config(|key| std::env::var(key))
}

/// Builds configuration from the given env-var lookup function.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEnvVar`] when a present value fails to parse.
pub fn build_config<F>(lookup: F) -> Result<PipelineConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let or_default = |var: &str, default: &str| lookup(var).unwrap_or_else(|_| default.to_string());

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };
    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };
    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };
    let parse_f64 = |var: &str, default: &str| -> Result<f64, ConfigError> {
        or_default(var, default)
            .parse::<f64>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };
    let parse_bool = |var: &str, default: &str| -> Result<bool, ConfigError> {
        or_default(var, default)
            .parse::<bool>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };
    let parse_i64 = |var: &str, default: &str| -> Result<i64, ConfigError> {
        or_default(var, default)
            .parse::<i64>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let delay_min = parse_u64("PRICEWATCH_DOMAIN_DELAY_MIN_SECS", "2")?;
    let delay_max = parse_u64("PRICEWATCH_DOMAIN_DELAY_MAX_SECS", "5")?;
    if delay_min > delay_max {
        return Err(ConfigError::InvalidEnvVar {
            var: "PRICEWATCH_DOMAIN_DELAY_MIN_SECS".to_string(),
            reason: format!("min delay {delay_min}s exceeds max delay {delay_max}s"),
        });
    }

    let max_plausible_price = or_default("PRICEWATCH_MAX_PLAUSIBLE_PRICE", "1000000")
        .parse::<Decimal>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: "PRICEWATCH_MAX_PLAUSIBLE_PRICE".to_string(),
            reason: e.to_string(),
        })?;

    Ok(PipelineConfig {
        fetch_timeout: Duration::from_secs(parse_u64("PRICEWATCH_FETCH_TIMEOUT_SECS", "30")?),
        operation_timeout: Duration::from_secs(parse_u64(
            "PRICEWATCH_OPERATION_TIMEOUT_SECS",
            "120",
        )?),
        global_concurrency: parse_usize("PRICEWATCH_GLOBAL_CONCURRENCY", "3")?,
        intra_domain_concurrency: parse_usize("PRICEWATCH_INTRA_DOMAIN_CONCURRENCY", "2")?,
        memory_threshold: parse_f64("PRICEWATCH_MEMORY_THRESHOLD", "0.70")?,
        domain_delay_secs: delay_min..=delay_max,
        max_domain_delay: Duration::from_secs(parse_u64("PRICEWATCH_MAX_DOMAIN_DELAY_SECS", "60")?),
        max_retries: parse_u32("PRICEWATCH_MAX_RETRIES", "3")?,
        backoff_base: Duration::from_secs(parse_u64("PRICEWATCH_BACKOFF_BASE_SECS", "1")?),
        rate_limit_backoff_base: Duration::from_secs(parse_u64(
            "PRICEWATCH_RATE_LIMIT_BACKOFF_BASE_SECS",
            "5",
        )?),
        failure_threshold: parse_u32("PRICEWATCH_FAILURE_THRESHOLD", "3")?,
        max_healing_attempts: parse_u32("PRICEWATCH_MAX_HEALING_ATTEMPTS", "3")?,
        health_window: Duration::from_secs(
            parse_u64("PRICEWATCH_HEALTH_WINDOW_DAYS", "7")? * 24 * 3600,
        ),
        health_flag_rate: parse_f64("PRICEWATCH_HEALTH_FLAG_RATE", "0.5")?,
        health_flag_attention_count: parse_usize("PRICEWATCH_HEALTH_FLAG_ATTENTION_COUNT", "5")?,
        max_plausible_price,
        daily_token_budget: parse_i64("PRICEWATCH_DAILY_TOKEN_BUDGET", "100000")?,
        user_agent: or_default(
            "PRICEWATCH_USER_AGENT",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        ),
        allow_private_targets: parse_bool("PRICEWATCH_ALLOW_PRIVATE_TARGETS", "false")?,
        default_currency: or_default("PRICEWATCH_DEFAULT_CURRENCY", "CAD"),
        default_cron: or_default("PRICEWATCH_DEFAULT_CRON", "0 0 6 * * *"),
        default_jitter_minutes: parse_i64("PRICEWATCH_DEFAULT_JITTER_MINUTES", "30")?,
        min_interval_hours: parse_u32("PRICEWATCH_MIN_INTERVAL_HOURS", "24")?,
    })
}
