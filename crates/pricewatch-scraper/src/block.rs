//! Layered bot-block and challenge detection.
//!
//! Runs after the fetch and before any extraction strategy, so a block page
//! is never mistaken for a product page with missing fields. Layers, in
//! order: HTTP status, challenge markers, block markers, emptiness.

use std::sync::LazyLock;

use regex::Regex;

use crate::fetch::FetchResult;

/// What the detector concluded about a fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Looks like a normal page; run the strategy chain.
    Clean,
    /// Access denied or bot-detection interstitial.
    Blocked,
    /// Interactive challenge (CAPTCHA, JS challenge) that automation
    /// cannot pass.
    Challenged,
    /// Normal-looking response with no product-like content at all.
    Empty,
}

static CHALLENGE_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(
        r"(?i)captcha|verify (?:that )?you are (?:a )?human|are you a robot|just a moment|checking your browser|challenge-platform|cf-chl|px-captcha|h-captcha|g-recaptcha",
    )
    .unwrap()
});

static BLOCK_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(
        r"(?i)access denied|access to this page has been denied|detected unusual traffic|pardon our interruption|request blocked|bot detection|security check|attention required|_incapsula_|distil_r_blocked|reference #?[0-9a-f]{2}",
    )
    .unwrap()
});

static MAINTENANCE_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)rate limit|too many requests|temporarily unavailable|under maintenance")
        .unwrap()
});

static PRICE_SIGNAL: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r#"(?i)[$€£¥]\s*\d|\d+\.\d{2}|itemprop="price"|"price"|class="[^"]*price"#).unwrap()
});

static TITLE_SIGNAL: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r#"(?i)<h1[\s>]|property="og:title"|itemprop="name"|<title>[^<]"#).unwrap()
});

/// Marker scans only look this far into the body; block pages are short.
const SCAN_LIMIT: usize = 32 * 1024;

/// A 200 body shorter than this cannot be a product page.
const MIN_BODY_LEN: usize = 512;

/// Classifies a fetched page. Statuses outside `{403, 429, 503, 2xx}` are
/// left `Clean` for the caller's status triage.
#[must_use]
pub fn classify(fetch: &FetchResult) -> Verdict {
    let scan = scan_window(&fetch.body);

    match fetch.status {
        403 => {
            if CHALLENGE_MARKERS.is_match(scan) {
                Verdict::Challenged
            } else {
                Verdict::Blocked
            }
        }
        429 => Verdict::Blocked,
        503 => {
            if CHALLENGE_MARKERS.is_match(scan) {
                Verdict::Challenged
            } else if BLOCK_MARKERS.is_match(scan) || MAINTENANCE_MARKERS.is_match(scan) {
                Verdict::Blocked
            } else {
                // Plain 503 is a server problem, not a block.
                Verdict::Clean
            }
        }
        200..=299 => {
            if CHALLENGE_MARKERS.is_match(scan) {
                Verdict::Challenged
            } else if BLOCK_MARKERS.is_match(scan) {
                Verdict::Blocked
            } else if looks_empty(&fetch.body) {
                Verdict::Empty
            } else {
                Verdict::Clean
            }
        }
        _ => Verdict::Clean,
    }
}

fn scan_window(body: &str) -> &str {
    let mut end = body.len().min(SCAN_LIMIT);
    while end < body.len() && !body.is_char_boundary(end) {
        end += 1;
    }
    &body[..end]
}

fn looks_empty(body: &str) -> bool {
    if body.trim().len() < MIN_BODY_LEN {
        return true;
    }
    !PRICE_SIGNAL.is_match(body) && !TITLE_SIGNAL.is_match(body)
}
