//! Price and product-name normalization.
//!
//! Parsing and plausibility are deliberately separate: a string that parses
//! to zero or a negative number is still a parsed price, and gets rejected
//! later as a validation failure rather than reported as "no price found".

use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

static PRICE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"-?\d+(?:,\d{3})*(?:\.\d+)?").unwrap()
});

/// Maximum characters kept from a scraped product name.
const MAX_NAME_LEN: usize = 500;

/// Parses a raw price string into a two-decimal amount.
///
/// Strips currency symbols and codes, thousands separators, and surrounding
/// text. For a range ("$10.99 - $24.99") the lower bound wins. Returns `None`
/// only when no numeric token is present at all.
#[must_use]
pub fn normalize_price(raw: &str) -> Option<Decimal> {
    let token = PRICE_TOKEN.find(raw)?.as_str().replace(',', "");
    let amount: Decimal = token.parse().ok()?;
    Some(amount.round_dp(2))
}

/// Whether a parsed price is plausible for a retail product.
#[must_use]
pub fn validate_price(price: Decimal, max_plausible: Decimal) -> bool {
    price >= Decimal::new(1, 2) && price <= max_plausible
}

/// Collapses whitespace and caps the length of a scraped product name.
/// Returns `None` when nothing printable remains.
#[must_use]
pub fn sanitize_product_name(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(MAX_NAME_LEN).collect())
}
