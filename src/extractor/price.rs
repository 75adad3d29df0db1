//! Locale-aware price string parsing

use crate::models::Marketplace;

/// Parse a raw price fragment into a float, honoring the marketplace's
/// number format.
///
/// Comma-decimal storefronts (`1.234,56`) strip periods as thousand
/// separators and promote the comma to a decimal point; dot-decimal
/// storefronts (`1,234.56`) strip commas. Anything unparsable yields `None`,
/// never an error.
pub fn parse_price(raw: &str, marketplace: Marketplace) -> Option<f64> {
    if raw.is_empty() {
        return None;
    }

    let mut text: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    text = text.trim_end_matches([',', '.']).to_string();

    if marketplace.uses_comma_decimal() {
        if text.contains(',') {
            text = text.replace('.', "");
            text = text.replace(',', ".");
        } else if text.matches('.').count() > 1 {
            // No comma and several periods: all of them are thousand
            // separators.
            text = text.replace('.', "");
        }
    } else {
        text = text.replace(',', "");
    }

    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if digits.is_empty() {
        return None;
    }

    digits.parse::<f64>().ok()
}
