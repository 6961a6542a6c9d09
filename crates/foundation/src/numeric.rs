//! Numeric coercion for string-valued fields
//!
//! The store holds strings; readers turn them into numbers here. Anything
//! that does not parse to a finite number becomes `0.0` so invalid input
//! never propagates downstream as NaN.

use tracing::warn;

/// Value substituted when a stored string is not a finite number.
pub const NEUTRAL: f64 = 0.0;

/// Parse a stored string into a finite number.
///
/// Accepts surrounding whitespace, thousands separators (`1,250.5`) and a
/// trailing percent sign (`"35%"` parses as `35`).
pub fn parse_numeric(raw: &str) -> f64 {
    let cleaned: String = raw
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',')
        .collect();

    match cleaned.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => NEUTRAL,
    }
}

/// Parse an optional stored value, substituting `default` when absent.
pub fn parse_or(raw: Option<&str>, default: f64) -> f64 {
    raw.map(parse_numeric).unwrap_or(default)
}

/// Render a number for storage.
///
/// Non-finite values are stored as the neutral value.
pub fn format_numeric(value: f64) -> String {
    if value.is_finite() {
        // Avoid storing "-0"
        if value == 0.0 {
            return "0".to_string();
        }
        value.to_string()
    } else {
        NEUTRAL.to_string()
    }
}

/// Divide, substituting `fallback` when the denominator is zero.
///
/// `label` names the derived ratio in the warning that is logged.
pub fn safe_divide(numerator: f64, denominator: f64, fallback: f64, label: &str) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        warn!(ratio = label, numerator, fallback, "division by zero, using fallback");
        return fallback;
    }
    let result = numerator / denominator;
    if result.is_finite() { result } else { fallback }
}
