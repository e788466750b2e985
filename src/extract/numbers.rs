//! Number parsing for text scraped out of product pages.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

/// A run of decimal digits.
static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// A price token: digit groups joined by `.` or `,` (thousands and/or fraction).
static AMOUNT_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:[.,]\d+)*").unwrap());

/// Parse the first run of decimal digits in `text`.
///
/// Returns `None` when there is no digit run or it does not fit `T`.
pub fn first_integer<T: FromStr>(text: &str) -> Option<T> {
    DIGIT_RUN.find(text)?.as_str().parse().ok()
}

/// Parse the first price-looking token in `text` into an exact decimal.
///
/// The last `.` or `,` is the fraction separator when it is followed by one
/// or two digits; every other separator is a thousands separator and is
/// dropped. This accepts both `1,234.56` and `1.234,56`.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let token = AMOUNT_TOKEN.find(text)?.as_str();

    let (whole, fraction) = match token.rfind(|c: char| c == '.' || c == ',') {
        Some(pos) if (1..=2).contains(&(token.len() - pos - 1)) => {
            (&token[..pos], Some(&token[pos + 1..]))
        }
        _ => (token, None),
    };

    let mut normalized: String = whole.chars().filter(char::is_ascii_digit).collect();
    if let Some(fraction) = fraction {
        normalized.push('.');
        normalized.push_str(fraction);
    }

    Decimal::from_str(&normalized).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_first_integer() {
        assert_eq!(first_integer::<i64>("Op voorraad: 42 stuks"), Some(42));
        assert_eq!(first_integer::<i64>("Nog 7 op voorraad, levering 2 dagen"), Some(7));
        assert_eq!(first_integer::<u32>("Prijs per stuk (100 stuks)"), Some(100));
        assert_eq!(first_integer::<i64>("Niet op voorraad"), None);
        assert_eq!(first_integer::<i64>(""), None);
    }

    #[test]
    fn test_first_integer_overflow_is_absent() {
        assert_eq!(first_integer::<u32>("99999999999999 stuks"), None);
    }

    #[test]
    fn test_parse_amount_european() {
        assert_eq!(parse_amount("€ 12,50"), Some(dec("12.50")));
        assert_eq!(parse_amount("€1.234,56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("€ 0,09 per stuk"), Some(dec("0.09")));
    }

    #[test]
    fn test_parse_amount_english() {
        assert_eq!(parse_amount("$1,234.56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("12.5"), Some(dec("12.5")));
    }

    #[test]
    fn test_parse_amount_thousands_only() {
        assert_eq!(parse_amount("1,234"), Some(dec("1234")));
        assert_eq!(parse_amount("1.250.000"), Some(dec("1250000")));
        assert_eq!(parse_amount("€ 15"), Some(dec("15")));
    }

    #[test]
    fn test_parse_amount_trailing_dash() {
        // Dutch shops write whole euros as "15,-"
        assert_eq!(parse_amount("€ 15,-"), Some(dec("15")));
    }

    #[test]
    fn test_parse_amount_missing() {
        assert_eq!(parse_amount("Prijs op aanvraag"), None);
        assert_eq!(parse_amount(""), None);
    }
}
