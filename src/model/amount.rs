//! Amount type and the number parsers used to read monetary cells.
//!
//! Ledger cells arrive either as native numbers or as text written the Venezuelan way
//! (`1.234,56`, `(1.234,56) BS`). Both parsers here agree on one rule for separators: when a
//! dot and a comma are both present, the dot groups thousands and the comma is the decimal
//! mark; a lone comma is the decimal mark. Anything that cannot be read is zero.
//!
//! The ledger parser also reads dot-grouped integers (`1.500`, `12.345.678`) as thousands, since
//! the ledger is kept in bolivars and never carries three-place decimals.

use crate::model::CellValue;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::OnceLock;

/// Currency tokens that may trail or lead an amount written as text.
const CURRENCY_TOKENS: [&str; 2] = ["BS", "USD"];

/// A monetary value. Displays like the `#,##0.00` spreadsheet format, e.g. `-60,000,000.00`.
///
/// `FromStr` reads plain, comma-grouped text such as `1,000.50` or `$1,000.50`; use
/// `parse_amount` or `parse_amount_ve` for cells that use the comma as decimal mark.
///
/// ```
/// # use cuadre::model::Amount;
/// # use std::str::FromStr;
/// let amount = Amount::from_str("-1,234.5").unwrap();
/// assert_eq!(amount.to_string(), "-1,234.50");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount {
    value: Decimal,
}

impl Amount {
    pub const ZERO: Amount = Amount::new(Decimal::ZERO);

    pub const fn new(value: Decimal) -> Self {
        Self { value }
    }

    /// Returns the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.value
    }
}

/// An error that can occur when parsing strings into `Decimal` values.
pub struct AmountError(rust_decimal::Error);

impl Debug for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl std::error::Error for AmountError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Amount::default());
        }

        // Dollar sign may follow a minus: "-$50.00"
        let without_dollar = match trimmed.strip_prefix('-') {
            Some(rest) => format!("-{}", rest.trim_start_matches('$')),
            None => trimmed.trim_start_matches('$').to_string(),
        };

        // Remove commas (thousand separators)
        let without_commas = without_dollar.replace(',', "");
        let value = Decimal::from_str(without_commas.trim()).map_err(AmountError)?;
        Ok(Amount::new(value))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let sign = if self.value < Decimal::ZERO { "-" } else { "" };
        let num = self.value.abs().to_f64().unwrap_or_default();
        write!(f, "{sign}{}", format_num::format_num!(",.2", num))
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.value()
    }
}

/// Reads the source-currency amount of a primary ledger row.
///
/// Numbers pass through. Text that is blank or a lone `-` (the template's "no amount" marker)
/// is zero without further work; other text goes through the shared localized parser, with
/// dot-grouped integers such as `1.500` read as thousands.
pub fn parse_amount(value: &CellValue) -> Decimal {
    match value {
        CellValue::Number(n) => *n,
        CellValue::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed == "-" {
                return Decimal::ZERO;
            }
            parse_localized(trimmed, true).unwrap_or_default()
        }
        _ => Decimal::ZERO,
    }
}

/// Reads an amount the way the reconciliation sheets write them, where currency tokens and
/// accounting parentheses are common: `(1.234,56) BS` is `-1234.56`.
pub fn parse_amount_ve(value: &CellValue) -> Decimal {
    match value {
        CellValue::Number(n) => *n,
        CellValue::Text(s) => parse_localized(&s.to_uppercase(), false).unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

/// Reads a cell that this system writes itself (plain decimals, commas only as grouping).
pub fn parse_plain(value: &CellValue) -> Decimal {
    match value {
        CellValue::Number(n) => *n,
        CellValue::Text(s) => Amount::from_str(s).map(|a| a.value()).unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

/// Integers grouped by dots in threes: `1.500`, `-12.345.678`.
fn dotted_thousands() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^-?\d{1,3}(\.\d{3})+$").ok())
        .as_ref()
}

fn parse_localized(text: &str, dotted_grouping: bool) -> Option<Decimal> {
    let mut txt = text.to_uppercase();
    for token in CURRENCY_TOKENS {
        txt = txt.replace(token, "");
    }
    txt.retain(|c| !c.is_whitespace());

    let negative = txt.contains('(') && txt.contains(')');
    if negative {
        txt.retain(|c| c != '(' && c != ')');
    }

    let grouped = dotted_grouping && dotted_thousands().is_some_and(|re| re.is_match(&txt));
    let txt = if grouped || (txt.contains('.') && txt.contains(',')) {
        txt.replace('.', "").replace(',', ".")
    } else if txt.contains(',') {
        txt.replace(',', ".")
    } else {
        txt
    };

    let num = Decimal::from_str(&txt).ok()?;
    Some(if negative { -num } else { num })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_thousands_and_decimal_comma() {
        assert_eq!(parse_amount(&text("1.234,56")), dec("1234.56"));
        assert_eq!(parse_amount(&text("12.345.678,9")), dec("12345678.9"));
    }

    #[test]
    fn test_parse_lone_comma_is_decimal() {
        assert_eq!(parse_amount(&text("1234,56")), dec("1234.56"));
    }

    #[test]
    fn test_parse_dot_grouped_thousands() {
        assert_eq!(parse_amount(&text("1.500")), dec("1500"));
        assert_eq!(parse_amount(&text("12.345.678")), dec("12345678"));
        assert_eq!(parse_amount(&text("1.500 BS")), dec("1500"));
        assert_eq!(parse_amount(&text("(1.500) BS")), dec("-1500"));
    }

    #[test]
    fn test_parse_lone_dot_is_decimal() {
        assert_eq!(parse_amount(&text("1234.56")), dec("1234.56"));
        assert_eq!(parse_amount(&text("1.5")), dec("1.5"));
        assert_eq!(parse_amount(&text("1.5000")), dec("1.5"));
        // The reconciliation parser keeps a lone dot as the decimal mark.
        assert_eq!(parse_amount_ve(&text("1.500")), dec("1.5"));
    }

    #[test]
    fn test_parse_placeholders_are_zero() {
        assert_eq!(parse_amount(&text("-")), Decimal::ZERO);
        assert_eq!(parse_amount(&text("   ")), Decimal::ZERO);
        assert_eq!(parse_amount(&CellValue::Empty), Decimal::ZERO);
        assert_eq!(parse_amount(&text("n/a")), Decimal::ZERO);
        assert_eq!(parse_amount(&CellValue::Formula("=A1".into())), Decimal::ZERO);
    }

    #[test]
    fn test_parse_native_number_passes_through() {
        assert_eq!(parse_amount(&CellValue::Number(dec("-42.5"))), dec("-42.5"));
        assert_eq!(parse_amount_ve(&CellValue::Number(dec("7"))), dec("7"));
    }

    #[test]
    fn test_parse_ve_parentheses_and_currency() {
        assert_eq!(parse_amount_ve(&text("(1.234,56) BS")), dec("-1234.56"));
        assert_eq!(parse_amount_ve(&text("Bs 43.000.000,00")), dec("43000000"));
        assert_eq!(parse_amount_ve(&text("1.500,25 usd")), dec("1500.25"));
        assert_eq!(parse_amount_ve(&text("-")), Decimal::ZERO);
        assert_eq!(parse_amount_ve(&CellValue::Empty), Decimal::ZERO);
    }

    #[test]
    fn test_ledger_parser_shares_currency_rules() {
        assert_eq!(parse_amount(&text("(2.000,00) BS")), dec("-2000"));
    }

    #[test]
    fn test_parse_plain() {
        assert_eq!(parse_plain(&text("1,000.50")), dec("1000.50"));
        assert_eq!(parse_plain(&text("abc")), Decimal::ZERO);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Amount::from_str("$1,000.00").unwrap().value(), dec("1000"));
        assert_eq!(Amount::from_str("-$50.00").unwrap().value(), dec("-50"));
        assert_eq!(Amount::from_str("").unwrap().value(), Decimal::ZERO);
        assert!(Amount::from_str("x").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Amount::new(dec("-60000000")).to_string(), "-60,000,000.00");
        assert_eq!(Amount::new(dec("43000000")).to_string(), "43,000,000.00");
        assert_eq!(Amount::ZERO.to_string(), "0.00");
    }

    #[test]
    fn test_serde() {
        let json = serde_json::to_string(&Amount::new(dec("1234.5"))).unwrap();
        assert_eq!(json, "\"1,234.50\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value(), dec("1234.50"));
    }
}
