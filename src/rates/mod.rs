//! Exchange rates: a date-keyed table, the backward-fallback resolver, and the `RateProvider`
//! seam behind which the network lives.

mod http;

pub use http::HttpRateProvider;

use crate::model::CellValue;
use crate::Result;
use chrono::{Datelike, Days, NaiveDate};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// How many days before a date the resolver will look when the date itself has no rate.
pub const LOOKBACK_DAYS: u64 = 5;

/// Text formats tried, in order, when a date cell holds text.
const DATE_FORMATS: [&str; 4] = ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%y", "%d-%m-%Y"];

/// Local currency units per reference currency unit, by calendar day. Rates are always
/// positive; a zero rate means "unresolved" and is never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateTable {
    rates: BTreeMap<NaiveDate, Decimal>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `rate` for `date`. Non-positive rates are ignored and `false` is returned.
    pub fn insert(&mut self, date: NaiveDate, rate: Decimal) -> bool {
        if rate <= Decimal::ZERO {
            return false;
        }
        self.rates.insert(date, rate);
        true
    }

    pub fn get(&self, date: NaiveDate) -> Option<Decimal> {
        self.rates.get(&date).copied()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// The rate for `date`, or for the closest of the `LOOKBACK_DAYS` days before it. Never
    /// looks forward. Returns zero when nothing is found in that window.
    pub fn resolve(&self, date: NaiveDate) -> Decimal {
        (0..=LOOKBACK_DAYS)
            .filter_map(|back| date.checked_sub_days(Days::new(back)))
            .find_map(|day| self.get(day))
            .unwrap_or(Decimal::ZERO)
    }
}

impl FromIterator<(NaiveDate, Decimal)> for RateTable {
    fn from_iter<T: IntoIterator<Item = (NaiveDate, Decimal)>>(iter: T) -> Self {
        let mut table = RateTable::new();
        for (date, rate) in iter {
            table.insert(date, rate);
        }
        table
    }
}

/// `RateTable::resolve` for an optional date; `None` resolves to zero.
pub fn resolve_rate(date: Option<NaiveDate>, table: &RateTable) -> Decimal {
    date.map(|d| table.resolve(d)).unwrap_or(Decimal::ZERO)
}

/// Reads a calendar date out of a cell: native dates directly, text through `DATE_FORMATS`
/// (first success wins). Anything else is `None`.
pub fn parse_cell_date(value: &CellValue) -> Option<NaiveDate> {
    match value {
        CellValue::Date(d) => Some(*d),
        CellValue::Text(s) => parse_date_text(s),
        _ => None,
    }
}

/// Parses `text` with the first matching format of `DATE_FORMATS`.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    // chrono's %Y accepts short years, so "08-03-24" would otherwise read as year 8.
    DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .find(|d| d.year() >= 1000)
}

/// Source of exchange rates. Implementations must never fail the run for network problems;
/// callers treat an `Err` from `current` as "no rate today" and an empty table as "no history".
#[async_trait::async_trait]
pub trait RateProvider: Send + Sync {
    /// The bulk historical series.
    async fn historical(&self) -> Result<RateTable>;

    /// Today's official rate.
    async fn current(&self) -> Result<Decimal>;
}

/// A provider for runs without network access: no history and no current rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRates;

#[async_trait::async_trait]
impl RateProvider for OfflineRates {
    async fn historical(&self) -> Result<RateTable> {
        Ok(RateTable::new())
    }

    async fn current(&self) -> Result<Decimal> {
        anyhow::bail!("Rates are not fetched in offline mode")
    }
}
