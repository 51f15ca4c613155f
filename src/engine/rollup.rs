//! Rolls ledger amounts up into the weekly availability summary.
//!
//! The summary sheet has a header row with one "SEMANA DEL <a> AL <b>" block per week. Under
//! each block a sub-label row names an estimate column and an actual column. For every income
//! account listed in column B, the actual column receives `=<estimate cell>-<real amount>`.

use crate::engine::{apply, ledger, FIRST_DATA_ROW, LEDGER_SHEET, SUMMARY_SHEET};
use crate::model::{parse_plain, Cell, CellValue, RowCol};
use crate::report::Reporter;
use crate::text::{normalize, overlaps};
use crate::workbook::{find_sheet_containing, Sheet, Workbook};
use chrono::Datelike;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, trace};

/// Only these summary rows receive formulas.
const INCOME_ACCOUNTS: [&str; 3] = ["CONTINUIDAD OPERATIVA", "SIMCARD", "ALIADOS COMERCIALES"];

/// The header row is searched for in this window.
const HEADER_ROWS: u32 = 14;
const HEADER_COLUMNS: u32 = 19;

/// Week blocks start at this column; column B holds the account labels.
const FIRST_WEEK_COLUMN: u32 = 3;
const LABEL_COLUMN: u32 = 2;

fn day_range() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(\d+)\s+AL\s+(\d+)").ok())
        .as_ref()
}

/// One week of the summary: the days of the month it covers and the two columns it owns.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct WeekBucket {
    pub first_day: u32,
    pub last_day: u32,
    pub estimate_column: u32,
    pub actual_column: u32,
}

impl WeekBucket {
    pub fn contains(&self, day: u32) -> bool {
        (self.first_day..=self.last_day).contains(&day)
    }
}

/// Writes the actual-column formulas of the weekly summary. Returns the number of cells
/// written; 0 when a sheet or the header row is missing.
pub fn weekly_rollup(workbook: &mut dyn Workbook, reporter: &dyn Reporter) -> usize {
    let (Some(summary_name), Some(ledger_name)) = (
        find_sheet_containing(workbook, SUMMARY_SHEET),
        find_sheet_containing(workbook, LEDGER_SHEET),
    ) else {
        reporter.log(&format!(
            "Advertencia: faltan hojas para el resumen semanal ({SUMMARY_SHEET}, {LEDGER_SHEET})"
        ));
        return 0;
    };
    let (Some(summary), Some(ledger_sheet)) =
        (workbook.sheet(&summary_name), workbook.sheet(&ledger_name))
    else {
        return 0;
    };

    let Some(header_row) = find_header_row(summary) else {
        reporter.log(&format!(
            "Advertencia: no se encontró la fila 'SEMANA DEL' en '{summary_name}'"
        ));
        return 0;
    };
    let buckets = parse_buckets(summary, header_row);
    debug!("Found {} week buckets on row {header_row}", buckets.len());
    if buckets.is_empty() {
        return 0;
    }

    let totals = aggregate(ledger_sheet, &buckets);
    let writes = formulas(summary, header_row, &buckets, &totals);
    let count = writes.len();
    debug!("Writing {count} weekly summary cells in '{summary_name}'");
    apply(workbook, &summary_name, writes);
    count
}

/// The first row in the header window holding a "SEMANA ... DEL" cell.
fn find_header_row(sheet: &dyn Sheet) -> Option<u32> {
    (1..=HEADER_ROWS).find(|&row| {
        (1..=HEADER_COLUMNS).any(|col| {
            let text = normalize(&sheet.get(row, col).as_text());
            text.contains("SEMANA") && text.contains("DEL")
        })
    })
}

/// Reads the week blocks of the header row. Columns already claimed by an earlier bucket are
/// not reused, so buckets never share a column.
fn parse_buckets(sheet: &dyn Sheet, header_row: u32) -> Vec<WeekBucket> {
    let Some(pattern) = day_range() else {
        return Vec::new();
    };
    let mut buckets: Vec<WeekBucket> = Vec::new();
    for col in FIRST_WEEK_COLUMN..=sheet.max_column() {
        let text = normalize(&sheet.get(header_row, col).as_text());
        let Some(caps) = pattern.captures(&text) else {
            continue;
        };
        let (Ok(first_day), Ok(last_day)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>())
        else {
            continue;
        };

        let sub_label = normalize(&sheet.get(header_row + 1, col).as_text());
        let (estimate_column, actual_column) = if sub_label.contains("ACTUALIZACION") {
            (col - 1, col)
        } else if sub_label.contains("ESTIMADO") {
            (col, col + 1)
        } else {
            trace!("Column {col}: '{text}' has no ESTIMADO/ACTUALIZACION sub-label");
            continue;
        };

        let claimed = buckets.iter().any(|b| {
            [b.estimate_column, b.actual_column]
                .iter()
                .any(|c| *c == estimate_column || *c == actual_column)
        });
        if claimed {
            continue;
        }
        buckets.push(WeekBucket {
            first_day,
            last_day,
            estimate_column,
            actual_column,
        });
    }
    buckets
}

/// Sums ledger amounts per bucket and account. Each row lands in the first bucket covering
/// its day; rows with no day, no account or a zero amount are skipped.
fn aggregate(sheet: &dyn Sheet, buckets: &[WeekBucket]) -> Vec<BTreeMap<String, Decimal>> {
    let mut totals = vec![BTreeMap::new(); buckets.len()];
    for row in FIRST_DATA_ROW..=sheet.max_row() {
        let Some(day) = day_of_month(sheet.get(row, ledger::DATE)) else {
            continue;
        };
        let account = normalize(&sheet.get(row, ledger::ACCOUNT).as_text());
        if account.is_empty() {
            continue;
        }
        let amount = parse_plain(sheet.get(row, ledger::TARGET_AMOUNT));
        if amount.is_zero() {
            continue;
        }
        if let Some(i) = buckets.iter().position(|b| b.contains(day)) {
            *totals[i].entry(account).or_insert(Decimal::ZERO) += amount;
        }
    }
    totals
}

/// The day of month of a native date, or the leading two digits of text such as `05/03/2024`.
fn day_of_month(value: &CellValue) -> Option<u32> {
    match value {
        CellValue::Date(d) => Some(d.day()),
        CellValue::Text(s) => s.trim().get(..2).and_then(|d| d.parse().ok()),
        _ => None,
    }
}

/// One formula per (income row, bucket) that has an estimate or a real amount.
fn formulas(
    summary: &dyn Sheet,
    header_row: u32,
    buckets: &[WeekBucket],
    totals: &[BTreeMap<String, Decimal>],
) -> Vec<(RowCol, Cell)> {
    let mut writes = Vec::new();
    for row in header_row + 2..=summary.max_row() {
        let label = normalize(&summary.get(row, LABEL_COLUMN).as_text().replace('\u{a0}', ""));
        if !INCOME_ACCOUNTS.contains(&label.as_str()) {
            continue;
        }
        for (bucket, accounts) in buckets.iter().zip(totals) {
            let real: Decimal = accounts
                .iter()
                .filter(|(account, _)| overlaps(&label, account))
                .map(|(_, amount)| *amount)
                .sum();
            let estimate = RowCol::new(row, bucket.estimate_column);
            if !summary.value(estimate).is_truthy() && real.is_zero() {
                continue;
            }
            let formula = format!("={}-{}", estimate.to_a1(), real.normalize());
            trace!("{label} days {}-{}: {formula}", bucket.first_day, bucket.last_day);
            writes.push((
                RowCol::new(row, bucket.actual_column),
                Cell::money_formula(formula),
            ));
        }
    }
    writes
}
