//! Stamps the day's rate on the cover sheet and keeps the daily rate log.

use crate::engine::{COVER_SHEET, RATE_LOG_SHEET};
use crate::model::{Cell, CellValue, RowCol};
use crate::workbook::{resolve_sheet, Sheet, Workbook};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

const COVER_DATE: RowCol = RowCol::new(3, 4);
const COVER_RATE: RowCol = RowCol::new(4, 4);

/// Currency code written in the second column of the rate log.
const REFERENCE_CURRENCY: &str = "USD";

fn day_text(day: NaiveDate) -> String {
    day.format("%d/%m/%Y").to_string()
}

/// Writes `today` (as `dd/mm/yyyy` text) and `rate` into the cover sheet. Returns `false` when
/// the workbook has no cover sheet.
pub fn stamp_cover(workbook: &mut dyn Workbook, rate: Decimal, today: NaiveDate) -> bool {
    let Some(name) = resolve_sheet(workbook, COVER_SHEET) else {
        debug!("No '{COVER_SHEET}' sheet to stamp");
        return false;
    };
    let Some(sheet) = workbook.sheet_mut(&name) else {
        return false;
    };
    sheet.set_cell(COVER_DATE, Cell::new(day_text(today)));
    sheet.set_cell(COVER_RATE, Cell::new(rate));
    true
}

/// Appends `(today, "USD", rate)` below the last row of the rate log unless that row is already
/// today's. Returns whether a row was appended.
pub fn append_rate_log(workbook: &mut dyn Workbook, rate: Decimal, today: NaiveDate) -> bool {
    let Some(name) = resolve_sheet(workbook, RATE_LOG_SHEET) else {
        debug!("No '{RATE_LOG_SHEET}' sheet to append to");
        return false;
    };
    let Some(sheet) = workbook.sheet_mut(&name) else {
        return false;
    };

    let today_text = day_text(today);
    let last_row = sheet.max_row();
    let logged = match sheet.get(last_row, 1) {
        CellValue::Date(d) => *d == today,
        other => other.as_text().trim() == today_text,
    };
    if logged {
        debug!("Rate for {today_text} already logged on row {last_row}");
        return false;
    }

    let row = last_row + 1;
    sheet.set_cell(RowCol::new(row, 1), Cell::new(today_text));
    sheet.set_cell(RowCol::new(row, 2), Cell::new(REFERENCE_CURRENCY));
    sheet.set_cell(RowCol::new(row, 3), Cell::new(rate));
    true
}
