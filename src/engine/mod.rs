//! The passes that mutate an open workbook. Each pass is synchronous, touches only the sheets
//! it names, and is idempotent: cells it fills are skipped on the next run.
//!
//! Column numbers below are the bank-reconciliation template's layout and are 1-indexed.

mod classify;
mod cover;
mod reconcile;
mod rollup;

pub use classify::{classify_ledger, ClassifyCounts};
pub use cover::{append_rate_log, stamp_cover};
pub use reconcile::reconcile_set_asides;
pub use rollup::{weekly_rollup, WeekBucket};

use crate::model::Cell;
use crate::model::RowCol;
use crate::workbook::{Sheet, Workbook};

/// The primary ledger of bank movements.
pub const LEDGER_SHEET: &str = "DATA BS";
/// Set-aside funds awaiting reconciliation.
pub const SET_ASIDE_SHEET: &str = "APARTADOS";
/// Surplus-handling records that offset the set-asides.
pub const SURPLUS_SHEET: &str = "MANEJO EXCEDENTE";
/// Cover sheet stamped with the run date and rate.
pub const COVER_SHEET: &str = "CUENTAS POR COBRAR";
/// Append-only log of daily rates.
pub const RATE_LOG_SHEET: &str = "COMPORTAMIENTO TASA";
/// Weekly availability summary.
pub const SUMMARY_SHEET: &str = "RESUMEN DISPONIBILIDAD";

/// First data row in every template sheet; rows above it are headers.
pub const FIRST_DATA_ROW: u32 = 4;

pub(crate) mod ledger {
    pub const DATE: u32 = 2;
    pub const SOURCE_AMOUNT: u32 = 7;
    pub const TARGET_AMOUNT: u32 = 8;
    pub const BANK: u32 = 10;
    pub const PROVIDER: u32 = 12;
    pub const ACCOUNT: u32 = 13;
    pub const AREA: u32 = 15;
}

/// Writes `writes` into the sheet named exactly `sheet`. Passes collect their writes while
/// reading and apply them afterwards so that no sheet is borrowed twice.
fn apply(workbook: &mut dyn Workbook, sheet: &str, writes: Vec<(RowCol, Cell)>) {
    if let Some(target) = workbook.sheet_mut(sheet) {
        for (at, cell) in writes {
            target.set_cell(at, cell);
        }
    }
}
