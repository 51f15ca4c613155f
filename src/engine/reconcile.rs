//! Reconciles specialized-service set-asides against ledger egress and surplus ingress.

use crate::engine::{
    apply, ledger, FIRST_DATA_ROW, LEDGER_SHEET, SET_ASIDE_SHEET, SURPLUS_SHEET,
};
use crate::model::{month_name, parse_amount_ve, Amount, Cell, CellValue, RowCol};
use crate::rates::parse_cell_date;
use crate::report::Reporter;
use crate::text::{normalize, overlaps};
use crate::workbook::{locate_sheet, Sheet, Workbook};
use rust_decimal::Decimal;
use tracing::debug;

/// Concept, account and description marker scoping reconciliation to specialized services.
const SPECIALIZED: &str = "ESPECIALIZAD";

/// The surplus sheet is scanned to at least this row even when its extent is shorter.
const SURPLUS_MIN_ROWS: u32 = 500;

mod set_aside {
    pub const BANK: u32 = 2;
    pub const AMOUNT: u32 = 3;
    pub const CONCEPT: u32 = 4;
    pub const MONTH: u32 = 5;
}

mod surplus {
    pub const DESCRIPTION: u32 = 2;
    pub const MONTH: u32 = 3;
    pub const CAPTURED: u32 = 8;
}

/// Writes `-(egress) + ingress` into the amount cell of every specialized-service set-aside
/// row where either sum is positive. A row whose sums are only negative is left untouched.
/// Returns the number of rows written; 0 (with a logged warning) when any of the three sheets
/// is missing.
pub fn reconcile_set_asides(workbook: &mut dyn Workbook, reporter: &dyn Reporter) -> usize {
    let names = (
        locate_sheet(workbook, SET_ASIDE_SHEET),
        locate_sheet(workbook, LEDGER_SHEET),
        locate_sheet(workbook, SURPLUS_SHEET),
    );
    let (Some(set_asides), Some(ledger_name), Some(surplus_name)) = names else {
        reporter.log(&format!(
            "Advertencia: faltan hojas para la conciliación ({SET_ASIDE_SHEET}, {LEDGER_SHEET}, \
             {SURPLUS_SHEET})"
        ));
        return 0;
    };
    let (Some(targets), Some(ledger_sheet), Some(surplus_sheet)) = (
        workbook.sheet(&set_asides),
        workbook.sheet(&ledger_name),
        workbook.sheet(&surplus_name),
    ) else {
        return 0;
    };

    let mut writes = Vec::new();
    for row in FIRST_DATA_ROW..=targets.max_row() {
        let concept = normalize(&targets.get(row, set_aside::CONCEPT).as_text());
        if !concept.contains(SPECIALIZED) {
            continue;
        }
        let bank = normalize(&targets.get(row, set_aside::BANK).as_text());
        let month = month_label(targets.get(row, set_aside::MONTH));

        let egress = egress_sum(ledger_sheet, &bank, &month);
        let ingress = bank_tag(&bank)
            .map(|tag| ingress_sum(surplus_sheet, tag, &month))
            .unwrap_or(Decimal::ZERO);
        if egress <= Decimal::ZERO && ingress <= Decimal::ZERO {
            debug!("Skipping set-aside row {row}: egress {egress}, ingress {ingress}");
            continue;
        }

        let result = -egress + ingress;
        reporter.log(&format!(
            "Conciliación {bank} {month}: egreso {}, ingreso {}, resultado {}",
            Amount::new(egress),
            Amount::new(ingress),
            Amount::new(result)
        ));
        writes.push((RowCol::new(row, set_aside::AMOUNT), Cell::money(result)));
    }

    let count = writes.len();
    debug!("Reconciled {count} set-aside rows in '{set_asides}'");
    apply(workbook, &set_asides, writes);
    count
}

/// Specialized-service ledger amounts for `bank` in `month`.
fn egress_sum(sheet: &dyn Sheet, bank: &str, month: &str) -> Decimal {
    (FIRST_DATA_ROW..=sheet.max_row())
        .filter(|&row| {
            normalize(&sheet.get(row, ledger::ACCOUNT).as_text()).contains(SPECIALIZED)
                && overlaps(&normalize(&sheet.get(row, ledger::BANK).as_text()), bank)
                && parse_cell_date(sheet.get(row, ledger::DATE))
                    .is_some_and(|d| month_name(d) == month)
        })
        .map(|row| parse_amount_ve(sheet.get(row, ledger::SOURCE_AMOUNT)))
        .sum()
}

/// Captured surplus amounts tagged with `tag` for specialized services in `month`.
fn ingress_sum(sheet: &dyn Sheet, tag: &str, month: &str) -> Decimal {
    let last = sheet.max_row().max(SURPLUS_MIN_ROWS);
    (FIRST_DATA_ROW..=last)
        .filter(|&row| {
            let description = normalize(&sheet.get(row, surplus::DESCRIPTION).as_text());
            description.contains(tag)
                && description.contains(SPECIALIZED)
                && month_label(sheet.get(row, surplus::MONTH)) == month
        })
        .map(|row| parse_amount_ve(sheet.get(row, surplus::CAPTURED)))
        .sum()
}

/// The surplus sheet tags rows by bank initials; banks without a tag have no ingress.
fn bank_tag(bank: &str) -> Option<&'static str> {
    if bank.contains("PROVINCIAL") {
        Some("BP")
    } else if bank.contains("MERCANTIL") {
        Some("BM")
    } else {
        None
    }
}

/// A month column holds the Spanish month name; a native date stands for its month.
fn month_label(value: &CellValue) -> String {
    match value {
        CellValue::Date(d) => month_name(*d).to_string(),
        other => normalize(&other.as_text()),
    }
}
