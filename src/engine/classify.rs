//! Fills the account and area of ledger rows from the rule tables and converts their amounts
//! to the reference currency.

use crate::engine::{apply, ledger, FIRST_DATA_ROW, LEDGER_SHEET};
use crate::model::{parse_amount, Cell, CellValue, RowCol, RuleSet};
use crate::rates::{parse_cell_date, resolve_rate, RateTable};
use crate::text::normalize;
use crate::workbook::{locate_sheet, Workbook};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Built-in account fallbacks, tried in order when no rule matches.
const FALLBACK_ACCOUNTS: [(&str, &str); 2] =
    [("COMISION", "GASTOS BANCARIOS"), ("IVA", "IMPUESTOS")];

/// How many cells of each kind a classification pass filled.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClassifyCounts {
    pub classified: usize,
    pub area_classified: usize,
    pub converted: usize,
}

/// Runs the classification and conversion pass over the ledger sheet. Returns `None` when the
/// workbook has no ledger sheet, in which case nothing is touched.
///
/// Rows with an empty provider label are skipped entirely. For the rest, an empty account cell
/// is filled from `accounts` (then the built-in fallbacks), an empty area cell from `areas`,
/// and an empty converted-amount cell gets `amount / rate` when the row has a date, a non-zero
/// amount and a resolvable rate. Filled cells are never overwritten.
pub fn classify_ledger(
    workbook: &mut dyn Workbook,
    accounts: &RuleSet,
    areas: &RuleSet,
    rates: &RateTable,
) -> Option<ClassifyCounts> {
    let name = locate_sheet(workbook, LEDGER_SHEET)?;
    let sheet = workbook.sheet(&name)?;

    let mut counts = ClassifyCounts::default();
    let mut writes = Vec::new();
    for row in FIRST_DATA_ROW..=sheet.max_row() {
        let provider = normalize(&sheet.get(row, ledger::PROVIDER).as_text());
        if provider.is_empty() {
            continue;
        }

        if sheet.get(row, ledger::ACCOUNT).is_blank() {
            if let Some(account) = classify_account(accounts, &provider) {
                trace!("Row {row}: '{provider}' -> account '{account}'");
                writes.push((
                    RowCol::new(row, ledger::ACCOUNT),
                    Cell::new(CellValue::from(account)),
                ));
                counts.classified += 1;
            }
        }

        if sheet.get(row, ledger::AREA).is_blank() {
            if let Some(area) = areas.classify(&provider) {
                writes.push((
                    RowCol::new(row, ledger::AREA),
                    Cell::new(CellValue::from(area)),
                ));
                counts.area_classified += 1;
            }
        }

        if sheet.get(row, ledger::TARGET_AMOUNT).is_blank() {
            let date = sheet.get(row, ledger::DATE);
            let amount = sheet.get(row, ledger::SOURCE_AMOUNT);
            if let Some(converted) = convert(date, amount, rates) {
                writes.push((RowCol::new(row, ledger::TARGET_AMOUNT), Cell::money(converted)));
                counts.converted += 1;
            }
        }
    }

    debug!(
        "Classified {} accounts, {} areas and converted {} amounts in '{name}'",
        counts.classified, counts.area_classified, counts.converted
    );
    apply(workbook, &name, writes);
    Some(counts)
}

/// The account for a normalized provider label: the rule table first, then the fallbacks.
fn classify_account<'a>(accounts: &'a RuleSet, provider: &str) -> Option<&'a str> {
    accounts.classify(provider).or_else(|| {
        FALLBACK_ACCOUNTS
            .iter()
            .find(|(pattern, _)| provider.contains(pattern))
            .map(|(_, account)| *account)
    })
}

/// `amount / rate` for a dated row with a non-zero amount, or `None` when any piece is missing.
fn convert(date: &CellValue, amount: &CellValue, rates: &RateTable) -> Option<Decimal> {
    if date.is_blank() {
        return None;
    }
    let amount = parse_amount(amount);
    if amount.is_zero() {
        return None;
    }
    let rate = resolve_rate(parse_cell_date(date), rates);
    if rate.is_zero() {
        return None;
    }
    amount.checked_div(rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassificationRule, MONEY_FORMAT};
    use crate::workbook::{MemorySheet, MemoryWorkbook, Sheet};
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn rules(pairs: &[(&str, &str)]) -> RuleSet {
        RuleSet::new(pairs.iter().map(|(p, c)| ClassificationRule::new(p, c)).collect())
    }

    fn ledger_row(
        sheet: &mut MemorySheet,
        row: u32,
        day: Option<NaiveDate>,
        amount: &str,
        provider: &str,
    ) {
        if let Some(day) = day {
            sheet.put(row, ledger::DATE, day);
        }
        sheet.put(row, ledger::SOURCE_AMOUNT, amount);
        sheet.put(row, ledger::PROVIDER, provider);
    }

    fn book(sheet: MemorySheet) -> MemoryWorkbook {
        MemoryWorkbook::new().with_sheet(sheet)
    }

    fn rates() -> RateTable {
        [(date("2024-03-08"), dec("36.5"))].into_iter().collect()
    }

    #[test]
    fn test_classifies_and_converts() {
        let mut sheet = MemorySheet::new("DATA BS");
        ledger_row(&mut sheet, 4, Some(date("2024-03-10")), "3.650,00", "Pago Nómina Marzo");
        let mut wb = book(sheet);

        let counts = classify_ledger(
            &mut wb,
            &rules(&[("NOMINA", "SUELDOS")]),
            &rules(&[("NOMINA", "TALENTO HUMANO")]),
            &rates(),
        )
        .unwrap();

        assert_eq!(
            counts,
            ClassifyCounts {
                classified: 1,
                area_classified: 1,
                converted: 1
            }
        );
        let sheet = wb.sheet("DATA BS").unwrap();
        assert_eq!(sheet.get(4, ledger::ACCOUNT), &CellValue::from("SUELDOS"));
        assert_eq!(sheet.get(4, ledger::AREA), &CellValue::from("TALENTO HUMANO"));
        let converted = sheet.cell(RowCol::new(4, ledger::TARGET_AMOUNT)).unwrap();
        assert_eq!(converted.value(), &CellValue::Number(dec("100")));
        assert_eq!(converted.format(), Some(MONEY_FORMAT));
    }

    #[test]
    fn test_fallback_accounts() {
        let mut sheet = MemorySheet::new("DATA BS");
        ledger_row(&mut sheet, 4, None, "10", "COMISION POR TRANSFERENCIA");
        ledger_row(&mut sheet, 5, None, "10", "I.V.A. IVA RETENIDO");
        ledger_row(&mut sheet, 6, None, "10", "DEPOSITO");
        let mut wb = book(sheet);

        let counts =
            classify_ledger(&mut wb, &RuleSet::default(), &RuleSet::default(), &rates()).unwrap();

        assert_eq!(counts.classified, 2);
        assert_eq!(counts.converted, 0);
        let sheet = wb.sheet("DATA BS").unwrap();
        assert_eq!(sheet.get(4, ledger::ACCOUNT), &CellValue::from("GASTOS BANCARIOS"));
        assert_eq!(sheet.get(5, ledger::ACCOUNT), &CellValue::from("IMPUESTOS"));
        assert!(sheet.get(6, ledger::ACCOUNT).is_blank());
    }

    #[test]
    fn test_rule_beats_fallback() {
        let mut sheet = MemorySheet::new("DATA BS");
        ledger_row(&mut sheet, 4, None, "10", "COMISION MANTENIMIENTO");
        let mut wb = book(sheet);
        classify_ledger(
            &mut wb,
            &rules(&[("MANTENIMIENTO", "SERVICIOS")]),
            &RuleSet::default(),
            &rates(),
        );
        let sheet = wb.sheet("DATA BS").unwrap();
        assert_eq!(sheet.get(4, ledger::ACCOUNT), &CellValue::from("SERVICIOS"));
    }

    #[test]
    fn test_filled_cells_are_kept() {
        let mut sheet = MemorySheet::new("DATA BS");
        ledger_row(&mut sheet, 4, Some(date("2024-03-08")), "3650", "PAGO NOMINA");
        sheet.put(4, ledger::ACCOUNT, "MANUAL");
        sheet.put(4, ledger::AREA, "MANUAL");
        sheet.put(4, ledger::TARGET_AMOUNT, dec("1"));
        let mut wb = book(sheet);

        let counts = classify_ledger(
            &mut wb,
            &rules(&[("NOMINA", "SUELDOS")]),
            &rules(&[("NOMINA", "RRHH")]),
            &rates(),
        )
        .unwrap();

        assert_eq!(counts, ClassifyCounts::default());
        let sheet = wb.sheet("DATA BS").unwrap();
        assert_eq!(sheet.get(4, ledger::ACCOUNT), &CellValue::from("MANUAL"));
        assert_eq!(sheet.get(4, ledger::TARGET_AMOUNT), &CellValue::Number(dec("1")));
    }

    #[test]
    fn test_rows_without_provider_are_skipped() {
        let mut sheet = MemorySheet::new("DATA BS");
        ledger_row(&mut sheet, 4, Some(date("2024-03-08")), "3650", "   ");
        let mut wb = book(sheet);
        let counts =
            classify_ledger(&mut wb, &rules(&[("X", "Y")]), &RuleSet::default(), &rates()).unwrap();
        assert_eq!(counts, ClassifyCounts::default());
        assert!(wb.sheet("DATA BS").unwrap().get(4, ledger::TARGET_AMOUNT).is_blank());
    }

    #[test]
    fn test_no_conversion_without_rate_or_amount() {
        let mut sheet = MemorySheet::new("DATA BS");
        // Six days after the only known rate.
        ledger_row(&mut sheet, 4, Some(date("2024-03-14")), "3650", "PAGO");
        ledger_row(&mut sheet, 5, Some(date("2024-03-08")), "-", "PAGO");
        ledger_row(&mut sheet, 6, Some(date("2024-03-08")), "abc", "PAGO");
        let mut wb = book(sheet);
        let counts =
            classify_ledger(&mut wb, &RuleSet::default(), &RuleSet::default(), &rates()).unwrap();
        assert_eq!(counts.converted, 0);
    }

    #[test]
    fn test_text_dates_convert() {
        let mut sheet = MemorySheet::new("DATA BS");
        sheet.put(4, ledger::DATE, "09/03/2024");
        sheet.put(4, ledger::SOURCE_AMOUNT, dec("73"));
        sheet.put(4, ledger::PROVIDER, "PAGO");
        let mut wb = book(sheet);
        classify_ledger(&mut wb, &RuleSet::default(), &RuleSet::default(), &rates());
        assert_eq!(
            wb.sheet("DATA BS").unwrap().get(4, ledger::TARGET_AMOUNT),
            &CellValue::Number(dec("2"))
        );
    }

    #[test]
    fn test_second_run_changes_nothing() {
        let mut sheet = MemorySheet::new("DATA BS");
        ledger_row(&mut sheet, 4, Some(date("2024-03-08")), "3650", "PAGO NOMINA");
        let mut wb = book(sheet);
        let accounts = rules(&[("NOMINA", "SUELDOS")]);
        classify_ledger(&mut wb, &accounts, &RuleSet::default(), &rates());
        let after_first = wb.clone();
        let counts = classify_ledger(&mut wb, &accounts, &RuleSet::default(), &rates()).unwrap();
        assert_eq!(counts, ClassifyCounts::default());
        assert_eq!(wb, after_first);
    }

    #[test]
    fn test_missing_ledger() {
        let mut wb = book(MemorySheet::new("OTRA"));
        let counts = classify_ledger(&mut wb, &RuleSet::default(), &RuleSet::default(), &rates());
        assert!(counts.is_none());
    }
}
