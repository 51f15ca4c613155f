//! Types that represent the core data model: cell values and addresses, money amounts and the
//! classification rule tables.
mod amount;
mod cell;
mod row_col;
mod rules;

pub use amount::{parse_amount, parse_amount_ve, parse_plain, Amount, AmountError};
pub use cell::{Cell, CellValue, DATE_FORMAT, MONEY_FORMAT};
pub use row_col::{column_letter, RowCol};
pub use rules::{load_rules, ClassificationRule, RuleKind, RuleSet, ACCOUNT_SHEET, AREA_SHEET};

/// Spanish month names, indexed by `month0()`. The templates label months this way.
pub const MONTH_NAMES: [&str; 12] = [
    "ENERO",
    "FEBRERO",
    "MARZO",
    "ABRIL",
    "MAYO",
    "JUNIO",
    "JULIO",
    "AGOSTO",
    "SEPTIEMBRE",
    "OCTUBRE",
    "NOVIEMBRE",
    "DICIEMBRE",
];

/// The upper-case Spanish name of the month `date` falls in.
pub fn month_name(date: chrono::NaiveDate) -> &'static str {
    use chrono::Datelike;
    MONTH_NAMES[date.month0() as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_month_name() {
        let d = |m| NaiveDate::from_ymd_opt(2024, m, 1).unwrap();
        assert_eq!(month_name(d(1)), "ENERO");
        assert_eq!(month_name(d(3)), "MARZO");
        assert_eq!(month_name(d(12)), "DICIEMBRE");
    }
}
