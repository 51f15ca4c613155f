use chrono::NaiveDate;
use rust_decimal::Decimal;

/// The display format applied to every monetary cell this system writes.
pub const MONEY_FORMAT: &str = "#,##0.00";

/// The display format used when a native date is persisted.
pub const DATE_FORMAT: &str = "dd/mm/yyyy";

/// The value held by a cell. Formulas are stored as text starting with `=` and are never
/// evaluated here; the spreadsheet application evaluates them when the workbook is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(Decimal),
    Date(NaiveDate),
    Formula(String),
}

impl CellValue {
    /// True for `Empty` and for text that is only whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Spreadsheet "truthiness": blank cells and a numeric zero are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            CellValue::Number(n) => !n.is_zero(),
            other => !other.is_blank(),
        }
    }

    /// Renders any value as text; `Empty` is the empty string.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) | CellValue::Formula(s) => s.clone(),
            CellValue::Number(n) => n.normalize().to_string(),
            CellValue::Date(d) => d.format("%d/%m/%Y").to_string(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<Decimal> for CellValue {
    fn from(value: Decimal) -> Self {
        CellValue::Number(value)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(value: NaiveDate) -> Self {
        CellValue::Date(value)
    }
}

/// A cell: a value plus an optional number-format tag such as `#,##0.00`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    pub(crate) value: CellValue,
    pub(crate) format: Option<String>,
}

impl Cell {
    pub fn new(value: impl Into<CellValue>) -> Self {
        Self {
            value: value.into(),
            format: None,
        }
    }

    pub fn with_format(value: impl Into<CellValue>, format: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            format: Some(format.into()),
        }
    }

    /// A number shown with the two-decimal money format.
    pub fn money(value: Decimal) -> Self {
        Self::with_format(value, MONEY_FORMAT)
    }

    /// A formula shown with the two-decimal money format.
    pub fn money_formula(formula: impl Into<String>) -> Self {
        Self::with_format(CellValue::Formula(formula.into()), MONEY_FORMAT)
    }

    pub fn value(&self) -> &CellValue {
        &self.value
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_blank_and_truthy() {
        assert!(CellValue::Empty.is_blank());
        assert!(CellValue::from("  ").is_blank());
        assert!(!CellValue::from("x").is_blank());
        assert!(!CellValue::Number(Decimal::ZERO).is_blank());
        assert!(!CellValue::Number(Decimal::ZERO).is_truthy());
        assert!(CellValue::Number(Decimal::ONE).is_truthy());
        assert!(CellValue::Formula("=A1".into()).is_truthy());
    }

    #[test]
    fn test_as_text() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
        assert_eq!(CellValue::Date(d).as_text(), "08/03/2024");
        assert_eq!(
            CellValue::Number(Decimal::from_str("36.500").unwrap()).as_text(),
            "36.5"
        );
        assert_eq!(CellValue::Empty.as_text(), "");
    }

    #[test]
    fn test_money_cell() {
        let cell = Cell::money(Decimal::ONE);
        assert_eq!(cell.format(), Some(MONEY_FORMAT));
        assert_eq!(cell.value(), &CellValue::Number(Decimal::ONE));
    }
}
