//! Classification rules read from the lookup-table document.
//!
//! A rule is a (pattern, category) pair. A label matches a rule when the normalized label
//! contains the normalized pattern. Rule sets are sorted longest pattern first, so the first
//! match is also the most specific one. Matching is a linear scan, O(rows x rules), which is
//! fine at spreadsheet scale.

use crate::text::normalize;
use crate::workbook::{resolve_sheet, Sheet, Workbook, WorkbookStore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Sheet holding account rules; the first sheet is used when it is missing.
pub const ACCOUNT_SHEET: &str = "CATEGORIA";

/// Sheet holding area rules; there are no area rules when it is missing.
pub const AREA_SHEET: &str = "AREA";

/// Which of the two rule tables to read.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Account,
    Area,
}

serde_plain::derive_display_from_serialize!(RuleKind);
serde_plain::derive_fromstr_from_deserialize!(RuleKind);

/// One row of a rule table.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClassificationRule {
    pattern: String,
    category: String,
}

impl ClassificationRule {
    /// The pattern is normalized; the category keeps its original spelling, trimmed.
    pub fn new(pattern: &str, category: &str) -> Self {
        Self {
            pattern: normalize(pattern),
            category: category.trim().to_string(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

/// An immutable, longest-pattern-first list of rules.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RuleSet {
    rules: Vec<ClassificationRule>,
}

impl RuleSet {
    pub fn new(mut rules: Vec<ClassificationRule>) -> Self {
        rules.retain(|r| !r.pattern.is_empty() && !r.category.is_empty());
        // Stable, so equal-length patterns keep their table order.
        rules.sort_by(|a, b| b.pattern.chars().count().cmp(&a.pattern.chars().count()));
        Self { rules }
    }

    /// Reads rules from a lookup-table workbook: column A is the pattern, column B the
    /// category, starting at row 2. Rows missing either value are skipped.
    pub fn from_workbook(workbook: &dyn Workbook, kind: RuleKind) -> Self {
        let sheet = match kind {
            RuleKind::Account => resolve_sheet(workbook, ACCOUNT_SHEET)
                .and_then(|name| workbook.sheet(&name))
                .or_else(|| workbook.first_sheet()),
            RuleKind::Area => {
                resolve_sheet(workbook, AREA_SHEET).and_then(|name| workbook.sheet(&name))
            }
        };
        match sheet {
            Some(sheet) => Self::from_sheet(sheet),
            None => Self::default(),
        }
    }

    fn from_sheet(sheet: &dyn Sheet) -> Self {
        let rules = (2..=sheet.max_row())
            .filter_map(|row| {
                let key = sheet.get(row, 1);
                let value = sheet.get(row, 2);
                if key.is_blank() || value.is_blank() {
                    return None;
                }
                Some(ClassificationRule::new(&key.as_text(), &value.as_text()))
            })
            .collect();
        Self::new(rules)
    }

    /// The category of the first rule whose pattern is contained in `label`. `label` must
    /// already be normalized.
    pub fn classify(&self, label: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| label.contains(rule.pattern.as_str()))
            .map(|rule| rule.category.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassificationRule> {
        self.rules.iter()
    }
}

/// Loads one rule table from the document at `path`. Any failure to read the document yields
/// an empty set so that classification degrades to "no match".
pub async fn load_rules(store: &dyn WorkbookStore, path: &Path, kind: RuleKind) -> RuleSet {
    match store.open(path).await {
        Ok(workbook) => {
            let rules = RuleSet::from_workbook(&workbook, kind);
            debug!("Loaded {} {kind} rules from {}", rules.len(), path.display());
            rules
        }
        Err(e) => {
            debug!("No {kind} rules, unable to read {}: {e:#}", path.display());
            RuleSet::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::{MemorySheet, MemoryWorkbook};
    use crate::Result;

    fn rules(pairs: &[(&str, &str)]) -> RuleSet {
        RuleSet::new(
            pairs
                .iter()
                .map(|(p, c)| ClassificationRule::new(p, c))
                .collect(),
        )
    }

    #[test]
    fn test_longest_pattern_wins() {
        let set = rules(&[("BANCO", "X"), ("BANCO MERCANTIL", "Y")]);
        assert_eq!(set.classify("PAGO BANCO MERCANTIL SA"), Some("Y"));
        assert_eq!(set.classify("PAGO BANCO PROVINCIAL"), Some("X"));
        assert_eq!(set.classify("TRANSFERENCIA"), None);
    }

    #[test]
    fn test_patterns_are_normalized() {
        let set = rules(&[("  comisión ", " Gastos Bancarios ")]);
        let rule = set.iter().next().unwrap();
        assert_eq!(rule.pattern(), "COMISION");
        assert_eq!(rule.category(), "Gastos Bancarios");
        assert_eq!(set.classify("COMISION POR TRANSFERENCIA"), Some("Gastos Bancarios"));
    }

    #[test]
    fn test_equal_lengths_keep_table_order() {
        let set = rules(&[("AAAA", "first"), ("BBBB", "second")]);
        assert_eq!(set.classify("AAAA BBBB"), Some("first"));
    }

    #[test]
    fn test_from_workbook_account_prefers_categoria() {
        let wb = MemoryWorkbook::new()
            .with_sheet(MemorySheet::from_rows(
                "Otra",
                vec![vec!["PATRON", "CUENTA"], vec!["NOMINA", "WRONG"]],
            ))
            .with_sheet(MemorySheet::from_rows(
                "Categoría",
                vec![
                    vec!["PATRON", "CUENTA"],
                    vec!["NOMINA", "SUELDOS"],
                    vec!["", "SIN PATRON"],
                    vec!["SIN CUENTA", ""],
                    vec!["CANTV", "SERVICIOS"],
                ],
            ));
        let set = RuleSet::from_workbook(&wb, RuleKind::Account);
        assert_eq!(set.len(), 2);
        assert_eq!(set.classify("PAGO NOMINA"), Some("SUELDOS"));
    }

    #[test]
    fn test_from_workbook_account_falls_back_to_first_sheet() {
        let wb = MemoryWorkbook::new().with_sheet(MemorySheet::from_rows(
            "Hoja1",
            vec![vec!["PATRON", "CUENTA"], vec!["CANTV", "SERVICIOS"]],
        ));
        let set = RuleSet::from_workbook(&wb, RuleKind::Account);
        assert_eq!(set.classify("CANTV FACTURA"), Some("SERVICIOS"));
    }

    #[test]
    fn test_from_workbook_area_requires_sheet() {
        let wb = MemoryWorkbook::new().with_sheet(MemorySheet::from_rows(
            "Hoja1",
            vec![vec!["PATRON", "CUENTA"], vec!["CANTV", "SERVICIOS"]],
        ));
        assert!(RuleSet::from_workbook(&wb, RuleKind::Area).is_empty());

        let wb = wb.with_sheet(MemorySheet::from_rows(
            "area",
            vec![vec!["PATRON", "AREA"], vec!["CANTV", "OPERACIONES"]],
        ));
        let set = RuleSet::from_workbook(&wb, RuleKind::Area);
        assert_eq!(set.classify("CANTV"), Some("OPERACIONES"));
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl WorkbookStore for BrokenStore {
        async fn open(&self, path: &Path) -> Result<MemoryWorkbook> {
            anyhow::bail!("cannot open {}", path.display())
        }

        async fn save(&self, _: &MemoryWorkbook, _: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_load_rules_failure_is_empty() {
        let set = load_rules(&BrokenStore, Path::new("diccionario.xlsx"), RuleKind::Account).await;
        assert!(set.is_empty());
    }

    #[test]
    fn test_rule_kind_display() {
        assert_eq!(RuleKind::Account.to_string(), "account");
        assert_eq!("area".parse::<RuleKind>().unwrap(), RuleKind::Area);
    }
}
