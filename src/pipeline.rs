//! The ordered run over one workbook: rules and rates, open, cover stamp, classification,
//! reconciliation, weekly rollup, backup, save.

use crate::backup::Backup;
use crate::commands::Out;
use crate::engine::{
    append_rate_log, classify_ledger, reconcile_set_asides, stamp_cover, weekly_rollup,
};
use crate::error::is_locked;
use crate::model::{load_rules, Amount, RuleKind};
use crate::rates::{RateProvider, RateTable};
use crate::report::Reporter;
use crate::workbook::WorkbookStore;
use crate::Result;
use anyhow::Context;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Progress reported after each stage.
const RULES_LOADED: f32 = 0.1;
const WORKBOOK_OPENED: f32 = 0.3;
const CLASSIFIED: f32 = 0.6;
const RECONCILED: f32 = 0.8;
const ROLLED_UP: f32 = 0.9;
const SAVED: f32 = 1.0;

/// What a successful run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Today's official rate, when it could be fetched.
    pub current_rate: Option<Amount>,
    /// A row was appended to the rate log.
    pub rate_logged: bool,
    /// The workbook had a ledger sheet; the three counts below are zero when it did not.
    pub ledger_found: bool,
    pub classified: usize,
    pub area_classified: usize,
    pub converted: usize,
    pub reconciled: usize,
    pub rollup_cells: usize,
    /// Where the original workbook was copied before it was overwritten.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

impl RunSummary {
    /// The human-readable status lines shown to the user at the end of a run.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.rate_logged {
            lines.push("Tasa histórica agregada".to_string());
        }
        if self.ledger_found {
            lines.push(format!(
                "Clasificados: {} cuentas, {} áreas",
                self.classified, self.area_classified
            ));
            lines.push(format!("Conversiones a USD: {}", self.converted));
        } else {
            lines.push("Sin hoja DATA BS: clasificación omitida".to_string());
        }
        if self.reconciled > 0 {
            lines.push(format!("Conciliación compleja: {} apartados", self.reconciled));
        }
        if self.rollup_cells > 0 {
            lines.push(format!(
                "Resumen semanal actualizado: {} celdas",
                self.rollup_cells
            ));
        } else {
            lines.push("Resumen semanal: sin cambios nuevos".to_string());
        }
        lines
    }
}

/// The result of a run as seen by the host.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Out<RunSummary>),
    /// The workbook is open in another program.
    Locked(String),
    /// Anything else that stopped the run.
    Failed(String),
}

impl Outcome {
    pub fn success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Outcome::Success(out) => out.message(),
            Outcome::Locked(message) | Outcome::Failed(message) => message,
        }
    }

    /// Converts a failed outcome into an error carrying its message.
    pub fn into_result(self) -> Result<Out<RunSummary>> {
        match self {
            Outcome::Success(out) => Ok(out),
            Outcome::Locked(message) | Outcome::Failed(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

/// Runs the full reconciliation over one workbook. Each collaborator is injected so the run can
/// be driven by the CLI, a desktop shell, or tests.
pub struct Pipeline<'a> {
    store: &'a dyn WorkbookStore,
    rates: &'a dyn RateProvider,
    reporter: &'a dyn Reporter,
    backup: Option<Backup>,
    today: NaiveDate,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a dyn WorkbookStore,
        rates: &'a dyn RateProvider,
        reporter: &'a dyn Reporter,
        today: NaiveDate,
    ) -> Self {
        Self {
            store,
            rates,
            reporter,
            backup: None,
            today,
        }
    }

    /// Copy the workbook with `backup` before it is overwritten. A failed copy fails the run.
    pub fn with_backup(mut self, backup: Backup) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Runs every stage against the workbook at `workbook`, reading rules from `dictionary`.
    /// Never returns an error: failures become `Outcome::Locked` or `Outcome::Failed`.
    pub async fn run(&self, workbook: &Path, dictionary: &Path) -> Outcome {
        match self.run_stages(workbook, dictionary).await {
            Ok(summary) => {
                let message = summary.lines().join("\n");
                Outcome::Success(Out::new(message, summary))
            }
            Err(e) if is_locked(&e) => {
                warn!("{e:#}");
                Outcome::Locked(format!(
                    "El archivo '{}' está abierto en otro programa. Ciérrelo e intente de nuevo.",
                    workbook.display()
                ))
            }
            Err(e) => {
                error!("{e:#}");
                Outcome::Failed(format!("Error técnico: {e:#}"))
            }
        }
    }

    async fn run_stages(&self, path: &Path, dictionary: &Path) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        self.reporter.log("Cargando reglas y tasas...");
        let accounts = load_rules(self.store, dictionary, RuleKind::Account).await;
        let areas = load_rules(self.store, dictionary, RuleKind::Area).await;
        self.reporter.log(&format!(
            "Reglas cargadas: {} de cuenta, {} de área",
            accounts.len(),
            areas.len()
        ));
        let mut history = self.historical_rates().await;
        let current = self.current_rate().await;
        if let Some(rate) = current {
            // The current rate stands in for today when the series has not caught up yet.
            if history.get(self.today).is_none() {
                history.insert(self.today, rate);
            }
        }
        summary.current_rate = current.map(Amount::new);
        self.reporter.progress(RULES_LOADED);

        self.reporter
            .log(&format!("Abriendo {}...", display_name(path)));
        let mut workbook = self
            .store
            .open(path)
            .await
            .with_context(|| format!("Unable to open the workbook '{}'", path.display()))?;
        self.reporter.progress(WORKBOOK_OPENED);

        if let Some(rate) = current {
            stamp_cover(&mut workbook, rate, self.today);
            summary.rate_logged = append_rate_log(&mut workbook, rate, self.today);
        }

        self.reporter.log("Clasificando movimientos...");
        match classify_ledger(&mut workbook, &accounts, &areas, &history) {
            Some(counts) => {
                summary.ledger_found = true;
                summary.classified = counts.classified;
                summary.area_classified = counts.area_classified;
                summary.converted = counts.converted;
            }
            None => self
                .reporter
                .log("Advertencia: no se encontró la hoja DATA BS"),
        }
        self.reporter.progress(CLASSIFIED);

        self.reporter.log("Conciliando apartados...");
        summary.reconciled = reconcile_set_asides(&mut workbook, self.reporter);
        self.reporter.progress(RECONCILED);

        self.reporter.log("Actualizando resumen semanal...");
        summary.rollup_cells = weekly_rollup(&mut workbook, self.reporter);
        self.reporter.progress(ROLLED_UP);

        if let Some(backup) = &self.backup {
            let copy = backup
                .copy_workbook(path, self.today)
                .await
                .context("Unable to back up the workbook before saving")?;
            summary.backup = Some(copy);
        }
        self.reporter.log("Guardando...");
        self.store
            .save(&workbook, path)
            .await
            .with_context(|| format!("Unable to save the workbook '{}'", path.display()))?;
        self.reporter.progress(SAVED);

        debug!("Run summary: {summary:?}");
        Ok(summary)
    }

    /// The historical series; empty (with a logged warning) when it cannot be fetched.
    async fn historical_rates(&self) -> RateTable {
        match self.rates.historical().await {
            Ok(table) => {
                self.reporter
                    .log(&format!("Tasas históricas: {} días", table.len()));
                table
            }
            Err(e) => {
                self.reporter.log(&format!(
                    "Advertencia: no se pudieron obtener las tasas históricas ({e:#})"
                ));
                RateTable::new()
            }
        }
    }

    /// Today's rate; `None` (currency updates skipped) when it is missing or not positive.
    async fn current_rate(&self) -> Option<Decimal> {
        match self.rates.current().await {
            Ok(rate) if rate > Decimal::ZERO => {
                self.reporter
                    .log(&format!("Tasa oficial de hoy: {}", Amount::new(rate)));
                Some(rate)
            }
            Ok(rate) => {
                self.reporter
                    .log(&format!("Advertencia: tasa oficial inválida ({rate})"));
                None
            }
            Err(e) => {
                self.reporter.log(&format!(
                    "Advertencia: no se pudo obtener la tasa oficial ({e:#})"
                ));
                None
            }
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellValue, RowCol, MONEY_FORMAT};
    use crate::test::{
        dictionary, march, template_workbook, FixedRates, MemoryStore, RecordingReporter,
    };
    use crate::workbook::{Sheet, Workbook};
    use std::str::FromStr;

    const BOOK: &str = "/books/cuadre.xlsx";
    const DICTIONARY: &str = "/books/diccionario.xlsx";

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::default();
        store.insert(BOOK, template_workbook());
        store.insert(DICTIONARY, dictionary());
        store
    }

    #[tokio::test]
    async fn test_full_run() {
        let store = store();
        let rates = FixedRates::new(&[(march(1), "36.5")], Some("40"));
        let reporter = RecordingReporter::default();
        let pipeline = Pipeline::new(&store, &rates, &reporter, march(8));

        let outcome = pipeline.run(Path::new(BOOK), Path::new(DICTIONARY)).await;

        assert!(outcome.success(), "{}", outcome.message());
        let Outcome::Success(out) = outcome else {
            unreachable!()
        };
        let summary = out.structure().unwrap();
        assert_eq!(summary.current_rate, Some(Amount::new(dec("40"))));
        assert!(summary.rate_logged);
        assert!(summary.ledger_found);
        assert_eq!(summary.classified, 3);
        assert_eq!(summary.area_classified, 1);
        assert_eq!(summary.converted, 5);
        assert_eq!(summary.reconciled, 1);
        assert_eq!(summary.rollup_cells, 1);
        assert!(out.message().starts_with("Tasa histórica agregada"));
        assert_eq!(reporter.progress(), vec![0.1, 0.3, 0.6, 0.8, 0.9, 1.0]);

        let saved = store.get(BOOK).unwrap();
        let ledger = saved.sheet("DATA BS").unwrap();
        assert_eq!(ledger.get(4, 13), &CellValue::from("SUELDOS"));
        assert_eq!(ledger.get(4, 15), &CellValue::from("TALENTO HUMANO"));
        assert_eq!(ledger.get(4, 8), &CellValue::Number(dec("100")));
        assert_eq!(ledger.get(8, 13), &CellValue::from("GASTOS BANCARIOS"));
        // Converted with today's rate, which only the current-rate endpoint knew.
        assert_eq!(ledger.get(8, 8), &CellValue::Number(dec("0.25")));

        let set_asides = saved.sheet("APARTADOS").unwrap();
        assert_eq!(set_asides.get(4, 3), &CellValue::Number(dec("-60000000")));

        let summary_sheet = saved.sheet("RESUMEN DISPONIBILIDAD MARZO").unwrap();
        let cell = summary_sheet.cell(RowCol::new(7, 4)).unwrap();
        assert_eq!(cell.value(), &CellValue::Formula("=C7-200".into()));
        assert_eq!(cell.format(), Some(MONEY_FORMAT));

        let cover = saved.sheet("CUENTAS POR COBRAR").unwrap();
        assert_eq!(cover.get(3, 4), &CellValue::from("08/03/2024"));
        assert_eq!(cover.get(4, 4), &CellValue::Number(dec("40")));

        let log = saved.sheet("COMPORTAMIENTO TASA").unwrap();
        assert_eq!(log.get(3, 1), &CellValue::from("08/03/2024"));
    }

    #[tokio::test]
    async fn test_second_run_is_quiet() {
        let store = store();
        let rates = FixedRates::new(&[(march(1), "36.5")], Some("40"));
        let reporter = RecordingReporter::default();
        let pipeline = Pipeline::new(&store, &rates, &reporter, march(8));
        let book = Path::new(BOOK);
        let dict = Path::new(DICTIONARY);

        assert!(pipeline.run(book, dict).await.success());
        let first = store.get(BOOK).unwrap();
        let Outcome::Success(out) = pipeline.run(book, dict).await else {
            panic!("second run failed");
        };

        let summary = out.structure().unwrap();
        assert!(!summary.rate_logged);
        assert_eq!(summary.classified, 0);
        assert_eq!(summary.area_classified, 0);
        assert_eq!(summary.converted, 0);
        // Reconciliation and rollup rewrite the same values.
        assert_eq!(store.get(BOOK).unwrap(), first);
    }

    #[tokio::test]
    async fn test_without_rates() {
        let store = store();
        let rates = FixedRates::new(&[], None);
        let reporter = RecordingReporter::default();
        let pipeline = Pipeline::new(&store, &rates, &reporter, march(8));

        let outcome = pipeline.run(Path::new(BOOK), Path::new(DICTIONARY)).await;

        let out = outcome.into_result().unwrap();
        let summary = out.structure().unwrap();
        assert_eq!(summary.current_rate, None);
        assert!(!summary.rate_logged);
        assert_eq!(summary.converted, 0);
        assert_eq!(summary.classified, 3);
        assert!(reporter
            .lines()
            .iter()
            .any(|l| l.contains("no se pudo obtener la tasa oficial")));
        let saved = store.get(BOOK).unwrap();
        assert!(saved.sheet("CUENTAS POR COBRAR").unwrap().get(3, 4).is_blank());
    }

    #[tokio::test]
    async fn test_missing_ledger_still_succeeds() {
        let store = MemoryStore::default();
        let mut book = crate::workbook::MemoryWorkbook::new();
        for sheet in template_workbook().sheets() {
            if sheet.title() != "DATA BS" {
                book.add_sheet(sheet.clone());
            }
        }
        store.insert(BOOK, book);
        let rates = FixedRates::new(&[], None);
        let reporter = RecordingReporter::default();
        let pipeline = Pipeline::new(&store, &rates, &reporter, march(8));

        let outcome = pipeline.run(Path::new(BOOK), Path::new(DICTIONARY)).await;

        assert!(outcome.success(), "{}", outcome.message());
        let out = outcome.into_result().unwrap();
        let summary = out.structure().unwrap();
        assert!(!summary.ledger_found);
        assert_eq!(summary.reconciled, 0);
        assert_eq!(summary.rollup_cells, 0);
        let warnings = reporter
            .lines()
            .into_iter()
            .filter(|l| l.starts_with("Advertencia"))
            .count();
        // Classification, reconciliation, rollup and the missing current rate.
        assert_eq!(warnings, 4);
    }

    #[tokio::test]
    async fn test_locked_workbook() {
        let store = store().locked();
        let rates = FixedRates::new(&[], None);
        let reporter = RecordingReporter::default();
        let pipeline = Pipeline::new(&store, &rates, &reporter, march(8));

        let outcome = pipeline.run(Path::new(BOOK), Path::new(DICTIONARY)).await;

        assert!(matches!(outcome, Outcome::Locked(_)));
        assert!(!outcome.success());
        assert!(outcome.message().contains("cuadre.xlsx"));
    }

    #[tokio::test]
    async fn test_missing_workbook_is_a_failure() {
        let store = MemoryStore::default();
        let rates = FixedRates::new(&[], None);
        let reporter = RecordingReporter::default();
        let pipeline = Pipeline::new(&store, &rates, &reporter, march(8));

        let outcome = pipeline.run(Path::new(BOOK), Path::new(DICTIONARY)).await;

        assert!(matches!(outcome, Outcome::Failed(_)));
        assert!(outcome.message().starts_with("Error técnico"));
        assert!(outcome.into_result().is_err());
    }

    #[test]
    fn test_summary_lines() {
        let summary = RunSummary {
            ledger_found: true,
            classified: 2,
            area_classified: 1,
            converted: 4,
            reconciled: 1,
            ..RunSummary::default()
        };
        assert_eq!(
            summary.lines(),
            vec![
                "Clasificados: 2 cuentas, 1 áreas".to_string(),
                "Conversiones a USD: 4".to_string(),
                "Conciliación compleja: 1 apartados".to_string(),
                "Resumen semanal: sin cambios nuevos".to_string(),
            ]
        );
    }
}
