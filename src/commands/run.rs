use crate::args::RunArgs;
use crate::commands::Out;
use crate::pipeline::{Pipeline, RunSummary};
use crate::rates::{HttpRateProvider, OfflineRates, RateProvider};
use crate::report::TracingReporter;
use crate::workbook::XlsxStore;
use crate::{Config, Result};
use chrono::NaiveDate;
use tracing::debug;

/// Runs the pipeline over the workbook named in `args`, overwriting it in place.
///
/// The dictionary comes from `--dictionary` or else from `config.json`. The rate access key
/// comes from `--rate-key`/`CUADRE_RATE_KEY` or else from `config.json`.
pub async fn run(config: &Config, args: &RunArgs, today: NaiveDate) -> Result<Out<RunSummary>> {
    let dictionary = match args.dictionary() {
        Some(path) => path.to_path_buf(),
        None => config.dictionary_path(),
    };
    debug!(
        "Running over {} with dictionary {}",
        args.workbook().display(),
        dictionary.display()
    );

    let rates: Box<dyn RateProvider> = if args.offline() {
        Box::new(OfflineRates)
    } else {
        let key = args
            .rate_key()
            .or_else(|| config.rate_access_key())
            .map(str::to_string);
        Box::new(HttpRateProvider::new(
            config.historical_rates_url(),
            config.current_rate_url(),
            config.rate_key_header(),
            key,
            config.request_timeout(),
        )?)
    };

    let mut pipeline = Pipeline::new(&XlsxStore, &*rates, &TracingReporter, today);
    if !args.no_backup() {
        pipeline = pipeline.with_backup(config.backup());
    }
    pipeline
        .run(args.workbook(), &dictionary)
        .await
        .into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{dictionary, march, template_workbook, TestEnv};
    use crate::model::CellValue;
    use crate::workbook::{Sheet, Workbook, WorkbookStore};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_run_offline() {
        let env = TestEnv::new().await;
        let config = env.config();
        let book = env.work_dir().join("Conciliacion.xlsx");
        let rules = env.work_dir().join("reglas.xlsx");
        XlsxStore.save(&template_workbook(), &book).await.unwrap();
        XlsxStore.save(&dictionary(), &rules).await.unwrap();

        let args = RunArgs::new(&book)
            .with_dictionary(&rules)
            .with_offline(true);
        let out = run(&config, &args, march(8)).await.unwrap();

        let summary = out.structure().unwrap();
        assert!(summary.ledger_found);
        assert_eq!(summary.classified, 3);
        assert_eq!(summary.converted, 0);
        assert!(summary.current_rate.is_none());
        let backup = summary.backup.as_ref().unwrap();
        assert!(backup.is_file());
        assert!(backup.starts_with(config.backups()));

        let saved = XlsxStore.open(&book).await.unwrap();
        let ledger = saved.sheet("DATA BS").unwrap();
        assert_eq!(ledger.get(4, 12), &CellValue::from("Pago Nómina"));
        assert_eq!(ledger.get(4, 13), &CellValue::from("SUELDOS"));
        assert_eq!(ledger.get(8, 13), &CellValue::from("GASTOS BANCARIOS"));
        let set_asides = saved.sheet("APARTADOS").unwrap();
        assert_eq!(
            set_asides.get(4, 3),
            &CellValue::Number(Decimal::from(-60_000_000))
        );
    }

    #[tokio::test]
    async fn test_run_without_backup() {
        let env = TestEnv::new().await;
        let config = env.config();
        let book = env.work_dir().join("Conciliacion.xlsx");
        XlsxStore.save(&template_workbook(), &book).await.unwrap();

        let args = RunArgs::new(&book)
            .with_dictionary(env.work_dir().join("missing.xlsx"))
            .with_offline(true)
            .with_no_backup(true);
        let out = run(&config, &args, march(8)).await.unwrap();

        let summary = out.structure().unwrap();
        assert!(summary.backup.is_none());
        // Only the built-in fallback rule applies without a dictionary.
        assert_eq!(summary.classified, 1);
    }

    #[tokio::test]
    async fn test_run_missing_workbook() {
        let env = TestEnv::new().await;
        let args = RunArgs::new(env.work_dir().join("nope.xlsx")).with_offline(true);
        let err = run(&env.config(), &args, march(8)).await.unwrap_err();
        assert!(err.to_string().starts_with("Error técnico"));
    }
}
