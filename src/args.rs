//! These structs provide the CLI interface for the cuadre CLI.

use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// cuadre: classifies, converts and reconciles a bank reconciliation workbook.
///
/// The workbook follows a fixed template: a DATA BS ledger, APARTADOS set-asides, a MANEJO
/// EXCEDENTE surplus sheet, a weekly RESUMEN DISPONIBILIDAD summary, a CUENTAS POR COBRAR cover
/// and a COMPORTAMIENTO TASA rate log. A run fills in account and area categories from a rule
/// dictionary, converts amounts to USD with the official rate, reconciles the specialized
/// services set-asides and rolls the ledger up into the weekly summary.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the cuadre home directory and a default config.json.
    ///
    /// The home directory holds the configuration and the backups taken before each run
    /// overwrites a workbook. By default it is $HOME/cuadre; pass --home or set CUADRE_HOME to
    /// put it somewhere else. Place the rule dictionary (diccionario.xlsx) in it, or point
    /// dictionary_path in config.json at it.
    Init,
    /// Process a workbook: classify, convert, reconcile and update the weekly summary.
    Run(RunArgs),
    /// Print the exchange rate that would be used for a given date.
    Rate(RateArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where cuadre configuration and backups are held. Defaults to ~/cuadre
    #[arg(long, env = "CUADRE_HOME", default_value_t = default_cuadre_home())]
    home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, home: PathBuf) -> Self {
        Self {
            log_level,
            home: home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn home(&self) -> &DisplayPath {
        &self.home
    }
}

/// Args for the `cuadre run` command.
#[derive(Debug, Parser, Clone, Default)]
pub struct RunArgs {
    /// The workbook to process. It is overwritten in place.
    workbook: PathBuf,

    /// The rule dictionary, overriding dictionary_path from config.json.
    #[arg(long)]
    dictionary: Option<PathBuf>,

    /// Access key for the historical rate endpoint.
    #[arg(long, env = "CUADRE_RATE_KEY", hide_env_values = true)]
    rate_key: Option<String>,

    /// Do not fetch exchange rates. Currency conversion, the cover stamp and the rate log are
    /// skipped.
    #[arg(long)]
    offline: bool,

    /// Overwrite the workbook without copying it to the backups directory first.
    #[arg(long)]
    no_backup: bool,
}

impl RunArgs {
    pub fn new(workbook: impl Into<PathBuf>) -> Self {
        Self {
            workbook: workbook.into(),
            ..Self::default()
        }
    }

    pub fn with_dictionary(mut self, dictionary: impl Into<PathBuf>) -> Self {
        self.dictionary = Some(dictionary.into());
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_no_backup(mut self, no_backup: bool) -> Self {
        self.no_backup = no_backup;
        self
    }

    pub fn workbook(&self) -> &Path {
        &self.workbook
    }

    pub fn dictionary(&self) -> Option<&Path> {
        self.dictionary.as_deref()
    }

    pub fn rate_key(&self) -> Option<&str> {
        self.rate_key.as_deref()
    }

    pub fn offline(&self) -> bool {
        self.offline
    }

    pub fn no_backup(&self) -> bool {
        self.no_backup
    }
}

/// Args for the `cuadre rate` command.
#[derive(Debug, Parser, Clone)]
pub struct RateArgs {
    /// The date to resolve, e.g. 2024-03-10 or 10/03/2024.
    date: String,

    /// Access key for the historical rate endpoint.
    #[arg(long, env = "CUADRE_RATE_KEY", hide_env_values = true)]
    rate_key: Option<String>,
}

impl RateArgs {
    pub fn new(date: impl Into<String>, rate_key: Option<String>) -> Self {
        Self {
            date: date.into(),
            rate_key,
        }
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn rate_key(&self) -> Option<&str> {
        self.rate_key.as_deref()
    }
}

fn default_cuadre_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("cuadre"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --home or CUADRE_HOME instead of relying on the default \
                cuadre home directory. If you continue using the program right now, you may have \
                problems!",
            );
            PathBuf::from("cuadre")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}
