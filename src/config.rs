//! Configuration file handling for cuadre.
//!
//! The configuration file is stored at `$CUADRE_HOME/config.json` and holds the rate endpoints,
//! the location of the lookup-table document and the backup settings.

use crate::backup::Backup;
use crate::{utils, Result};
use anyhow::{bail, ensure, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use url::Url;

const APP_NAME: &str = "cuadre";
const CONFIG_VERSION: u8 = 1;
const BACKUP_COPIES: u32 = 5;
const REQUEST_TIMEOUT_SECS: u64 = 10;
const BACKUPS: &str = ".backups";
const CONFIG_JSON: &str = "config.json";
const DICTIONARY: &str = "diccionario.xlsx";
const HISTORICAL_RATES_URL: &str = "https://api.dolarvzla.com/public/exchange-rate/list";
const CURRENT_RATE_URL: &str = "https://ve.dolarapi.com/v1/dolares/oficial";
const RATE_KEY_HEADER: &str = "x-dolarvzla-key";

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$CUADRE_HOME` and from there it loads `$CUADRE_HOME/config.json`.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    backups: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
}

impl Config {
    /// Creates the home directory, its backups subdirectory and an initial `config.json` with
    /// default settings. An existing `config.json` is left alone and loaded instead.
    ///
    /// # Errors
    /// - Returns an error if any file operations fail.
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the cuadre home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;

        let backups = root.join(BACKUPS);
        utils::make_dir(&backups).await?;

        let config_path = root.join(CONFIG_JSON);
        if config_path.is_file() {
            return Self::load(root).await;
        }
        let config_file = ConfigFile::default();
        config_file.save(&config_path).await?;

        Ok(Self {
            root,
            backups,
            config_path,
            config_file,
        })
    }

    /// Validates that the home directory and its config file exist, then loads and validates the
    /// config file.
    pub async fn load(home: impl Into<PathBuf>) -> Result<Self> {
        let maybe_relative = home.into();
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("cuadre home is missing, run 'cuadre init' first")?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;

        Ok(Self {
            backups: root.join(BACKUPS),
            root,
            config_path,
            config_file,
        })
    }

    /// Like `load`, but a missing home directory or config file yields the default settings
    /// rooted at `home` and a warning. An invalid config file is still an error.
    pub async fn load_or_default(home: impl Into<PathBuf>) -> Result<Self> {
        let root = home.into();
        if root.join(CONFIG_JSON).is_file() {
            return Self::load(root).await;
        }
        warn!(
            "No config file in '{}', using the default settings",
            root.display()
        );
        Ok(Self {
            backups: root.join(BACKUPS),
            config_path: root.join(CONFIG_JSON),
            root,
            config_file: ConfigFile::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn backups(&self) -> &Path {
        &self.backups
    }

    pub fn backup_copies(&self) -> u32 {
        self.config_file.backup_copies
    }

    pub fn historical_rates_url(&self) -> &str {
        &self.config_file.historical_rates_url
    }

    pub fn current_rate_url(&self) -> &str {
        &self.config_file.current_rate_url
    }

    pub fn rate_key_header(&self) -> &str {
        &self.config_file.rate_key_header
    }

    /// The access key stored in the config file, if any. The CLI and environment override it.
    pub fn rate_access_key(&self) -> Option<&str> {
        self.config_file.rate_access_key.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config_file.request_timeout_secs)
    }

    /// The lookup-table document; a relative path is resolved against the home directory.
    pub fn dictionary_path(&self) -> PathBuf {
        let p = &self.config_file.dictionary_path;
        if p.is_absolute() {
            return p.clone();
        }
        self.root.join(p)
    }

    /// Creates a new `Backup` instance for managing backup files.
    pub fn backup(&self) -> Backup {
        Backup::new(self)
    }
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "cuadre",
///   "config_version": 1,
///   "historical_rates_url": "https://api.dolarvzla.com/public/exchange-rate/list",
///   "current_rate_url": "https://ve.dolarapi.com/v1/dolares/oficial",
///   "rate_key_header": "x-dolarvzla-key",
///   "request_timeout_secs": 10,
///   "dictionary_path": "diccionario.xlsx",
///   "backup_copies": 5
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "cuadre"
    app_name: String,

    /// Configuration file version
    config_version: u8,

    /// Endpoint returning the historical rate series
    historical_rates_url: String,

    /// Endpoint returning today's official rate
    current_rate_url: String,

    /// Header that carries the access key on historical requests
    #[serde(default = "default_rate_key_header")]
    rate_key_header: String,

    /// Access key for the historical endpoint. Prefer `CUADRE_RATE_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rate_access_key: Option<String>,

    /// Per-request timeout for both rate endpoints
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,

    /// Path to the lookup-table document (relative to the home directory or absolute)
    #[serde(default = "default_dictionary_path")]
    dictionary_path: PathBuf,

    /// Number of backup copies to keep per workbook
    #[serde(default = "default_backup_copies")]
    backup_copies: u32,
}

fn default_rate_key_header() -> String {
    RATE_KEY_HEADER.to_string()
}

fn default_request_timeout_secs() -> u64 {
    REQUEST_TIMEOUT_SECS
}

fn default_dictionary_path() -> PathBuf {
    PathBuf::from(DICTIONARY)
}

fn default_backup_copies() -> u32 {
    BACKUP_COPIES
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            historical_rates_url: HISTORICAL_RATES_URL.to_string(),
            current_rate_url: CURRENT_RATE_URL.to_string(),
            rate_key_header: default_rate_key_header(),
            rate_access_key: None,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            dictionary_path: default_dictionary_path(),
            backup_copies: BACKUP_COPIES,
        }
    }
}

impl ConfigFile {
    /// Loads a ConfigFile from `path` and validates it.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if a setting is invalid
    async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: ConfigFile = utils::deserialize(path).await?;

        ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );
        for (name, value) in [
            ("historical_rates_url", &config.historical_rates_url),
            ("current_rate_url", &config.current_rate_url),
        ] {
            Url::parse(value)
                .with_context(|| format!("Invalid {name} in config file: '{value}'"))?;
        }
        ensure!(
            config.request_timeout_secs > 0,
            "Invalid request_timeout_secs in config file: must be at least 1"
        );

        Ok(config)
    }

    /// Saves the ConfigFile to `path` as pretty JSON.
    async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let p = path.as_ref();
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(p, data)
            .await
            .context("Unable to write config file")
    }
}
