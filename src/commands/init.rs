use crate::commands::Out;
use crate::{Config, Result};
use anyhow::Context;
use std::path::Path;

/// Creates the home directory, its backups subdirectory and a default `config.json`. Running it
/// again keeps an existing `config.json`.
///
/// # Arguments
/// - `home` - The directory that will be the root of the home directory, e.g. `$HOME/cuadre`
///
/// # Errors
/// - Returns an error if any file operations fail or an existing config is invalid.
pub async fn init(home: &Path) -> Result<Out<()>> {
    let config = Config::create(home)
        .await
        .context("Unable to create the cuadre home directory and config")?;
    Ok(format!(
        "Successfully created the cuadre home directory at {}",
        config.root().display()
    )
    .into())
}
