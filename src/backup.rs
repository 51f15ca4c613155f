//! Copies of a workbook taken before it is overwritten.

use crate::{utils, Config, Result};
use anyhow::{bail, Context};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Manages backup file creation and rotation.
///
/// The `Backup` struct is immutable and owns copies of the paths and settings it needs.
/// Create a new instance via `Config::backup()` or `Backup::new()`.
#[derive(Debug, Clone)]
pub struct Backup {
    backups_dir: PathBuf,
    backup_copies: u32,
}

impl Backup {
    /// Creates a new `Backup` instance from a `Config`.
    pub fn new(config: &Config) -> Self {
        Self {
            backups_dir: config.backups().to_path_buf(),
            backup_copies: config.backup_copies(),
        }
    }

    /// Copies `source` into the backups directory.
    ///
    /// The filename format is `{stem}.YYYY-MM-DD-NNN.{ext}` where NNN is a sequence number, so
    /// `Conciliacion.xlsx` becomes `Conciliacion.2024-03-11-001.xlsx`. Automatically rotates old
    /// backups, keeping only `backup_copies` files per stem.
    ///
    /// Returns the path to the created backup file.
    pub async fn copy_workbook(&self, source: &Path, today: NaiveDate) -> Result<PathBuf> {
        let Some(stem) = source.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            bail!("Cannot back up '{}', it has no file name", source.display());
        };
        let extension = source
            .extension()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        utils::make_dir(&self.backups_dir)
            .await
            .context("Unable to create the backups directory")?;

        let date = today.format("%Y-%m-%d").to_string();
        let seq = self.next_sequence_number(&stem, &date, &extension).await?;
        let filename = if extension.is_empty() {
            format!("{stem}.{date}-{seq:03}")
        } else {
            format!("{stem}.{date}-{seq:03}.{extension}")
        };
        let path = self.backups_dir.join(&filename);

        utils::copy(source, &path).await?;
        debug!("Backed up '{}' to '{}'", source.display(), path.display());

        self.rotate(&stem, &extension).await?;

        Ok(path)
    }

    /// Scans the backups directory for existing files with the given stem and date,
    /// and returns the next sequence number.
    async fn next_sequence_number(&self, stem: &str, date: &str, extension: &str) -> Result<u32> {
        let mut max_seq: u32 = 0;

        let mut dir = utils::read_dir(&self.backups_dir).await?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .context("Failed to read directory entry")?
        {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if let Some(seq) = parse_sequence_number(&name, stem, date, extension) {
                max_seq = max_seq.max(seq);
            }
        }

        Ok(max_seq + 1)
    }

    /// Rotates old backup files, keeping only `backup_copies` files with the given stem.
    async fn rotate(&self, stem: &str, extension: &str) -> Result<()> {
        let mut files: Vec<(PathBuf, String)> = Vec::new();

        let mut dir = utils::read_dir(&self.backups_dir).await?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .context("Failed to read directory entry")?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_backup_file(&name, stem, extension) {
                files.push((entry.path(), name));
            }
        }

        // Names sort by date and then sequence number.
        files.sort_by(|a, b| a.1.cmp(&b.1));

        let to_delete = files.len().saturating_sub(self.backup_copies as usize);
        for (path, _) in files.into_iter().take(to_delete) {
            utils::remove(&path).await?;
        }

        Ok(())
    }
}

/// Parses the sequence number from a backup filename.
/// Returns None if the filename doesn't match the expected pattern.
fn parse_sequence_number(filename: &str, stem: &str, date: &str, extension: &str) -> Option<u32> {
    let remainder = filename.strip_prefix(&format!("{stem}.{date}-"))?;
    let seq_str = if extension.is_empty() {
        remainder
    } else {
        remainder.strip_suffix(&format!(".{extension}"))?
    };
    if seq_str.is_empty() || !seq_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    seq_str.parse().ok()
}

/// Checks if a filename is a backup of the workbook `{stem}.{extension}`: the stem, a dot, a
/// `YYYY-MM-DD-NNN` tag and the extension.
fn is_backup_file(filename: &str, stem: &str, extension: &str) -> bool {
    let Some(rest) = filename.strip_prefix(&format!("{stem}.")) else {
        return false;
    };
    let tag = if extension.is_empty() {
        rest
    } else {
        match rest.strip_suffix(&format!(".{extension}")) {
            Some(tag) => tag,
            None => return false,
        }
    };
    let Some((date, seq)) = tag.rsplit_once('-') else {
        return false;
    };
    NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
        && !seq.is_empty()
        && seq.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn backup(dir: &Path, copies: u32) -> Backup {
        Backup {
            backups_dir: dir.join(".backups"),
            backup_copies: copies,
        }
    }

    #[test]
    fn test_parse_sequence_number() {
        assert_eq!(
            parse_sequence_number("Cuadre.2024-03-11-001.xlsx", "Cuadre", "2024-03-11", "xlsx"),
            Some(1)
        );
        assert_eq!(
            parse_sequence_number("Cuadre.2024-03-11-042.xlsx", "Cuadre", "2024-03-11", "xlsx"),
            Some(42)
        );
        assert_eq!(
            parse_sequence_number("Cuadre.2024-03-11-003", "Cuadre", "2024-03-11", ""),
            Some(3)
        );
        // Wrong stem
        assert_eq!(
            parse_sequence_number("Otro.2024-03-11-001.xlsx", "Cuadre", "2024-03-11", "xlsx"),
            None
        );
        // Wrong date
        assert_eq!(
            parse_sequence_number("Cuadre.2024-03-10-001.xlsx", "Cuadre", "2024-03-11", "xlsx"),
            None
        );
    }

    #[test]
    fn test_is_backup_file() {
        assert!(is_backup_file("Cuadre.2024-03-11-001.xlsx", "Cuadre", "xlsx"));
        assert!(is_backup_file("Cuadre.2024-03-11-001", "Cuadre", ""));
        assert!(!is_backup_file("Cuadre.2024-03-11-001.xlsm", "Cuadre", "xlsx"));
        assert!(!is_backup_file("Cuadre Marzo.2024-03-11-001.xlsx", "Cuadre", "xlsx"));
        assert!(!is_backup_file("Cuadre.notes.xlsx", "Cuadre", "xlsx"));
    }

    #[tokio::test]
    async fn test_copy_workbook_numbers_and_rotates() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("Cuadre.xlsx");
        std::fs::write(&source, b"workbook").unwrap();
        let backup = backup(dir.path(), 2);

        let first = backup.copy_workbook(&source, day(11)).await.unwrap();
        assert!(first.ends_with("Cuadre.2024-03-11-001.xlsx"));
        assert_eq!(std::fs::read(&first).unwrap(), b"workbook");

        let second = backup.copy_workbook(&source, day(11)).await.unwrap();
        assert!(second.ends_with("Cuadre.2024-03-11-002.xlsx"));

        let third = backup.copy_workbook(&source, day(12)).await.unwrap();
        assert!(third.ends_with("Cuadre.2024-03-12-001.xlsx"));

        assert!(!first.exists());
        assert!(second.exists());
        assert!(third.exists());
    }

    #[tokio::test]
    async fn test_copy_missing_workbook_fails() {
        let dir = TempDir::new().unwrap();
        let backup = backup(dir.path(), 5);
        let result = backup
            .copy_workbook(&dir.path().join("missing.xlsx"), day(11))
            .await;
        assert!(result.is_err());
    }
}
