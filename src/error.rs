use std::fmt;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub type Error = anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// The workbook could not be opened or written because another process (usually a spreadsheet
/// application) holds it. This is carried inside an `anyhow::Error` and recovered with
/// `downcast_ref` so that the host can tell the user to close the file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WorkbookLocked {
    path: PathBuf,
}

impl WorkbookLocked {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Display for WorkbookLocked {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "The workbook '{}' is open in another program and is locked",
            self.path.display()
        )
    }
}

impl std::error::Error for WorkbookLocked {}

/// Returns true if `WorkbookLocked` appears anywhere in the chain of `e`.
pub(crate) fn is_locked(e: &Error) -> bool {
    e.chain()
        .any(|cause| cause.downcast_ref::<WorkbookLocked>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_is_locked_through_context() {
        let e: Error = Err::<(), _>(WorkbookLocked::new("book.xlsx"))
            .context("Unable to save")
            .unwrap_err();
        assert!(is_locked(&e));
        assert!(!is_locked(&anyhow::anyhow!("something else")));
    }

    #[test]
    fn test_display() {
        let locked = WorkbookLocked::new("/tmp/book.xlsx");
        assert!(locked.to_string().contains("/tmp/book.xlsx"));
    }
}
