//! The `Workbook` and `Sheet` traits that every engine stage is written against, plus the
//! `WorkbookStore` boundary that loads and persists them.
//!
//! `MemoryWorkbook` is the only in-process representation. `XlsxStore` moves it to and from
//! `.xlsx` files on disk; tests build `MemoryWorkbook`s directly.

mod memory;
mod package;
mod xlsx;

pub use memory::{MemorySheet, MemoryWorkbook};
pub use xlsx::XlsxStore;

use crate::model::{Cell, CellValue, RowCol};
use crate::text::normalize;
use crate::Result;
use std::path::Path;

static EMPTY: CellValue = CellValue::Empty;

/// A 2-D grid of cells addressed by 1-indexed `RowCol`. The extent grows as cells are written.
pub trait Sheet {
    /// The sheet's name as it appears on its tab.
    fn title(&self) -> &str;

    /// The cell at `at`, if anything was ever written there.
    fn cell(&self, at: RowCol) -> Option<&Cell>;

    /// Writes `cell` at `at`, replacing whatever was there and growing the extent if needed.
    fn set_cell(&mut self, at: RowCol, cell: Cell);

    /// The last row holding a cell, or 0 for an empty sheet.
    fn max_row(&self) -> u32;

    /// The last column holding a cell, or 0 for an empty sheet.
    fn max_column(&self) -> u32;

    /// The value at `at`; `CellValue::Empty` when there is no cell.
    fn value(&self, at: RowCol) -> &CellValue {
        self.cell(at).map(|c| c.value()).unwrap_or(&EMPTY)
    }

    /// Shorthand for `value(RowCol::new(row, col))`.
    fn get(&self, row: u32, col: u32) -> &CellValue {
        self.value(RowCol::new(row, col))
    }
}

/// An ordered set of named sheets.
pub trait Workbook {
    fn sheet_names(&self) -> Vec<String>;

    /// The sheet named exactly `name`.
    fn sheet(&self, name: &str) -> Option<&dyn Sheet>;

    /// The sheet named exactly `name`, for writing.
    fn sheet_mut(&mut self, name: &str) -> Option<&mut dyn Sheet>;

    /// The first sheet, used where a document has no sheet with the expected name.
    fn first_sheet(&self) -> Option<&dyn Sheet> {
        let names = self.sheet_names();
        names.first().and_then(|name| self.sheet(name))
    }
}

/// Loads and persists workbooks. This is the only place where files are touched.
#[async_trait::async_trait]
pub trait WorkbookStore: Send + Sync {
    /// Loads the workbook at `path`. Every sheet comes back clean (no touched cells).
    async fn open(&self, path: &Path) -> Result<MemoryWorkbook>;

    /// Persists `workbook` at `path`. When a file is already there, only the cells written since
    /// it was opened are replaced.
    async fn save(&self, workbook: &MemoryWorkbook, path: &Path) -> Result<()>;
}

/// Finds the sheet whose normalized name equals the normalized `wanted`, so that
/// `"Manejo Excedente"` resolves `"MANEJO EXCEDENTE"`. Returns the sheet's real name.
pub fn resolve_sheet(workbook: &dyn Workbook, wanted: &str) -> Option<String> {
    let target = normalize(wanted);
    workbook
        .sheet_names()
        .into_iter()
        .find(|name| normalize(name) == target)
}

/// Finds the first sheet whose normalized name contains the normalized `fragment`, e.g.
/// `"DATA BS"` finds `"DATA BS ENERO"`. Returns the sheet's real name.
pub fn find_sheet_containing(workbook: &dyn Workbook, fragment: &str) -> Option<String> {
    let fragment = normalize(fragment);
    workbook
        .sheet_names()
        .into_iter()
        .find(|name| normalize(name).contains(&fragment))
}

/// `resolve_sheet`, falling back to `find_sheet_containing` for templates that suffix the
/// month or a plural to the tab name ("MANEJO EXCEDENTES", "DATA BS MARZO").
pub fn locate_sheet(workbook: &dyn Workbook, wanted: &str) -> Option<String> {
    resolve_sheet(workbook, wanted).or_else(|| find_sheet_containing(workbook, wanted))
}
