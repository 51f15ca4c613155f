//! Implements the `Workbook` and `Sheet` traits with in-memory data.
//!
//! Note: this is what production code runs on too. `XlsxStore` fills a `MemoryWorkbook` from a
//! file and patches the cells written since back into it; the engine never sees the file format.

use crate::model::{Cell, CellValue, RowCol};
use crate::workbook::{Sheet, Workbook};
use std::collections::{BTreeMap, BTreeSet};

/// A sheet held as a sparse map of cells. Every write is remembered until `mark_clean`, so a
/// store can persist only what changed.
#[derive(Debug, Clone, Default)]
pub struct MemorySheet {
    title: String,
    cells: BTreeMap<RowCol, Cell>,
    touched: BTreeSet<RowCol>,
    max_row: u32,
    max_column: u32,
}

/// Two sheets are equal when they hold the same cells, whatever was written to get there.
impl PartialEq for MemorySheet {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title
            && self.cells == other.cells
            && self.max_row == other.max_row
            && self.max_column == other.max_column
    }
}

impl Eq for MemorySheet {}

impl MemorySheet {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Builds a sheet from rows of values; `rows[0][0]` lands in `A1`. Blank values are skipped.
    pub fn from_rows<V, R, I>(title: impl Into<String>, rows: I) -> Self
    where
        V: Into<CellValue>,
        R: IntoIterator<Item = V>,
        I: IntoIterator<Item = R>,
    {
        let mut sheet = Self::new(title);
        for (r, row) in rows.into_iter().enumerate() {
            for (c, value) in row.into_iter().enumerate() {
                let value = value.into();
                if !value.is_blank() {
                    sheet.set_cell(RowCol::new(r as u32 + 1, c as u32 + 1), Cell::new(value));
                }
            }
        }
        sheet
    }

    /// Writes a bare value at `(row, col)`.
    pub fn put(&mut self, row: u32, col: u32, value: impl Into<CellValue>) {
        self.set_cell(RowCol::new(row, col), Cell::new(value));
    }

    /// Iterates over every written cell in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (&RowCol, &Cell)> {
        self.cells.iter()
    }

    /// The cells written since the sheet was loaded, in row-major order.
    pub fn touched(&self) -> impl Iterator<Item = (RowCol, &Cell)> {
        self.touched
            .iter()
            .filter_map(|at| self.cells.get(at).map(|cell| (*at, cell)))
    }

    /// Forgets which cells were written. Stores call this on a freshly loaded sheet.
    pub fn mark_clean(&mut self) {
        self.touched.clear();
    }
}

impl Sheet for MemorySheet {
    fn title(&self) -> &str {
        &self.title
    }

    fn cell(&self, at: RowCol) -> Option<&Cell> {
        self.cells.get(&at)
    }

    fn set_cell(&mut self, at: RowCol, cell: Cell) {
        self.max_row = self.max_row.max(at.row());
        self.max_column = self.max_column.max(at.col());
        self.touched.insert(at);
        self.cells.insert(at, cell);
    }

    fn max_row(&self) -> u32 {
        self.max_row
    }

    fn max_column(&self) -> u32 {
        self.max_column
    }
}

/// An ordered list of `MemorySheet`s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryWorkbook {
    sheets: Vec<MemorySheet>,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `sheet`, replacing any existing sheet with the same name in place.
    pub fn add_sheet(&mut self, sheet: MemorySheet) {
        match self.sheets.iter_mut().find(|s| s.title == sheet.title) {
            Some(existing) => *existing = sheet,
            None => self.sheets.push(sheet),
        }
    }

    pub fn with_sheet(mut self, sheet: MemorySheet) -> Self {
        self.add_sheet(sheet);
        self
    }

    pub fn sheets(&self) -> &[MemorySheet] {
        &self.sheets
    }

    /// `MemorySheet::mark_clean` for every sheet.
    pub fn mark_clean(&mut self) {
        self.sheets.iter_mut().for_each(MemorySheet::mark_clean);
    }
}

impl Workbook for MemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.title.clone()).collect()
    }

    fn sheet(&self, name: &str) -> Option<&dyn Sheet> {
        self.sheets
            .iter()
            .find(|s| s.title == name)
            .map(|s| s as &dyn Sheet)
    }

    fn sheet_mut(&mut self, name: &str) -> Option<&mut dyn Sheet> {
        self.sheets
            .iter_mut()
            .find(|s| s.title == name)
            .map(|s| s as &mut dyn Sheet)
    }
}
