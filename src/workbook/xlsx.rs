//! Implements `WorkbookStore` for `.xlsx` files.
//!
//! `calamine` reads the file. Saving over an existing file patches only the cells written since
//! it was opened into the package (see `package`), so fonts, fills, column widths, merged ranges
//! and the formats of untouched cells survive. A workbook saved to a new path is written whole
//! by `rust_xlsxwriter`.

use crate::error::WorkbookLocked;
use crate::model::{Cell, CellValue, RowCol, DATE_FORMAT};
use crate::workbook::{package, MemorySheet, MemoryWorkbook, Sheet, WorkbookStore};
use crate::Result;
use anyhow::Context;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook as XlsxWorkbook, Worksheet};
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Reads and writes `.xlsx` workbooks on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxStore;

#[async_trait::async_trait]
impl WorkbookStore for XlsxStore {
    async fn open(&self, path: &Path) -> Result<MemoryWorkbook> {
        trace!("open {}", path.display());
        check_not_locked(path).await?;
        let bytes = read_package(path).await?;
        let mut workbook =
            load(bytes).with_context(|| format!("Unable to read workbook {}", path.display()))?;
        workbook.mark_clean();
        Ok(workbook)
    }

    async fn save(&self, workbook: &MemoryWorkbook, path: &Path) -> Result<()> {
        trace!("save {}", path.display());
        check_not_locked(path).await?;

        let bytes = if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let original = read_package(path).await?;
            package::patch(&original, workbook)
                .with_context(|| format!("Unable to update {}", path.display()))?
        } else {
            debug!("{} does not exist, writing a new workbook", path.display());
            write_new(workbook)?
        };

        match tokio::fs::write(path, bytes).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                Err(WorkbookLocked::new(path).into())
            }
            Err(e) => Err(e).with_context(|| format!("Unable to save {}", path.display())),
        }
    }
}

async fn read_package(path: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(WorkbookLocked::new(path).into()),
        Err(e) => Err(e).with_context(|| format!("Unable to open {}", path.display())),
    }
}

fn load(bytes: Vec<u8>) -> Result<MemoryWorkbook> {
    let mut source = open_workbook_auto_from_rs(Cursor::new(bytes))?;

    let mut workbook = MemoryWorkbook::new();
    for name in source.sheet_names() {
        let mut sheet = MemorySheet::new(name.as_str());

        let range = source
            .worksheet_range(&name)
            .with_context(|| format!("Unable to read sheet '{name}'"))?;
        let (row0, col0) = range.start().unwrap_or((0, 0));
        for (r, c, data) in range.used_cells() {
            let value = from_data(data);
            if !value.is_blank() {
                let at = RowCol::new(row0 + r as u32 + 1, col0 + c as u32 + 1);
                sheet.set_cell(at, Cell::new(value));
            }
        }

        // Formulas override the cached values read above.
        if let Ok(formulas) = source.worksheet_formula(&name) {
            let (row0, col0) = formulas.start().unwrap_or((0, 0));
            for (r, c, formula) in formulas.used_cells() {
                if formula.is_empty() {
                    continue;
                }
                let text = if formula.starts_with('=') {
                    formula.clone()
                } else {
                    format!("={formula}")
                };
                let at = RowCol::new(row0 + r as u32 + 1, col0 + c as u32 + 1);
                sheet.set_cell(at, Cell::new(CellValue::Formula(text)));
            }
        }

        debug!(
            "Loaded sheet '{name}' with extent {}x{}",
            sheet.max_row(),
            sheet.max_column()
        );
        workbook.add_sheet(sheet);
    }
    Ok(workbook)
}

fn from_data(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => Decimal::from_f64(*f)
            .map(CellValue::Number)
            .unwrap_or_default(),
        Data::Int(i) => CellValue::Number(Decimal::from(*i)),
        Data::Bool(b) => CellValue::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| CellValue::Date(d.date()))
            .unwrap_or_default(),
        Data::DateTimeIso(s) => chrono::NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d")
            .map(CellValue::Date)
            .unwrap_or_else(|_| CellValue::Text(s.clone())),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(format!("#{e:?}")),
    }
}

/// Writes every cell of `workbook` into a fresh package.
fn write_new(workbook: &MemoryWorkbook) -> Result<Vec<u8>> {
    let mut book = XlsxWorkbook::new();
    for sheet in workbook.sheets() {
        let worksheet = book.add_worksheet();
        worksheet
            .set_name(sheet.title())
            .with_context(|| format!("Invalid sheet name '{}'", sheet.title()))?;
        for (at, cell) in sheet.cells() {
            write_cell(worksheet, *at, cell)
                .with_context(|| format!("Unable to write cell {at} of '{}'", sheet.title()))?;
        }
    }
    Ok(book.save_to_buffer()?)
}

fn write_cell(worksheet: &mut Worksheet, at: RowCol, cell: &Cell) -> Result<()> {
    let row = at.row() - 1;
    let col = u16::try_from(at.col() - 1).context("Column is beyond the xlsx limit")?;
    let format = Format::new().set_num_format(cell.format().unwrap_or("General"));

    match cell.value() {
        CellValue::Empty => {}
        CellValue::Text(s) => {
            worksheet.write_string_with_format(row, col, s, &format)?;
        }
        CellValue::Number(n) => {
            let number = n.to_f64().context("Number does not fit in a float")?;
            worksheet.write_number_with_format(row, col, number, &format)?;
        }
        CellValue::Date(d) => {
            use chrono::Datelike;
            let date = ExcelDateTime::from_ymd(d.year() as u16, d.month() as u8, d.day() as u8)?;
            let format = Format::new().set_num_format(cell.format().unwrap_or(DATE_FORMAT));
            worksheet.write_datetime_with_format(row, col, &date, &format)?;
        }
        CellValue::Formula(f) => {
            worksheet.write_formula_with_format(row, col, f.as_str(), &format)?;
        }
    }
    Ok(())
}

/// Spreadsheet applications leave an owner file named `~$<file name>` next to a workbook they
/// have open.
fn owner_lock_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy();
    Some(path.with_file_name(format!("~${name}")))
}

async fn check_not_locked(path: &Path) -> Result<()> {
    if let Some(lock) = owner_lock_path(path) {
        let present = tokio::fs::metadata(&lock)
            .await
            .is_ok_and(|meta| meta.is_file());
        if present {
            debug!("Found owner lock file {}", lock.display());
            return Err(WorkbookLocked::new(path).into());
        }
    }
    Ok(())
}
