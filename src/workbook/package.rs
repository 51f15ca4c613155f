//! Patches written cells into an existing `.xlsx` package.
//!
//! The package is read as a zip archive and every part is copied through unchanged, except:
//! - worksheets with touched cells, where only those `<c>` elements are replaced or inserted
//! - `xl/styles.xml`, when a written cell needs a number format the template does not have
//! - `xl/workbook.xml`, which is told to recalculate on load
//! - the calculation chain, which is dropped so the spreadsheet application rebuilds it
//!
//! Merged ranges, column widths, fonts, fills and the formats of untouched cells survive a save.

use crate::model::{Cell, CellValue, RowCol, DATE_FORMAT};
use crate::workbook::{MemorySheet, MemoryWorkbook, Sheet};
use crate::Result;
use anyhow::{anyhow, bail, Context};
use chrono::{Datelike, NaiveDate};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Cursor, Read, Write};
use tracing::{debug, trace};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const CONTENT_TYPES: &str = "[Content_Types].xml";
const WORKBOOK: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const STYLES: &str = "xl/styles.xml";
const CALC_CHAIN: &str = "xl/calcChain.xml";

/// Number format ids below this are built in; custom formats are numbered from here.
const FIRST_CUSTOM_FORMAT: u32 = 164;

/// `num_days_from_ce` of 1899-12-30, day zero of spreadsheet date serials.
const SERIAL_EPOCH: i32 = 693_594;

/// Children of `<workbook>` that come after `<calcPr>`.
const AFTER_CALC_PR: [&[u8]; 9] = [
    b"oleSize",
    b"customWorkbookViews",
    b"pivotCaches",
    b"smartTagPr",
    b"smartTagTypes",
    b"webPublishing",
    b"fileRecoveryPr",
    b"webPublishObjects",
    b"extLst",
];

struct Part {
    name: String,
    data: Vec<u8>,
}

/// Returns `original` with the touched cells of `workbook` written into it.
pub(crate) fn patch(original: &[u8], workbook: &MemoryWorkbook) -> Result<Vec<u8>> {
    let edited: Vec<&MemorySheet> = workbook
        .sheets()
        .iter()
        .filter(|sheet| sheet.touched().next().is_some())
        .collect();
    if edited.is_empty() {
        debug!("No cells were written, the package is unchanged");
        return Ok(original.to_vec());
    }

    let mut parts = read_parts(original)?;
    let locations = sheet_parts(
        &part_text(&parts, WORKBOOK)?,
        &part_text(&parts, WORKBOOK_RELS)?,
    )?;
    let styles_xml = part_text(&parts, STYLES)?;
    let mut styles = Styles::parse(&styles_xml)?;

    for sheet in edited {
        let name = locations
            .get(sheet.title())
            .with_context(|| format!("Sheet '{}' is not in the package", sheet.title()))?;
        let xml = part_text(&parts, name)?;
        let patched = patch_sheet(&xml, sheet, &mut styles)
            .with_context(|| format!("Unable to patch sheet '{}'", sheet.title()))?;
        debug!("Patched {} cells into {name}", sheet.touched().count());
        set_part(&mut parts, name, patched.into_bytes());
    }
    if styles.is_extended() {
        set_part(&mut parts, STYLES, styles.render(&styles_xml)?.into_bytes());
    }
    let workbook_xml = full_calc_on_load(&part_text(&parts, WORKBOOK)?)?;
    set_part(&mut parts, WORKBOOK, workbook_xml.into_bytes());
    drop_calc_chain(&mut parts)?;
    write_parts(&parts)
}

fn read_parts(bytes: &[u8]) -> Result<Vec<Part>> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).context("The workbook is not a zip package")?;
    let mut parts = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .with_context(|| format!("Unable to read part {}", file.name()))?;
        parts.push(Part {
            name: file.name().to_string(),
            data,
        });
    }
    Ok(parts)
}

fn write_parts(parts: &[Part]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for part in parts {
        writer.start_file(part.name.as_str(), options)?;
        writer.write_all(&part.data)?;
    }
    Ok(writer.finish()?.into_inner())
}

fn part_text(parts: &[Part], name: &str) -> Result<String> {
    let part = parts
        .iter()
        .find(|p| p.name == name)
        .with_context(|| format!("The package has no part {name}"))?;
    String::from_utf8(part.data.clone()).with_context(|| format!("Part {name} is not UTF-8"))
}

fn set_part(parts: &mut [Part], name: &str, data: Vec<u8>) {
    if let Some(part) = parts.iter_mut().find(|p| p.name == name) {
        part.data = data;
    }
}

/// The unescaped value of the attribute whose local name is `key`.
fn attr(e: &BytesStart, key: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a?;
        if a.key.local_name().as_ref() == key {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// A copy of `e` with `key` set to `value`.
fn with_attr(e: &BytesStart, key: &str, value: &str) -> Result<BytesStart<'static>> {
    let name = std::str::from_utf8(e.name().as_ref())?.to_string();
    let mut out = BytesStart::new(name);
    for a in e.attributes() {
        let a = a?;
        if a.key.as_ref() != key.as_bytes() {
            out.push_attribute(a);
        }
    }
    out.push_attribute((key, value));
    Ok(out)
}

fn end_of(e: &BytesStart) -> Result<BytesEnd<'static>> {
    Ok(BytesEnd::new(
        std::str::from_utf8(e.name().as_ref())?.to_string(),
    ))
}

/// Maps sheet names to their worksheet part, e.g. `DATA BS` -> `xl/worksheets/sheet2.xml`.
fn sheet_parts(workbook_xml: &str, rels_xml: &str) -> Result<HashMap<String, String>> {
    let mut targets = HashMap::new();
    let mut reader = Reader::from_str(rels_xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id")?, attr(&e, b"Target")?) {
                    let path = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{target}"),
                    };
                    targets.insert(id, path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let mut sheets = HashMap::new();
    let mut reader = Reader::from_str(workbook_xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                // `r:id` is the only attribute of <sheet> whose local name is `id`.
                let part = attr(&e, b"id")?.and_then(|id| targets.get(&id).cloned());
                if let (Some(name), Some(part)) = (attr(&e, b"name")?, part) {
                    sheets.insert(name, part);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}

/// Maps the number formats Excel has built in to their ids.
fn builtin_format(code: &str) -> Option<u32> {
    match code {
        "General" => Some(0),
        "0" => Some(1),
        "0.00" => Some(2),
        "#,##0" => Some(3),
        "#,##0.00" => Some(4),
        "0%" => Some(9),
        "0.00%" => Some(10),
        _ => None,
    }
}

/// The cell formats (`cellXfs`) of `xl/styles.xml` and the ones a patch adds to it. Every `xf`
/// is kept as its raw events, so a derived style keeps the font, fill, border and alignment of
/// the style it was derived from.
struct Styles {
    formats: HashMap<String, u32>,
    format_count: usize,
    next_format: u32,
    xfs: Vec<Vec<Event<'static>>>,
    new_formats: Vec<(u32, String)>,
    new_xfs: Vec<Vec<Event<'static>>>,
    derived: HashMap<(u32, String), u32>,
}

impl Styles {
    fn parse(xml: &str) -> Result<Self> {
        let mut formats = HashMap::new();
        let mut format_count = 0;
        let mut next_format = FIRST_CUSTOM_FORMAT;
        let mut xfs = Vec::new();
        let mut in_cell_xfs = false;
        let mut current: Option<Vec<Event<'static>>> = None;

        let mut reader = Reader::from_str(xml);
        loop {
            let event = reader.read_event()?;
            if let Some(events) = current.as_mut() {
                let closes = matches!(&event, Event::End(e) if e.local_name().as_ref() == b"xf");
                events.push(event.into_owned());
                if closes {
                    xfs.extend(current.take());
                }
                continue;
            }
            match event {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"numFmt" => {
                    format_count += 1;
                    if let (Some(id), Some(code)) = (attr(&e, b"numFmtId")?, attr(&e, b"formatCode")?)
                    {
                        let id: u32 = id
                            .parse()
                            .with_context(|| format!("Invalid number format id '{id}'"))?;
                        next_format = next_format.max(id.saturating_add(1));
                        formats.insert(code, id);
                    }
                }
                Event::Start(e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = true,
                Event::End(e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = false,
                Event::Empty(e) if in_cell_xfs && e.local_name().as_ref() == b"xf" => {
                    xfs.push(vec![Event::Empty(e.into_owned())]);
                }
                Event::Start(e) if in_cell_xfs && e.local_name().as_ref() == b"xf" => {
                    current = Some(vec![Event::Start(e.into_owned())]);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(Self {
            formats,
            format_count,
            next_format,
            xfs,
            new_formats: Vec::new(),
            new_xfs: Vec::new(),
            derived: HashMap::new(),
        })
    }

    fn len(&self) -> usize {
        self.xfs.len() + self.new_xfs.len()
    }

    fn xf(&self, index: u32) -> Option<&Vec<Event<'static>>> {
        self.xfs.iter().chain(&self.new_xfs).nth(index as usize)
    }

    fn is_extended(&self) -> bool {
        !self.new_formats.is_empty() || !self.new_xfs.is_empty()
    }

    /// The index of a style like `base` but showing numbers with `code`. Adds the number format
    /// and the style when the table has neither.
    fn with_format(&mut self, base: u32, code: &str) -> Result<u32> {
        let base = if (base as usize) < self.len() { base } else { 0 };
        let key = (base, code.to_string());
        if let Some(index) = self.derived.get(&key) {
            return Ok(*index);
        }

        let format = match builtin_format(code).or_else(|| self.formats.get(code).copied()) {
            Some(id) => id,
            None => {
                let id = self.next_format;
                self.next_format += 1;
                self.formats.insert(code.to_string(), id);
                self.new_formats.push((id, code.to_string()));
                id
            }
        };

        let mut events = self.xf(base).cloned().unwrap_or_else(|| {
            let mut xf = BytesStart::new("xf");
            for key in ["numFmtId", "fontId", "fillId", "borderId", "xfId"] {
                xf.push_attribute((key, "0"));
            }
            vec![Event::Empty(xf)]
        });
        let (start, empty) = match events.first() {
            Some(Event::Start(e)) => (e, false),
            Some(Event::Empty(e)) => (e, true),
            _ => bail!("Cell style {base} is malformed"),
        };
        if attr(start, b"numFmtId")?.and_then(|id| id.parse::<u32>().ok()) == Some(format)
            && (base as usize) < self.len()
        {
            self.derived.insert(key, base);
            return Ok(base);
        }
        let restyled = with_attr(
            &with_attr(start, "numFmtId", &format.to_string())?,
            "applyNumberFormat",
            "1",
        )?;
        events[0] = if empty {
            Event::Empty(restyled)
        } else {
            Event::Start(restyled)
        };

        let index = u32::try_from(self.len())?;
        trace!("Adding cell style {index}: style {base} with format '{code}'");
        self.new_xfs.push(events);
        self.derived.insert(key, index);
        Ok(index)
    }

    /// `xml` with the added number formats and styles appended and the counts updated.
    fn render(&self, xml: &str) -> Result<String> {
        let mut reader = Reader::from_str(xml);
        let mut writer = Writer::new(Vec::new());
        let mut has_formats = false;
        loop {
            match reader.read_event()? {
                Event::Start(e) if e.local_name().as_ref() == b"numFmts" => {
                    has_formats = true;
                    let count = self.format_count + self.new_formats.len();
                    writer.write_event(Event::Start(with_attr(&e, "count", &count.to_string())?))?;
                }
                Event::End(e) if e.local_name().as_ref() == b"numFmts" => {
                    self.write_new_formats(&mut writer)?;
                    writer.write_event(Event::End(e))?;
                }
                Event::Empty(e) if e.local_name().as_ref() == b"numFmts" => {
                    has_formats = true;
                    self.write_format_block(&mut writer)?;
                }
                Event::Start(e) if !has_formats && e.local_name().as_ref() == b"fonts" => {
                    has_formats = true;
                    self.write_format_block(&mut writer)?;
                    writer.write_event(Event::Start(e))?;
                }
                Event::Empty(e) if !has_formats && e.local_name().as_ref() == b"fonts" => {
                    has_formats = true;
                    self.write_format_block(&mut writer)?;
                    writer.write_event(Event::Empty(e))?;
                }
                Event::Start(e) if e.local_name().as_ref() == b"cellXfs" => {
                    let count = self.len().to_string();
                    writer.write_event(Event::Start(with_attr(&e, "count", &count)?))?;
                }
                Event::End(e) if e.local_name().as_ref() == b"cellXfs" => {
                    for event in self.new_xfs.iter().flatten() {
                        writer.write_event(event.clone())?;
                    }
                    writer.write_event(Event::End(e))?;
                }
                Event::Eof => break,
                event => writer.write_event(event)?,
            }
        }
        Ok(String::from_utf8(writer.into_inner())?)
    }

    fn write_new_formats(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        for (id, code) in &self.new_formats {
            let mut format = BytesStart::new("numFmt");
            format.push_attribute(("numFmtId", id.to_string().as_str()));
            format.push_attribute(("formatCode", code.as_str()));
            writer.write_event(Event::Empty(format))?;
        }
        Ok(())
    }

    /// A whole `<numFmts>` element, for a stylesheet that had none.
    fn write_format_block(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        if self.new_formats.is_empty() {
            return Ok(());
        }
        let mut block = BytesStart::new("numFmts");
        let count = self.format_count + self.new_formats.len();
        block.push_attribute(("count", count.to_string().as_str()));
        writer.write_event(Event::Start(block))?;
        self.write_new_formats(writer)?;
        writer.write_event(Event::End(BytesEnd::new("numFmts")))?;
        Ok(())
    }
}

/// Writes the touched cells of `sheet` into its worksheet `xml`. Cells are replaced in place or
/// inserted in row and column order; everything else in the part passes through unchanged.
fn patch_sheet(xml: &str, sheet: &MemorySheet, styles: &mut Styles) -> Result<String> {
    let mut edits: BTreeMap<RowCol, &Cell> = sheet.touched().collect();
    for at in shared_formula_dependents(xml, &edits)? {
        if let Some(cell) = sheet.cell(at) {
            edits.entry(at).or_insert(cell);
        }
    }
    let mut pending: BTreeMap<u32, BTreeMap<u32, &Cell>> = BTreeMap::new();
    for (at, cell) in edits {
        pending.entry(at.row()).or_default().insert(at.col(), cell);
    }
    let dimension = match (sheet.max_row(), sheet.max_column()) {
        (0, _) | (_, 0) => "A1".to_string(),
        (row, col) => format!("A1:{}", RowCol::new(row, col)),
    };

    let mut patch = SheetPatch {
        writer: Writer::new(Vec::new()),
        styles,
        pending,
        row: 0,
        col: 0,
        row_cells: BTreeMap::new(),
    };
    let mut reader = Reader::from_str(xml);
    let mut in_data = false;
    // Depth inside a replaced <c> whose original content is dropped.
    let mut skip = 0usize;
    loop {
        let event = reader.read_event()?;
        if skip > 0 {
            match event {
                Event::Start(_) => skip += 1,
                Event::End(_) => skip -= 1,
                Event::Eof => bail!("Unterminated cell"),
                _ => {}
            }
            continue;
        }
        match event {
            Event::Empty(e) if e.local_name().as_ref() == b"dimension" => {
                patch
                    .writer
                    .write_event(Event::Empty(with_attr(&e, "ref", &dimension)?))?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"sheetData" => {
                in_data = true;
                patch.writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                let end = end_of(&e)?;
                patch.writer.write_event(Event::Start(e))?;
                patch.flush_rows(None)?;
                patch.writer.write_event(Event::End(end))?;
            }
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => {
                in_data = false;
                patch.flush_rows(None)?;
                patch.writer.write_event(Event::End(e))?;
            }
            Event::Start(e) if in_data && e.local_name().as_ref() == b"row" => {
                patch.open_row(&e)?;
                patch.writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) if in_data && e.local_name().as_ref() == b"row" => {
                patch.open_row(&e)?;
                if patch.row_cells.is_empty() {
                    patch.writer.write_event(Event::Empty(e))?;
                } else {
                    let end = end_of(&e)?;
                    patch.writer.write_event(Event::Start(e))?;
                    patch.flush_cells(None)?;
                    patch.writer.write_event(Event::End(end))?;
                }
            }
            Event::End(e) if in_data && e.local_name().as_ref() == b"row" => {
                patch.flush_cells(None)?;
                patch.writer.write_event(Event::End(e))?;
            }
            Event::Start(e) if in_data && e.local_name().as_ref() == b"c" => {
                if patch.replace_cell(&e)? {
                    skip = 1;
                } else {
                    patch.writer.write_event(Event::Start(e))?;
                }
            }
            Event::Empty(e) if in_data && e.local_name().as_ref() == b"c" => {
                if !patch.replace_cell(&e)? {
                    patch.writer.write_event(Event::Empty(e))?;
                }
            }
            Event::Eof => break,
            event => patch.writer.write_event(event)?,
        }
    }
    Ok(String::from_utf8(patch.writer.into_inner())?)
}

/// Cells sharing a formula whose master cell is about to be overwritten. They are written out
/// with their own formula so the group does not lose its master.
fn shared_formula_dependents(xml: &str, edits: &BTreeMap<RowCol, &Cell>) -> Result<Vec<RowCol>> {
    let mut reader = Reader::from_str(xml);
    let mut cell: Option<RowCol> = None;
    let mut groups: HashMap<String, Vec<RowCol>> = HashMap::new();
    let mut broken = BTreeSet::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                cell = attr(&e, b"r")?.and_then(|r| r.parse().ok());
            }
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"f" => {
                let Some(at) = cell else { continue };
                if attr(&e, b"t")?.as_deref() != Some("shared") {
                    continue;
                }
                let Some(group) = attr(&e, b"si")? else {
                    continue;
                };
                if attr(&e, b"ref")?.is_some() && edits.contains_key(&at) {
                    broken.insert(group.clone());
                }
                groups.entry(group).or_default().push(at);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(broken
        .iter()
        .filter_map(|group| groups.get(group))
        .flatten()
        .filter(|at| !edits.contains_key(at))
        .copied()
        .collect())
}

/// Streaming state while a worksheet is rewritten.
struct SheetPatch<'a> {
    writer: Writer<Vec<u8>>,
    styles: &'a mut Styles,
    /// Cells still to write, by row and column.
    pending: BTreeMap<u32, BTreeMap<u32, &'a Cell>>,
    row: u32,
    col: u32,
    /// Cells still to write in the current row.
    row_cells: BTreeMap<u32, &'a Cell>,
}

impl<'a> SheetPatch<'a> {
    /// Writes the pending rows before this one and takes this row's pending cells.
    fn open_row(&mut self, e: &BytesStart) -> Result<()> {
        let row = attr(e, b"r")?
            .and_then(|r| r.parse().ok())
            .unwrap_or(self.row + 1);
        self.flush_rows(Some(row))?;
        self.row = row;
        self.col = 0;
        self.row_cells = self.pending.remove(&row).unwrap_or_default();
        Ok(())
    }

    /// Writes the pending cells before this one. Returns true when this cell was replaced by a
    /// pending one and its original content must be dropped.
    fn replace_cell(&mut self, e: &BytesStart) -> Result<bool> {
        let col = attr(e, b"r")?
            .and_then(|r| r.parse::<RowCol>().ok())
            .map(|at| at.col())
            .unwrap_or(self.col + 1);
        self.col = col;
        self.flush_cells(Some(col))?;
        let Some(cell) = self.row_cells.remove(&col) else {
            return Ok(false);
        };
        let base = attr(e, b"s")?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        self.write_cell(RowCol::new(self.row, col), cell, base)?;
        Ok(true)
    }

    /// Writes whole pending rows numbered below `before`, or all of them.
    fn flush_rows(&mut self, before: Option<u32>) -> Result<()> {
        let rows = match before {
            Some(row) => {
                let later = self.pending.split_off(&row);
                std::mem::replace(&mut self.pending, later)
            }
            None => std::mem::take(&mut self.pending),
        };
        for (row, cells) in rows {
            let mut start = BytesStart::new("row");
            start.push_attribute(("r", row.to_string().as_str()));
            self.writer.write_event(Event::Start(start))?;
            for (col, cell) in cells {
                self.write_cell(RowCol::new(row, col), cell, 0)?;
            }
            self.writer.write_event(Event::End(BytesEnd::new("row")))?;
        }
        Ok(())
    }

    /// Writes pending cells of the current row with columns below `before`, or all of them.
    fn flush_cells(&mut self, before: Option<u32>) -> Result<()> {
        let cells = match before {
            Some(col) => {
                let later = self.row_cells.split_off(&col);
                std::mem::replace(&mut self.row_cells, later)
            }
            None => std::mem::take(&mut self.row_cells),
        };
        for (col, cell) in cells {
            self.write_cell(RowCol::new(self.row, col), cell, 0)?;
        }
        Ok(())
    }

    /// Writes one `<c>`. Text is written inline so the shared string table is left alone;
    /// formulas carry no cached value and are evaluated when the workbook is opened.
    fn write_cell(&mut self, at: RowCol, cell: &Cell, base: u32) -> Result<()> {
        let value = cell.value();
        let format = cell
            .format()
            .or(matches!(value, CellValue::Date(_)).then_some(DATE_FORMAT));
        let style = match format {
            Some(code) => self.styles.with_format(base, code)?,
            None => base,
        };

        let mut start = BytesStart::new("c");
        start.push_attribute(("r", at.to_a1().as_str()));
        if style != 0 {
            start.push_attribute(("s", style.to_string().as_str()));
        }
        match value {
            CellValue::Empty => self.writer.write_event(Event::Empty(start))?,
            CellValue::Text(text) => {
                start.push_attribute(("t", "inlineStr"));
                self.writer.write_event(Event::Start(start))?;
                self.writer.write_event(Event::Start(BytesStart::new("is")))?;
                let mut t = BytesStart::new("t");
                t.push_attribute(("xml:space", "preserve"));
                self.element(t, text)?;
                self.writer.write_event(Event::End(BytesEnd::new("is")))?;
                self.writer.write_event(Event::End(BytesEnd::new("c")))?;
            }
            CellValue::Number(n) => self.cell_with(start, "v", &n.normalize().to_string())?,
            CellValue::Date(d) => self.cell_with(start, "v", &date_serial(*d).to_string())?,
            CellValue::Formula(f) => self.cell_with(start, "f", f.trim_start_matches('='))?,
        }
        Ok(())
    }

    /// `<c ...><child>text</child></c>`
    fn cell_with(&mut self, start: BytesStart, child: &str, text: &str) -> Result<()> {
        self.writer.write_event(Event::Start(start))?;
        self.element(BytesStart::new(child), text)?;
        self.writer.write_event(Event::End(BytesEnd::new("c")))?;
        Ok(())
    }

    fn element(&mut self, start: BytesStart, text: &str) -> Result<()> {
        let end = end_of(&start)?;
        self.writer.write_event(Event::Start(start))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.writer.write_event(Event::End(end))?;
        Ok(())
    }
}

/// Days since 1899-12-30, the serial a spreadsheet stores for a date.
fn date_serial(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - SERIAL_EPOCH
}

/// Sets `fullCalcOnLoad` on `<calcPr>`, adding the element when the workbook has none, so
/// formulas written without a cached value are evaluated when the file is opened.
fn full_calc_on_load(xml: &str) -> Result<String> {
    let calc_pr = || {
        let mut e = BytesStart::new("calcPr");
        e.push_attribute(("fullCalcOnLoad", "1"));
        Event::Empty(e)
    };
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut done = false;
    loop {
        match reader.read_event()? {
            Event::Empty(e) if e.local_name().as_ref() == b"calcPr" => {
                done = true;
                writer.write_event(Event::Empty(with_attr(&e, "fullCalcOnLoad", "1")?))?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"calcPr" => {
                done = true;
                writer.write_event(Event::Start(with_attr(&e, "fullCalcOnLoad", "1")?))?;
            }
            Event::Start(e) if !done && follows_calc_pr(&e) => {
                done = true;
                writer.write_event(calc_pr())?;
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) if !done && follows_calc_pr(&e) => {
                done = true;
                writer.write_event(calc_pr())?;
                writer.write_event(Event::Empty(e))?;
            }
            Event::End(e) if !done && e.local_name().as_ref() == b"workbook" => {
                done = true;
                writer.write_event(calc_pr())?;
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            event => writer.write_event(event)?,
        }
    }
    Ok(String::from_utf8(writer.into_inner())?)
}

fn follows_calc_pr(e: &BytesStart) -> bool {
    let name = e.local_name();
    AFTER_CALC_PR.iter().any(|n| *n == name.as_ref())
}

/// Removes the calculation chain, its relationship and its content type. It lists formula
/// cells and goes stale when cells are rewritten.
fn drop_calc_chain(parts: &mut Vec<Part>) -> Result<()> {
    if !parts.iter().any(|p| p.name == CALC_CHAIN) {
        return Ok(());
    }
    parts.retain(|p| p.name != CALC_CHAIN);

    let rels = drop_elements(&part_text(parts, WORKBOOK_RELS)?, b"Relationship", |e| {
        Ok(attr(e, b"Target")?.is_some_and(|t| t.ends_with("calcChain.xml")))
    })?;
    set_part(parts, WORKBOOK_RELS, rels.into_bytes());

    let types = drop_elements(&part_text(parts, CONTENT_TYPES)?, b"Override", |e| {
        Ok(attr(e, b"PartName")?.as_deref() == Some("/xl/calcChain.xml"))
    })?;
    set_part(parts, CONTENT_TYPES, types.into_bytes());
    debug!("Dropped the calculation chain");
    Ok(())
}

/// `xml` without the empty elements named `name` that `matches` selects.
fn drop_elements<F>(xml: &str, name: &[u8], matches: F) -> Result<String>
where
    F: Fn(&BytesStart) -> Result<bool>,
{
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    loop {
        match reader.read_event()? {
            Event::Empty(e) if e.local_name().as_ref() == name => {
                if !matches(&e)? {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::Eof => break,
            event => writer.write_event(event)?,
        }
    }
    String::from_utf8(writer.into_inner()).map_err(|e| anyhow!("Invalid UTF-8 in package: {e}"))
}
