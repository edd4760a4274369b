//! Streaming resources
//!
//! [`WorkbookSink`] wraps the export workbook: worksheets are created in
//! constant-memory mode so only the current row window is held, and each
//! sheet keeps its own append cursor. [`SourceWorkbook`] wraps the import
//! workbook: `.xlsx` sheets are streamed cell by cell and assembled into a
//! bounded row window, `.xls` sheets (and `.xlsx` sheets read for formula
//! text) are loaded as ranges.

use crate::config::ExcelSettings;
use crate::convert::{serial_to_date, serial_to_datetime};
use crate::error::{ExcelError, ExcelResult};
use crate::types::{CellValue, ExcelType};
use calamine::{Data, DataRef, Reader, Xls, XlsError, Xlsx, XlsxError};
use chrono::{NaiveDate, NaiveDateTime};
use rust_xlsxwriter::{Workbook, Worksheet};
use std::collections::VecDeque;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;
use tracing::{debug, trace};

//==============================================================================
// Export
//==============================================================================

#[derive(Debug)]
struct SheetCursor {
    name: String,
    /// Position in the workbook's worksheet list
    index: usize,
    next_row: u32,
}

/// Export workbook with a per-sheet row cursor
pub struct WorkbookSink {
    workbook: Workbook,
    window_size: usize,
    sheets: Vec<SheetCursor>,
    worksheets: usize,
    current: Option<usize>,
    rows_written: u64,
}

impl WorkbookSink {
    pub fn new(settings: &ExcelSettings) -> ExcelResult<Self> {
        let mut workbook = Workbook::new();
        if let Some(dir) = &settings.temp_dir {
            workbook
                .set_tempdir(dir)
                .map_err(|e| ExcelError::resource("Failed to use export temp dir", e))?;
        }
        Ok(Self {
            workbook,
            window_size: settings.window_size,
            sheets: Vec::new(),
            worksheets: 0,
            current: None,
            rows_written: 0,
        })
    }

    /// Make `name` the current sheet, creating it if needed.
    ///
    /// Returns `true` when the sheet was just created.
    pub fn select(&mut self, name: &str) -> ExcelResult<bool> {
        if let Some(pos) = self.sheets.iter().position(|s| s.name == name) {
            self.current = Some(pos);
            return Ok(false);
        }

        let sheet = if self.window_size > 0 {
            self.workbook.add_worksheet_with_constant_memory()
        } else {
            self.workbook.add_worksheet()
        };
        sheet
            .set_name(name)
            .map_err(|e| ExcelError::resource(&format!("Failed to create sheet '{}'", name), e))?;

        self.sheets.push(SheetCursor {
            name: name.to_string(),
            index: self.worksheets,
            next_row: 0,
        });
        self.worksheets += 1;
        self.current = Some(self.sheets.len() - 1);
        debug!(sheet = name, constant_memory = self.window_size > 0, "sheet created");
        Ok(true)
    }

    /// Add a worksheet outside the cursor bookkeeping (template marker)
    pub fn add_auxiliary(&mut self, name: &str) -> ExcelResult<&mut Worksheet> {
        self.worksheets += 1;
        let sheet = self.workbook.add_worksheet();
        sheet
            .set_name(name)
            .map_err(|e| ExcelError::resource(&format!("Failed to create sheet '{}'", name), e))?;
        Ok(sheet)
    }

    /// Any data sheet created yet
    pub fn has_sheets(&self) -> bool {
        !self.sheets.is_empty()
    }

    fn cursor(&self) -> ExcelResult<&SheetCursor> {
        self.current
            .and_then(|pos| self.sheets.get(pos))
            .ok_or_else(|| ExcelError::Resource("no sheet selected for writing".to_string()))
    }

    pub fn sheet_name(&self) -> ExcelResult<&str> {
        Ok(self.cursor()?.name.as_str())
    }

    /// The current worksheet
    pub fn sheet(&mut self) -> ExcelResult<&mut Worksheet> {
        let index = self.cursor()?.index;
        self.workbook
            .worksheet_from_index(index)
            .map_err(|e| ExcelError::resource("Failed to access worksheet", e))
    }

    /// Next free row of the current sheet
    pub fn next_row(&self) -> ExcelResult<u32> {
        Ok(self.cursor()?.next_row)
    }

    /// Reserve the next row of the current sheet
    pub fn claim_row(&mut self) -> ExcelResult<u32> {
        let pos = self
            .current
            .ok_or_else(|| ExcelError::Resource("no sheet selected for writing".to_string()))?;
        let cursor = &mut self.sheets[pos];
        let row = cursor.next_row;
        cursor.next_row += 1;

        self.rows_written += 1;
        if self.window_size > 0 && self.rows_written % self.window_size as u64 == 0 {
            trace!(
                sheet = %cursor.name,
                rows = self.rows_written,
                window = self.window_size,
                "row window flushed"
            );
        }
        Ok(row)
    }

    /// Move the cursor past `last_row`, never backwards
    pub fn skip_to(&mut self, last_row: u32) -> ExcelResult<()> {
        let pos = self
            .current
            .ok_or_else(|| ExcelError::Resource("no sheet selected for writing".to_string()))?;
        let cursor = &mut self.sheets[pos];
        cursor.next_row = cursor.next_row.max(last_row + 1);
        Ok(())
    }

    pub fn workbook_mut(&mut self) -> &mut Workbook {
        &mut self.workbook
    }

    pub fn save_to_path(&mut self, path: &Path) -> ExcelResult<()> {
        self.workbook
            .save(path)
            .map_err(|e| ExcelError::resource("Excel cache data flush failure", e))
    }

    pub fn save_to_buffer(&mut self) -> ExcelResult<Vec<u8>> {
        self.workbook
            .save_to_buffer()
            .map_err(|e| ExcelError::resource("Excel cache data flush failure", e))
    }

    pub fn save_to_writer<W: Write + Seek + Send>(&mut self, writer: W) -> ExcelResult<()> {
        self.workbook
            .save_to_writer(writer)
            .map_err(|e| ExcelError::resource("Excel cache data flush failure", e))
    }
}

//==============================================================================
// Import
//==============================================================================

/// Any seekable byte source a workbook can be opened from
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

type Source = BufReader<Box<dyn ReadSeek>>;

/// One decoded source cell
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RawCell {
    #[default]
    Empty,
    Value(CellValue),
    /// Formula text with the value Excel cached for it
    Formula { formula: String, cached: CellValue },
    /// Error value such as `#DIV/0!`
    Error(String),
}

impl RawCell {
    pub fn is_blank(&self) -> bool {
        match self {
            RawCell::Empty => true,
            RawCell::Value(v) => v.is_blank(),
            _ => false,
        }
    }
}

/// A source row, cells indexed by absolute column
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub index: u32,
    cells: Vec<RawCell>,
}

static EMPTY_CELL: RawCell = RawCell::Empty;

impl SheetRow {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            cells: Vec::new(),
        }
    }

    pub fn put(&mut self, col: u16, cell: RawCell) {
        let col = col as usize;
        if self.cells.len() <= col {
            self.cells.resize(col + 1, RawCell::Empty);
        }
        self.cells[col] = cell;
    }

    /// Cell at `col`, `Empty` past the last one
    pub fn get(&self, col: u16) -> &RawCell {
        self.cells.get(col as usize).unwrap_or(&EMPTY_CELL)
    }

    /// Width up to the last non-empty cell
    pub fn len(&self) -> u16 {
        self.cells
            .iter()
            .rposition(|c| !matches!(c, RawCell::Empty))
            .map(|i| i as u16 + 1)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded queue of assembled rows between the decoder and the codec
struct RowWindow {
    rows: VecDeque<SheetRow>,
    capacity: usize,
    stopped: bool,
}

impl RowWindow {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rows: VecDeque::with_capacity(capacity),
            capacity,
            stopped: false,
        }
    }

    /// Queue a row, handing the oldest ones over once the window is full.
    /// Returns `false` once the consumer asked to stop.
    fn push<F>(&mut self, row: SheetRow, consume: &mut F) -> ExcelResult<bool>
    where
        F: FnMut(SheetRow) -> ExcelResult<bool>,
    {
        self.rows.push_back(row);
        if self.rows.len() < self.capacity {
            return Ok(true);
        }
        trace!(rows = self.rows.len(), "row window full");
        self.drain(consume)
    }

    fn drain<F>(&mut self, consume: &mut F) -> ExcelResult<bool>
    where
        F: FnMut(SheetRow) -> ExcelResult<bool>,
    {
        while let Some(row) = self.rows.pop_front() {
            if !consume(row)? {
                self.rows.clear();
                self.stopped = true;
                return Ok(false);
            }
        }
        Ok(!self.stopped)
    }
}

/// Import workbook
pub enum SourceWorkbook {
    Xlsx(Xlsx<Source>),
    Xls(Xls<Source>),
}

impl std::fmt::Debug for SourceWorkbook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceWorkbook::Xlsx(_) => f.write_str("SourceWorkbook::Xlsx"),
            SourceWorkbook::Xls(_) => f.write_str("SourceWorkbook::Xls"),
        }
    }
}

impl SourceWorkbook {
    /// Open a source with a decode buffer of `buffer_size` bytes.
    ///
    /// A byte stream that is not a container of the declared kind is a
    /// template mismatch; any other failure is a resource error.
    pub fn open(reader: Box<dyn ReadSeek>, excel_type: ExcelType, buffer_size: usize) -> ExcelResult<Self> {
        let buffered = BufReader::with_capacity(buffer_size.max(1), reader);
        let workbook = match excel_type {
            ExcelType::Xlsx => Xlsx::new(buffered).map(SourceWorkbook::Xlsx).map_err(|e| match e {
                XlsxError::Zip(z) => ExcelError::TemplateMismatch(format!("not an xlsx container: {}", z)),
                other => ExcelError::resource("Failed to open xlsx source", other),
            })?,
            ExcelType::Xls => Xls::new(buffered).map(SourceWorkbook::Xls).map_err(|e| match e {
                XlsError::Cfb(c) => ExcelError::TemplateMismatch(format!("not an xls container: {}", c)),
                other => ExcelError::resource("Failed to open xls source", other),
            })?,
        };
        debug!(kind = excel_type.extension(), buffer_size, "source workbook opened");
        Ok(workbook)
    }

    pub fn excel_type(&self) -> ExcelType {
        match self {
            SourceWorkbook::Xlsx(_) => ExcelType::Xlsx,
            SourceWorkbook::Xls(_) => ExcelType::Xls,
        }
    }

    pub fn sheet_names(&self) -> Vec<String> {
        match self {
            SourceWorkbook::Xlsx(wb) => wb.sheet_names(),
            SourceWorkbook::Xls(wb) => wb.sheet_names(),
        }
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.sheet_names().iter().any(|s| s == name)
    }

    fn require_sheet(&self, name: &str) -> ExcelResult<()> {
        if self.has_sheet(name) {
            Ok(())
        } else {
            Err(ExcelError::SheetNotFound(name.to_string()))
        }
    }

    /// Whole value range of a sheet
    pub fn range(&mut self, name: &str) -> ExcelResult<calamine::Range<Data>> {
        self.require_sheet(name)?;
        match self {
            SourceWorkbook::Xlsx(wb) => wb
                .worksheet_range(name)
                .map_err(|e| ExcelError::resource("Failed to read worksheet", e)),
            SourceWorkbook::Xls(wb) => wb
                .worksheet_range(name)
                .map_err(|e| ExcelError::resource("Failed to read worksheet", e)),
        }
    }

    fn formulas(&mut self, name: &str) -> ExcelResult<calamine::Range<String>> {
        match self {
            SourceWorkbook::Xlsx(wb) => wb
                .worksheet_formula(name)
                .map_err(|e| ExcelError::resource("Failed to read worksheet formulas", e)),
            SourceWorkbook::Xls(wb) => wb
                .worksheet_formula(name)
                .map_err(|e| ExcelError::resource("Failed to read worksheet formulas", e)),
        }
    }

    /// Feed the non-empty rows of `sheet` to `consume`, top to bottom, until
    /// it returns `false`.
    ///
    /// With `with_formulas`, formula cells carry their formula text; that
    /// needs the buffered path.
    pub fn for_each_row<F>(
        &mut self,
        sheet: &str,
        cache_rows: usize,
        with_formulas: bool,
        mut consume: F,
    ) -> ExcelResult<()>
    where
        F: FnMut(SheetRow) -> ExcelResult<bool>,
    {
        self.require_sheet(sheet)?;
        let mut window = RowWindow::new(cache_rows);

        if let (SourceWorkbook::Xlsx(wb), false) = (&mut *self, with_formulas) {
            debug!(sheet, cache_rows, "streaming sheet");
            let mut cells = wb
                .worksheet_cells_reader(sheet)
                .map_err(|e| ExcelError::resource("Failed to stream worksheet", e))?;
            let mut pending: Option<SheetRow> = None;

            while let Some(cell) = cells
                .next_cell()
                .map_err(|e| ExcelError::resource("Failed to decode worksheet cell", e))?
            {
                let (row, col) = cell.get_position();
                let raw = decode_ref(cell.get_value());
                if pending.as_ref().map(|r| r.index) != Some(row) {
                    if let Some(done) = pending.take() {
                        if !done.is_empty() && !window.push(done, &mut consume)? {
                            return Ok(());
                        }
                    }
                    pending = Some(SheetRow::new(row));
                }
                if let Some(current) = pending.as_mut() {
                    current.put(col as u16, raw);
                }
            }
            if let Some(done) = pending {
                if !done.is_empty() && !window.push(done, &mut consume)? {
                    return Ok(());
                }
            }
            window.drain(&mut consume)?;
            return Ok(());
        }

        debug!(sheet, with_formulas, "loading sheet range");
        let range = self.range(sheet)?;
        let formulas = if with_formulas {
            Some(self.formulas(sheet)?)
        } else {
            None
        };
        let Some((start_row, start_col)) = range.start() else {
            return Ok(());
        };

        for (offset, cells) in range.rows().enumerate() {
            let index = start_row + offset as u32;
            let mut row = SheetRow::new(index);
            for (j, data) in cells.iter().enumerate() {
                let col = start_col + j as u32;
                let formula = formulas
                    .as_ref()
                    .and_then(|f| f.get_value((index, col)))
                    .filter(|text| !text.is_empty());
                let raw = match formula {
                    Some(text) => RawCell::Formula {
                        formula: text.clone(),
                        cached: match decode_data(data) {
                            RawCell::Value(v) => v,
                            _ => CellValue::Null,
                        },
                    },
                    None => decode_data(data),
                };
                row.put(col as u16, raw);
            }
            if !row.is_empty() && !window.push(row, &mut consume)? {
                return Ok(());
            }
        }
        window.drain(&mut consume)?;
        Ok(())
    }
}

//==============================================================================
// Cell decoding
//==============================================================================

fn decode_serial(serial: f64, duration: bool) -> CellValue {
    if duration {
        return CellValue::Float(serial);
    }
    if serial.fract() == 0.0 {
        if let Some(date) = serial_to_date(serial) {
            return CellValue::Date(date);
        }
    } else if let Some(dt) = serial_to_datetime(serial) {
        return CellValue::DateTime(dt);
    }
    CellValue::Float(serial)
}

fn decode_iso(text: &str) -> CellValue {
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return CellValue::DateTime(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return CellValue::Date(date);
    }
    CellValue::Text(text.to_string())
}

fn decode_data(data: &Data) -> RawCell {
    let value = match data {
        Data::Empty => return RawCell::Empty,
        Data::Error(e) => return RawCell::Error(e.to_string()),
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => decode_serial(dt.as_f64(), dt.is_duration()),
        Data::DateTimeIso(s) => decode_iso(s),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    };
    RawCell::Value(value)
}

fn decode_ref(data: &DataRef<'_>) -> RawCell {
    let value = match data {
        DataRef::Empty => return RawCell::Empty,
        DataRef::Error(e) => return RawCell::Error(e.to_string()),
        DataRef::Int(i) => CellValue::Int(*i),
        DataRef::Float(f) => CellValue::Float(*f),
        DataRef::String(s) => CellValue::Text(s.clone()),
        DataRef::SharedString(s) => CellValue::Text(s.to_string()),
        DataRef::Bool(b) => CellValue::Bool(*b),
        DataRef::DateTime(dt) => decode_serial(dt.as_f64(), dt.is_duration()),
        DataRef::DateTimeIso(s) => decode_iso(s),
        DataRef::DurationIso(s) => CellValue::Text(s.clone()),
    };
    RawCell::Value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(index: u32, values: &[i64]) -> SheetRow {
        let mut row = SheetRow::new(index);
        for (col, v) in values.iter().enumerate() {
            row.put(col as u16, RawCell::Value(CellValue::Int(*v)));
        }
        row
    }

    #[test]
    fn test_sheet_row_pads_and_measures() {
        let mut r = SheetRow::new(3);
        r.put(2, RawCell::Value(CellValue::Text("x".into())));
        assert_eq!(r.len(), 3);
        assert_eq!(r.get(0), &RawCell::Empty);
        assert_eq!(r.get(9), &RawCell::Empty);
        assert!(!r.is_empty());
        assert!(SheetRow::new(0).is_empty());
    }

    #[test]
    fn test_window_delivers_in_order_and_stops() {
        let mut window = RowWindow::new(2);
        let mut seen = Vec::new();
        let mut consume = |r: SheetRow| -> ExcelResult<bool> {
            seen.push(r.index);
            Ok(r.index < 3)
        };
        for i in 0..6 {
            if !window.push(row(i, &[i as i64]), &mut consume).unwrap() {
                break;
            }
        }
        window.drain(&mut consume).unwrap();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_window_propagates_errors() {
        let mut window = RowWindow::new(1);
        let mut consume = |_r: SheetRow| -> ExcelResult<bool> { Err(ExcelError::Resource("boom".into())) };
        assert!(window.push(row(0, &[1]), &mut consume).is_err());
    }

    #[test]
    fn test_decode_serials() {
        assert_eq!(
            decode_serial(45658.0, false),
            CellValue::Date(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
        );
        assert_eq!(decode_serial(1.5, true), CellValue::Float(1.5));
        assert!(matches!(decode_serial(45658.25, false), CellValue::DateTime(_)));
        assert_eq!(decode_serial(-3.0, false), CellValue::Float(-3.0));
    }

    #[test]
    fn test_decode_data_kinds() {
        assert_eq!(decode_data(&Data::Empty), RawCell::Empty);
        assert_eq!(
            decode_data(&Data::String("a".into())),
            RawCell::Value(CellValue::Text("a".into()))
        );
        assert_eq!(decode_data(&Data::Bool(true)), RawCell::Value(CellValue::Bool(true)));
        assert!(matches!(
            decode_data(&Data::Error(calamine::CellErrorType::Div0)),
            RawCell::Error(_)
        ));
        assert_eq!(
            decode_iso("2024-02-03"),
            CellValue::Date(NaiveDate::from_ymd_opt(2024, 2, 3).unwrap())
        );
    }

    #[test]
    fn test_garbage_bytes_are_template_mismatch() {
        let bytes = std::io::Cursor::new(b"definitely not a workbook".to_vec());
        let err = SourceWorkbook::open(Box::new(bytes), ExcelType::Xlsx, 2048).unwrap_err();
        assert!(matches!(err, ExcelError::TemplateMismatch(_)), "{:?}", err);
    }
}
