//! Import of untyped rows
//!
//! [`RowReader`] returns the body of a sheet as `Vec<CellValue>` rows laid
//! out by the header: cell `k` of a row is the value under the `k`-th header
//! cell that is not ignored. Without a header row the cells keep their
//! source columns.

use super::executor::{cell_value, header_labels, other_row, sorted_source_col};
use super::formula::FormulaReader;
use crate::binding;
use crate::config::ExcelSettings;
use crate::context::ReadInfo;
use crate::error::{ExcelError, ExcelResult};
use crate::listener::{self, CellEvent, ListenerRegistry, ReadChain, ReadListener, RowEvent};
use crate::schema::{untyped_columns, Column, ColumnSchema, RowRef, ROW_RECORD};
use crate::stream::{ReadSeek, SheetRow, SourceWorkbook};
use crate::types::{CellValue, ExcelType, ExecMode, RowType, WrMode};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

pub struct RowReader {
    source: Option<SourceWorkbook>,
    listeners: ReadChain,
    formula_reader: Option<Box<dyn FormulaReader>>,
    settings: ExcelSettings,
    excel_type: ExcelType,
    ignores: Vec<String>,
    /// Expected template key, `None` when checking is off
    check_key: Option<String>,
    read_other: bool,
    released: bool,
}

impl RowReader {
    /// Reader over a file, the container kind taken from its extension
    pub fn open<P: AsRef<Path>>(path: P) -> ExcelResult<Self> {
        Self::open_with(path, ExcelSettings::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, settings: ExcelSettings) -> ExcelResult<Self> {
        let path = path.as_ref();
        let declared = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(ExcelType::from_file_name)
            .unwrap_or(ExcelType::Xlsx);
        let file = File::open(path)
            .map_err(|e| ExcelError::resource(&format!("Failed to open {}", path.display()), e))?;
        Self::from_reader(file, declared, settings, &listener::global())
    }

    pub fn from_reader<S: ReadSeek + 'static>(
        source: S,
        excel_type: ExcelType,
        settings: ExcelSettings,
        registry: &ListenerRegistry,
    ) -> ExcelResult<Self> {
        settings.validate()?;
        let excel_type = registry.excel_type(ROW_RECORD, ExecMode::Read).unwrap_or(excel_type);
        let workbook = SourceWorkbook::open(Box::new(source), excel_type, settings.buffer_size)?;
        let mut listeners = ReadChain::default();
        for l in registry.read_listeners(ROW_RECORD) {
            listeners.push(l);
        }
        let mut reader = Self {
            source: Some(workbook),
            listeners,
            formula_reader: None,
            settings,
            excel_type,
            ignores: Vec::new(),
            check_key: None,
            read_other: false,
            released: false,
        };
        reader.announce();
        debug!(kind = excel_type.extension(), "row reader ready");
        Ok(reader)
    }

    fn info(&self) -> ReadInfo {
        ReadInfo {
            record: ROW_RECORD,
            columns: Vec::new(),
            depth: 0,
            mode: WrMode::Sort,
            excel_type: self.excel_type,
            unique_key: self.check_key.clone(),
            read_other: self.read_other,
        }
    }

    fn announce(&mut self) {
        let info = self.info();
        self.listeners.register_all(&info);
    }

    /// Header labels whose columns are left out of every row
    pub fn ignores(mut self, labels: &[&str]) -> Self {
        self.ignores = labels.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn listener(mut self, listener: impl ReadListener + 'static) -> Self {
        let mut boxed: Box<dyn ReadListener> = Box::new(listener);
        boxed.on_register(&self.info());
        self.listeners.push(boxed);
        self
    }

    /// Verify against `key` before each read; an empty key fails the read
    pub fn check_with(mut self, key: &str) -> Self {
        self.check_key = Some(key.to_string());
        self.announce();
        self
    }

    /// Route rows above the header to the listeners
    pub fn read_other(mut self, enable: bool) -> Self {
        self.read_other = enable;
        self.announce();
        self
    }

    /// Resolve formula cells; switches the read to the buffered path
    pub fn formula_reader(mut self, reader: impl FormulaReader + 'static) -> Self {
        self.formula_reader = Some(Box::new(reader));
        self
    }

    pub fn sheet_names(&self) -> ExcelResult<Vec<String>> {
        self.source
            .as_ref()
            .map(SourceWorkbook::sheet_names)
            .ok_or_else(|| ExcelError::Resource("the workbook has already been released".to_string()))
    }

    /// Rows of the default sheet, header on the first row
    pub fn read(&mut self) -> ExcelResult<Vec<Vec<CellValue>>> {
        let sheet = self.settings.default_sheet.clone();
        self.read_rows(0, &sheet)
    }

    /// Body rows of `sheet` below the header at `header_index`.
    ///
    /// The source is kept for further sheets; any failure releases it.
    pub fn read_rows(&mut self, header_index: u32, sheet: &str) -> ExcelResult<Vec<Vec<CellValue>>> {
        if self.released {
            return Err(ExcelError::Resource(
                "the workbook has already been released".to_string(),
            ));
        }
        let mut source = self
            .source
            .take()
            .ok_or_else(|| ExcelError::Resource("the workbook has already been released".to_string()))?;

        let result = self.decode(&mut source, header_index, sheet);
        match result {
            Ok(rows) => {
                self.source = Some(source);
                Ok(rows)
            }
            Err(e) => {
                drop(source);
                self.close_source();
                Err(e)
            }
        }
    }

    fn decode(&mut self, source: &mut SourceWorkbook, header_index: u32, sheet: &str) -> ExcelResult<Vec<Vec<CellValue>>> {
        if let Some(key) = &self.check_key {
            if key.is_empty() {
                return Err(ExcelError::Resource(
                    "template check needs a non-empty key".to_string(),
                ));
            }
            binding::verify(source, key)?;
        }

        self.listeners.read_before();
        let with_formulas = self.formula_reader.is_some();
        let mut decoder = RowDecoder {
            listeners: &mut self.listeners,
            formulas: &mut self.formula_reader,
            ignores: &self.ignores,
            read_other: self.read_other,
            header_index,
            headers: Vec::new(),
            columns: Vec::new(),
            rows: Vec::new(),
        };
        source.for_each_row(sheet, self.settings.cache_rows, with_formulas, |row| decoder.row(row))?;
        let rows = decoder.rows;
        self.listeners.read_finish();
        info!(sheet, rows = rows.len(), "rows read");
        Ok(rows)
    }

    fn close_source(&mut self) {
        if self.source.take().is_some() {
            debug!("row workbook released");
        }
        self.released = true;
    }

    /// Release the source workbook
    pub fn close(mut self) {
        self.close_source();
    }
}

impl std::fmt::Debug for RowReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowReader")
            .field("listeners", &self.listeners.len())
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

struct RowDecoder<'a> {
    listeners: &'a mut ReadChain,
    formulas: &'a mut Option<Box<dyn FormulaReader>>,
    ignores: &'a [String],
    read_other: bool,
    header_index: u32,
    /// Observed header labels by source column
    headers: Vec<String>,
    /// One column per kept header cell, for the row views
    columns: Vec<ColumnSchema>,
    rows: Vec<Vec<CellValue>>,
}

impl RowDecoder<'_> {
    fn row(&mut self, row: SheetRow) -> ExcelResult<bool> {
        if row.index < self.header_index {
            if !self.read_other {
                return Ok(true);
            }
            other_row(self.listeners, self.formulas, &row)
        } else if row.index == self.header_index {
            self.header(&row)
        } else {
            self.body(&row)
        }
    }

    fn header(&mut self, row: &SheetRow) -> ExcelResult<bool> {
        self.headers = header_labels(self.listeners, self.formulas, self.ignores, 0, row)?;
        let kept = self
            .headers
            .iter()
            .filter(|label| label.as_str() != super::IGNORED_HEADER)
            .map(|label| Column::new([label.as_str()]))
            .collect();
        self.columns = untyped_columns(kept)?.0;
        let event = RowEvent {
            row: row.index,
            row_type: RowType::Head,
            index: 0,
            header: None,
        };
        Ok(self.listeners.read_row(&event, None))
    }

    fn body(&mut self, row: &SheetRow) -> ExcelResult<bool> {
        let index = self.rows.len();
        let sources: Vec<u16> = if self.headers.is_empty() {
            (0..row.len()).collect()
        } else {
            (0..self.columns.len()).map(|k| sorted_source_col(&self.headers, k)).collect()
        };

        let mut cells = Vec::with_capacity(sources.len());
        for (k, col) in sources.into_iter().enumerate() {
            let value = cell_value(row.get(col), row.index, col, self.formulas)?;
            let cell = CellEvent {
                row: row.index,
                col,
                row_type: RowType::Body,
                index,
                column: self.columns.get(k),
            };
            cells.push(self.listeners.read_cell(value, &cell));
        }

        let event = RowEvent {
            row: row.index,
            row_type: RowType::Body,
            index,
            header: None,
        };
        let go_on = self
            .listeners
            .read_row(&event, Some(&RowRef::new(&cells, &self.columns)));
        self.rows.push(cells);
        if !go_on {
            debug!(row = row.index, "reading stopped by row listener");
        }
        Ok(go_on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_garbage_is_not_a_template() {
        let err = RowReader::from_reader(
            Cursor::new(b"not a workbook".to_vec()),
            ExcelType::Xlsx,
            ExcelSettings::default(),
            &ListenerRegistry::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ExcelError::TemplateMismatch(_)));
    }

    #[test]
    fn test_blank_body_cells_read_as_null() {
        let mut row = SheetRow::new(1);
        row.put(0, crate::stream::RawCell::Value(CellValue::Text("a".into())));
        row.put(2, crate::stream::RawCell::Value(CellValue::Int(3)));

        let mut listeners = ReadChain::default();
        let mut formulas = None;
        let mut decoder = RowDecoder {
            listeners: &mut listeners,
            formulas: &mut formulas,
            ignores: &[],
            read_other: false,
            header_index: 0,
            headers: vec!["A".into(), "B".into(), "C".into()],
            columns: untyped_columns(vec![Column::new(["A"]), Column::new(["B"]), Column::new(["C"])])
                .unwrap()
                .0,
            rows: Vec::new(),
        };
        assert!(decoder.row(row).unwrap());
        assert_eq!(
            decoder.rows,
            vec![vec![CellValue::Text("a".into()), CellValue::Null, CellValue::Int(3)]]
        );
    }
}
