//! Import row decoding
//!
//! Rows above the header index are pre-header rows, the row at the header
//! index is the header and every later row is body. Blank source rows never
//! reach this module, so a missing header row simply means the body starts
//! right after the header index.

use super::formula::FormulaReader;
use crate::binding;
use crate::context::ReadContext;
use crate::convert::coerce;
use crate::error::{ExcelError, ExcelResult};
use crate::expr::Bindings;
use crate::listener::{CellEvent, ReadChain, RowEvent};
use crate::schema::{ColumnSchema, Record, RecordRef};
use crate::stream::{RawCell, SheetRow};
use crate::types::{CellValue, RowType, WrMode};
use tracing::{debug, info};

/// Header label standing in for an ignored column
pub const IGNORED_HEADER: &str = "<ignored>";

/// Value of a non-blank cell, formulas resolved through `formulas`
pub(crate) fn cell_value(
    raw: &RawCell,
    row: u32,
    col: u16,
    formulas: &mut Option<Box<dyn FormulaReader>>,
) -> ExcelResult<CellValue> {
    match raw {
        RawCell::Empty => Ok(CellValue::Null),
        RawCell::Value(v) => Ok(v.clone()),
        RawCell::Formula { formula, cached } => match formulas {
            Some(reader) => reader.read(formula, cached),
            None => Ok(cached.clone()),
        },
        RawCell::Error(code) => Err(ExcelError::UnsupportedCellType {
            row,
            column: col,
            detail: format!("error value {}", code),
        }),
    }
}

/// Hand a pre-header row to the listeners cell by cell
pub(crate) fn other_row(
    listeners: &mut ReadChain,
    formulas: &mut Option<Box<dyn FormulaReader>>,
    row: &SheetRow,
) -> ExcelResult<bool> {
    let index = row.index as usize;
    for col in 0..row.len() {
        let value = cell_value(row.get(col), row.index, col, formulas)?;
        let cell = CellEvent {
            row: row.index,
            col,
            row_type: RowType::Other,
            index,
            column: None,
        };
        listeners.read_cell(value, &cell);
    }
    let event = RowEvent {
        row: row.index,
        row_type: RowType::Other,
        index,
        header: None,
    };
    Ok(listeners.read_row(&event, None))
}

/// Header labels by source column.
///
/// Blank cells keep their place as empty labels; labels in `ignores` become
/// [`IGNORED_HEADER`].
pub(crate) fn header_labels(
    listeners: &mut ReadChain,
    formulas: &mut Option<Box<dyn FormulaReader>>,
    ignores: &[String],
    level: usize,
    row: &SheetRow,
) -> ExcelResult<Vec<String>> {
    let mut labels = Vec::with_capacity(row.len() as usize);
    for col in 0..row.len() {
        let raw = row.get(col);
        if raw.is_blank() {
            labels.push(String::new());
            continue;
        }
        let label = cell_value(raw, row.index, col, formulas)?.as_text();
        let label = if ignores.contains(&label) {
            IGNORED_HEADER.to_string()
        } else {
            label
        };
        let cell = CellEvent {
            row: row.index,
            col,
            row_type: RowType::Head,
            index: level,
            column: None,
        };
        labels.push(listeners.read_cell(CellValue::Text(label), &cell).as_text());
    }
    debug!(row = row.index, labels = labels.len(), "header row read");
    Ok(labels)
}

/// Source column of the `position`-th column in sort mode: the
/// `position`-th header cell that is not ignored, blank cells included.
pub(crate) fn sorted_source_col(headers: &[String], position: usize) -> u16 {
    headers
        .iter()
        .enumerate()
        .filter(|(_, label)| label.as_str() != IGNORED_HEADER)
        .nth(position)
        .map(|(col, _)| col as u16)
        .unwrap_or(position as u16)
}

struct SheetDecoder<'a, R> {
    ctx: &'a mut ReadContext<R>,
    ignores: &'a [String],
    header_index: u32,
    /// Observed header labels by source column
    headers: Vec<String>,
    body_rows: usize,
    dropped: usize,
    collect: bool,
    records: Vec<R>,
}

impl<R: Record> SheetDecoder<'_, R> {
    fn row(&mut self, row: SheetRow) -> ExcelResult<bool> {
        if row.index < self.header_index {
            if !self.ctx.read_other {
                return Ok(true);
            }
            other_row(&mut self.ctx.listeners, &mut self.ctx.formula_reader, &row)
        } else if row.index == self.header_index {
            self.header(&row)
        } else {
            self.body(&row)
        }
    }

    fn header(&mut self, row: &SheetRow) -> ExcelResult<bool> {
        let level = self.ctx.schema.depth().saturating_sub(1);
        self.headers = header_labels(
            &mut self.ctx.listeners,
            &mut self.ctx.formula_reader,
            self.ignores,
            level,
            row,
        )?;
        let event = RowEvent {
            row: row.index,
            row_type: RowType::Head,
            index: level,
            header: None,
        };
        Ok(self.ctx.listeners.read_row(&event, None))
    }

    /// Source column of the schema column at `position`
    fn source_col(&self, position: usize, column: &ColumnSchema) -> u16 {
        match self.ctx.mode {
            WrMode::Index => column.index,
            WrMode::Sort => sorted_source_col(&self.headers, position),
        }
    }

    fn body(&mut self, row: &SheetRow) -> ExcelResult<bool> {
        let index = self.body_rows;
        self.body_rows += 1;
        let mut record = R::default();
        let mut vars = Bindings::new();

        for position in 0..self.ctx.schema.len() {
            let column = &self.ctx.schema.columns()[position];
            let Some(accessor) = self.ctx.schema.accessor(position) else {
                continue;
            };
            let col = self.source_col(position, column);
            let cell = CellEvent {
                row: row.index,
                col,
                row_type: RowType::Body,
                index,
                column: Some(column),
            };

            let raw = row.get(col);
            if raw.is_blank() {
                if column.required {
                    let view = RecordRef::new(&record, self.ctx.schema.fields());
                    if !self.ctx.listeners.read_empty(&cell, &view) {
                        self.dropped += 1;
                        debug!(row = row.index, col, field = column.field, "row dropped on blank required cell");
                        return Ok(true);
                    }
                }
                continue;
            }

            let mut value = cell_value(raw, row.index, col, &mut self.ctx.formula_reader)?;
            if column.trim {
                if let CellValue::Text(s) = &value {
                    value = CellValue::Text(s.trim().to_string());
                }
            }
            vars.insert(column.field.to_string(), value.clone());

            if let Some(assertion) = &column.assertion {
                let verdict = self.ctx.evaluator.evaluate(&assertion.expr, &vars)?;
                if verdict != CellValue::Bool(true) {
                    return Err(ExcelError::Assertion {
                        row: row.index,
                        column: col,
                        field: column.field.to_string(),
                        message: assertion.message.clone(),
                    });
                }
            }
            if let Some(expr) = &column.read_expr {
                value = self.ctx.evaluator.evaluate(expr, &vars)?;
            }
            let value = self.ctx.listeners.read_cell(value, &cell);
            if value.is_null() {
                vars.insert(column.field.to_string(), CellValue::Null);
                continue;
            }

            let source_type = value.type_name();
            let mismatch = || ExcelError::TypeMismatch {
                row: row.index,
                column: col,
                field: column.field.to_string(),
                source_type: source_type.to_string(),
                target_type: column.kind.name().to_string(),
            };
            let coerced = coerce(value, column.kind).ok_or_else(mismatch)?;
            if !accessor.set(&mut record, coerced.clone()) {
                return Err(mismatch());
            }
            vars.insert(column.field.to_string(), coerced);
        }

        let view = RecordRef::new(&record, self.ctx.schema.fields());
        let event = RowEvent {
            row: row.index,
            row_type: RowType::Body,
            index,
            header: None,
        };
        let go_on = self.ctx.listeners.read_row(&event, Some(&view));
        if self.collect {
            self.records.push(record);
        }
        if !go_on {
            debug!(row = row.index, "reading stopped by row listener");
        }
        Ok(go_on)
    }
}

/// Decode `sheet` into records.
///
/// The source workbook is put back once the sheet is done so the same
/// reader can go on with another sheet; any failure releases it.
pub(crate) fn read_sheet<R: Record>(
    ctx: &mut ReadContext<R>,
    ignores: &[String],
    header_index: u32,
    sheet: &str,
    collect: bool,
) -> ExcelResult<Vec<R>> {
    let mut source = ctx
        .source
        .take()
        .ok_or_else(|| ExcelError::Resource("the workbook has already been released".to_string()))?;

    let result = (|| -> ExcelResult<Vec<R>> {
        if let Some(key) = &ctx.check_key {
            if key.is_empty() {
                return Err(ExcelError::Resource(
                    "template check needs a non-empty key".to_string(),
                ));
            }
            binding::verify(&mut source, key)?;
        }

        ctx.listeners.read_before();
        let with_formulas = ctx.formula_reader.is_some();
        let cache_rows = ctx.settings.cache_rows;
        let mut decoder = SheetDecoder {
            ctx: &mut *ctx,
            ignores,
            header_index,
            headers: Vec::new(),
            body_rows: 0,
            dropped: 0,
            collect,
            records: Vec::new(),
        };
        source.for_each_row(sheet, cache_rows, with_formulas, |row| decoder.row(row))?;

        let (body_rows, dropped, records) = (decoder.body_rows, decoder.dropped, decoder.records);
        ctx.listeners.read_finish();
        info!(sheet, body_rows, dropped, "sheet read");
        Ok(records)
    })();

    match result {
        Ok(records) => {
            ctx.source = Some(source);
            Ok(records)
        }
        Err(e) => {
            drop(source);
            ctx.release();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_cells_rejected() {
        let err = cell_value(&RawCell::Error("#DIV/0!".into()), 4, 2, &mut None).unwrap_err();
        match err {
            ExcelError::UnsupportedCellType { row, column, .. } => {
                assert_eq!((row, column), (4, 2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    fn labels(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_blank_header_cells_keep_their_position() {
        // a merged header leaves blanks in the lower row
        let headers = labels(&["Name", "", "Mail"]);
        assert_eq!(sorted_source_col(&headers, 0), 0);
        assert_eq!(sorted_source_col(&headers, 1), 1);
        assert_eq!(sorted_source_col(&headers, 2), 2);
    }

    #[test]
    fn test_ignored_header_cells_are_skipped() {
        let headers = labels(&["Name", IGNORED_HEADER, "", "Mail"]);
        assert_eq!(sorted_source_col(&headers, 0), 0);
        assert_eq!(sorted_source_col(&headers, 1), 2);
        assert_eq!(sorted_source_col(&headers, 2), 3);
        // past the observed header, fall back to the position
        assert_eq!(sorted_source_col(&headers, 5), 5);
    }

    #[test]
    fn test_header_labels_keep_blanks() {
        let mut row = SheetRow::new(1);
        row.put(0, RawCell::Value(CellValue::Text("Name".into())));
        row.put(2, RawCell::Value(CellValue::Text("Secret".into())));
        row.put(3, RawCell::Value(CellValue::Text("Mail".into())));
        let mut listeners = ReadChain::default();
        let got = header_labels(&mut listeners, &mut None, &labels(&["Secret"]), 0, &row).unwrap();
        assert_eq!(got, labels(&["Name", "", IGNORED_HEADER, "Mail"]));
    }

    #[test]
    fn test_formula_without_reader_keeps_cached() {
        let raw = RawCell::Formula {
            formula: "A1*2".into(),
            cached: CellValue::Float(4.0),
        };
        assert_eq!(cell_value(&raw, 0, 0, &mut None).unwrap(), CellValue::Float(4.0));

        let mut reader: Option<Box<dyn FormulaReader>> =
            Some(Box::new(|f: &str, _: &CellValue| Ok(CellValue::Text(f.to_string()))));
        assert_eq!(
            cell_value(&raw, 0, 0, &mut reader).unwrap(),
            CellValue::Text("A1*2".into())
        );
    }
}
