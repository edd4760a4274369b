//! Export row emission
//!
//! Title, header and body rows are written strictly top to bottom through
//! the sheet cursor; constant-memory worksheets cannot go back to a row
//! once a later one has been started.

use super::{Title, TitleAlign, DATETIME_FORMAT, DATE_FORMAT};
use crate::binding;
use crate::config::ExcelSettings;
use crate::context::WriteContext;
use crate::convert::{date_to_serial, datetime_to_serial};
use crate::error::{ExcelError, ExcelResult};
use crate::expr::Bindings;
use crate::layout::{positions, HeaderGrid};
use crate::listener::{CellEvent, RowEvent, WriteChain};
use crate::schema::{ColumnSchema, Record, RecordRef, RowRef, Schema};
use crate::stream::WorkbookSink;
use crate::types::{CellValue, RowType, WrMode};
use rust_xlsxwriter::{Format, FormatAlign, Worksheet};
use tracing::debug;

fn open_sink(sink: &mut Option<WorkbookSink>) -> ExcelResult<&mut WorkbookSink> {
    sink.as_mut()
        .ok_or_else(|| ExcelError::Resource("the workbook has already been released".to_string()))
}

/// What title and header emission needs from a writer, typed or not
pub(crate) struct SheetTarget<'a> {
    pub sink: &'a mut Option<WorkbookSink>,
    pub listeners: &'a mut WriteChain,
    pub columns: &'a [ColumnSchema],
    pub depth: usize,
    pub mode: WrMode,
    pub settings: &'a ExcelSettings,
}

impl<'a> SheetTarget<'a> {
    pub fn of<R>(ctx: &'a mut WriteContext<R>) -> Self {
        Self {
            sink: &mut ctx.sink,
            listeners: &mut ctx.listeners,
            columns: ctx.schema.columns(),
            depth: ctx.schema.depth(),
            mode: ctx.mode,
            settings: &ctx.settings,
        }
    }
}

/// Every declared field of `record` as expression variables
fn variables<R: Record>(schema: &Schema<R>, record: &R) -> Bindings {
    schema
        .fields()
        .iter()
        .map(|f| (f.name().to_string(), f.get(record)))
        .collect()
}

/// Write one value with kind-based dispatch
pub(crate) fn write_value(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &CellValue,
    format: Option<&Format>,
    field: &str,
) -> ExcelResult<()> {
    let written = match (value, format) {
        (CellValue::Null, Some(f)) => sheet.write_blank(row, col, f),
        (CellValue::Null, None) => return Ok(()),
        (CellValue::Bool(b), Some(f)) => sheet.write_boolean_with_format(row, col, *b, f),
        (CellValue::Bool(b), None) => sheet.write_boolean(row, col, *b),
        (CellValue::Int(i), Some(f)) => sheet.write_number_with_format(row, col, *i as f64, f),
        (CellValue::Int(i), None) => sheet.write_number(row, col, *i as f64),
        (CellValue::Float(n), Some(f)) => sheet.write_number_with_format(row, col, *n, f),
        (CellValue::Float(n), None) => sheet.write_number(row, col, *n),
        (CellValue::Text(s) | CellValue::Enum(s), Some(f)) => sheet.write_string_with_format(row, col, s, f),
        (CellValue::Text(s) | CellValue::Enum(s), None) => sheet.write_string(row, col, s),
        (CellValue::Date(d), f) => {
            let fallback = Format::new().set_num_format(DATE_FORMAT);
            sheet.write_number_with_format(row, col, date_to_serial(*d), f.unwrap_or(&fallback))
        }
        (CellValue::DateTime(dt), f) => {
            let fallback = Format::new().set_num_format(DATETIME_FORMAT);
            sheet.write_number_with_format(row, col, datetime_to_serial(*dt), f.unwrap_or(&fallback))
        }
        (CellValue::List(_), _) => {
            return Err(ExcelError::UnsupportedValueType {
                field: field.to_string(),
                kind: value.type_name().to_string(),
            })
        }
    };
    written
        .map(|_| ())
        .map_err(|e| ExcelError::resource(&format!("Failed to write cell [row:{},column:{}]", row, col), e))
}

/// Make `name` current, announcing it to listeners when it is new
pub(crate) fn select_sheet(
    sink: &mut Option<WorkbookSink>,
    listeners: &mut WriteChain,
    name: &str,
) -> ExcelResult<()> {
    let sink = open_sink(sink)?;
    if sink.select(name)? {
        let sheet = sink.sheet()?;
        listeners.sheet_created(sheet, name);
    }
    Ok(())
}

fn title_format(title: &Title) -> Format {
    let align = match title.align {
        TitleAlign::Left => FormatAlign::Left,
        TitleAlign::Center => FormatAlign::Center,
        TitleAlign::Right => FormatAlign::Right,
    };
    let mut format = Format::new().set_align(align).set_font_size(title.font_size);
    if title.bold {
        format = format.set_bold();
    }
    if let Some(fill) = title.color.to_xlsx() {
        format = format.set_background_color(fill);
    }
    if let Some(font) = title.font_color.to_xlsx() {
        format = format.set_font_color(font);
    }
    format
}

/// Merged title block above the header
pub(crate) fn write_title(target: &mut SheetTarget, title: &Title) -> ExcelResult<()> {
    let columns = target.columns.len() as u16;
    let first_col = title.first_col;
    let last_col = match title.last_col {
        Some(last) if last >= 1 => last,
        _ => columns.saturating_sub(1),
    };
    let rows = title.rows.max(1);
    if last_col < first_col {
        return Err(ExcelError::Config(format!(
            "title columns {}..={} are reversed",
            first_col, last_col
        )));
    }
    if rows == 1 && first_col == last_col {
        return Err(ExcelError::Config(
            "a merged title must contain 2 or more cells".to_string(),
        ));
    }

    let mut format = title_format(title);
    target.listeners.title_style(title, &mut format);

    let sink = open_sink(target.sink)?;
    let first_row = match title.first_row {
        Some(row) => row,
        None => sink.next_row()?,
    };
    let last_row = first_row + rows - 1;
    sink.skip_to(last_row)?;

    let sheet = sink.sheet()?;
    if title.row_height > 0.0 {
        for row in first_row..=last_row {
            sheet
                .set_row_height(row, title.row_height)
                .map_err(|e| ExcelError::resource("Failed to size title row", e))?;
        }
    }
    let text = match &title.content {
        CellValue::Text(s) | CellValue::Enum(s) => s.clone(),
        _ => String::new(),
    };
    sheet
        .merge_range(first_row, first_col, last_row, last_col, &text, &format)
        .map_err(|e| ExcelError::resource("Failed to merge title", e))?;
    if text.is_empty() && !title.content.is_null() {
        write_value(sheet, first_row, first_col, &title.content, Some(&format), "title")?;
    }
    debug!(first_row, last_row, first_col, last_col, "title written");
    Ok(())
}

/// One row per header level.
///
/// Labels and formats of every level are settled before the first header
/// row is started, so each header row event carries the complete grid.
pub(crate) fn write_head(target: &mut SheetTarget) -> ExcelResult<()> {
    let depth = target.depth;
    let placed = positions(target.columns, target.mode);
    let height = target.settings.header_height;
    let sink = open_sink(target.sink)?;
    let first_row = sink.next_row()?;
    let mut grid = HeaderGrid::new(first_row, depth);
    let mut labels: Vec<Vec<CellValue>> = Vec::with_capacity(depth);

    for level in 0..depth {
        let mut row_labels = Vec::with_capacity(target.columns.len());
        for (column, &col) in target.columns.iter().zip(&placed) {
            let cell = CellEvent {
                row: first_row + level as u32,
                col,
                row_type: RowType::Head,
                index: level,
                column: Some(column),
            };
            let mut format = None;
            target.listeners.head_style(&cell, &mut format);
            let label = target
                .listeners
                .assignment_before(&cell, CellValue::Text(column.header(level).to_string()));
            grid.record(level, col, label.as_text(), format);
            row_labels.push(label);
        }
        labels.push(row_labels);
    }

    for (level, row_labels) in labels.iter().enumerate() {
        target.listeners.row_create_before(sink.next_row()?, level, RowType::Head);
        let row = sink.claim_row()?;
        let sheet = sink.sheet()?;
        if height > 0.0 {
            sheet
                .set_row_height(row, height)
                .map_err(|e| ExcelError::resource("Failed to size header row", e))?;
        }

        for ((column, &col), label) in target.columns.iter().zip(&placed).zip(row_labels) {
            let cell = CellEvent {
                row,
                col,
                row_type: RowType::Head,
                index: level,
                column: Some(column),
            };
            let format = grid.cell(level, col).and_then(|c| c.format.as_ref());
            write_value(sheet, row, col, label, format, column.field)?;
            target.listeners.cell_completed(sheet, &cell, label);
        }

        let event = RowEvent {
            row,
            row_type: RowType::Head,
            index: level,
            header: Some(&grid),
        };
        target.listeners.row_completed(sheet, &event, None);
    }
    debug!(sheet = sink.sheet_name()?, depth, "header written");
    Ok(())
}

/// One row per record
pub(crate) fn write_body<R: Record>(ctx: &mut WriteContext<R>, records: &[R]) -> ExcelResult<()> {
    let placed = positions(ctx.schema.columns(), ctx.mode);
    let height = ctx.settings.body_height;
    let sink = open_sink(&mut ctx.sink)?;

    for (index, record) in records.iter().enumerate() {
        ctx.listeners.row_create_before(sink.next_row()?, index, RowType::Body);
        let row = sink.claim_row()?;
        let sheet = sink.sheet()?;
        if height > 0.0 {
            sheet
                .set_row_height(row, height)
                .map_err(|e| ExcelError::resource("Failed to size body row", e))?;
        }
        let vars = variables(&ctx.schema, record);

        for (pos, (column, &col)) in ctx.schema.columns().iter().zip(&placed).enumerate() {
            let Some(accessor) = ctx.schema.accessor(pos) else {
                continue;
            };
            let cell = CellEvent {
                row,
                col,
                row_type: RowType::Body,
                index,
                column: Some(column),
            };
            let mut format = None;
            ctx.listeners.body_style(&cell, &mut format);

            let mut value = accessor.get(record);
            if let Some(expr) = &column.write_expr {
                value = ctx.evaluator.evaluate(expr, &vars)?;
            }
            let value = ctx.listeners.assignment_before(&cell, value);
            write_value(sheet, row, col, &value, format.as_ref(), column.field)?;
            ctx.listeners.cell_completed(sheet, &cell, &value);
        }

        let view = RecordRef::new(record, ctx.schema.fields());
        let event = RowEvent {
            row,
            row_type: RowType::Body,
            index,
            header: None,
        };
        ctx.listeners.row_completed(sheet, &event, Some(&view));
    }
    Ok(())
}

/// One row per untyped row; cell `k` goes under column `k`, missing cells
/// stay blank and cells past the last column are dropped.
pub(crate) fn write_rows(target: &mut SheetTarget, rows: &[Vec<CellValue>]) -> ExcelResult<()> {
    let placed = positions(target.columns, target.mode);
    let height = target.settings.body_height;
    let sink = open_sink(target.sink)?;

    for (index, cells) in rows.iter().enumerate() {
        target.listeners.row_create_before(sink.next_row()?, index, RowType::Body);
        let row = sink.claim_row()?;
        let sheet = sink.sheet()?;
        if height > 0.0 {
            sheet
                .set_row_height(row, height)
                .map_err(|e| ExcelError::resource("Failed to size body row", e))?;
        }

        for (pos, (column, &col)) in target.columns.iter().zip(&placed).enumerate() {
            let cell = CellEvent {
                row,
                col,
                row_type: RowType::Body,
                index,
                column: Some(column),
            };
            let mut format = None;
            target.listeners.body_style(&cell, &mut format);
            let value = cells.get(pos).cloned().unwrap_or(CellValue::Null);
            let value = target.listeners.assignment_before(&cell, value);
            write_value(sheet, row, col, &value, format.as_ref(), column.title())?;
            target.listeners.cell_completed(sheet, &cell, &value);
        }

        let view = RowRef::new(cells, target.columns);
        let event = RowEvent {
            row,
            row_type: RowType::Body,
            index,
            header: None,
        };
        target.listeners.row_completed(sheet, &event, Some(&view));
    }
    Ok(())
}

/// Bind, ask the flush gate, then save through `save`
pub(crate) fn flush(
    mut sink: WorkbookSink,
    listeners: &mut WriteChain,
    default_sheet: &str,
    bind_key: Option<&str>,
    save: impl FnOnce(&mut WorkbookSink) -> ExcelResult<()>,
) -> ExcelResult<bool> {
    if !sink.has_sheets() {
        sink.select(default_sheet)?;
        listeners.sheet_created(sink.sheet()?, default_sheet);
    }
    if let Some(key) = bind_key {
        binding::embed(&mut sink, key)?;
    }
    if !listeners.flush_before(sink.workbook_mut()) {
        return Ok(false);
    }
    save(&mut sink)?;
    Ok(true)
}
