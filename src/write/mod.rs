//! Export
//!
//! [`ExcelWriter`] streams typed records into an `.xlsx` workbook. Each
//! write call selects (or creates) a sheet, optionally emits the header
//! rows, then one row per record; every step runs through the writer's
//! listener chain. The workbook is only materialized by one of the
//! `flush_to_*` calls, which consume the writer.
//!
//! ```ignore
//! let ok = ExcelWriter::<Staff>::new(&[])?
//!     .listener(SchemaStyleListener::new())
//!     .listener(HeaderMergeListener::new())
//!     .write(&staff)?
//!     .flush_to_path("staff.xlsx")?;
//! ```

mod executor;
mod rows;

pub use rows::RowWriter;

use crate::config::ExcelSettings;
use crate::context::{unique_key, WriteContext};
use crate::error::{ExcelError, ExcelResult};
use crate::expr::{default_evaluator, Evaluator};
use crate::listener::{self, ListenerRegistry, WriteChain, WriteListener};
use crate::schema::{Record, Schema};
use crate::stream::WorkbookSink;
use executor::SheetTarget;
use crate::types::{CellValue, ExcelColor, ExcelType, ExecMode, WrMode};
use std::io::{Seek, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Number format of date cells without an explicit column format
pub const DATE_FORMAT: &str = "yyyy-mm-dd";
/// Number format of date-time cells without an explicit column format
pub const DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

//==============================================================================
// Title
//==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TitleAlign {
    #[default]
    Left,
    Center,
    Right,
}

/// A merged block written above the header
#[derive(Debug, Clone, PartialEq)]
pub struct Title {
    pub content: CellValue,
    /// Starting row, the next free row when unset
    pub first_row: Option<u32>,
    /// Number of rows the block spans
    pub rows: u32,
    pub first_col: u16,
    /// Last column, the schema's last column when unset
    pub last_col: Option<u16>,
    /// Row height in points
    pub row_height: f64,
    pub color: ExcelColor,
    pub font_color: ExcelColor,
    pub font_size: f64,
    pub align: TitleAlign,
    pub bold: bool,
}

impl Title {
    pub fn new(content: impl Into<CellValue>) -> Self {
        Self {
            content: content.into(),
            first_row: None,
            rows: 2,
            first_col: 0,
            last_col: None,
            row_height: 17.5,
            color: ExcelColor::None,
            font_color: ExcelColor::Black,
            font_size: 12.5,
            align: TitleAlign::Left,
            bold: false,
        }
    }

    pub fn rows(mut self, rows: u32) -> Self {
        self.rows = rows;
        self
    }

    pub fn first_row(mut self, row: u32) -> Self {
        self.first_row = Some(row);
        self
    }

    pub fn cols(mut self, first: u16, last: u16) -> Self {
        self.first_col = first;
        self.last_col = Some(last);
        self
    }

    pub fn row_height(mut self, height: f64) -> Self {
        self.row_height = height;
        self
    }

    pub fn color(mut self, color: ExcelColor) -> Self {
        self.color = color;
        self
    }

    pub fn font_color(mut self, color: ExcelColor) -> Self {
        self.font_color = color;
        self
    }

    pub fn font_size(mut self, size: f64) -> Self {
        self.font_size = size;
        self
    }

    pub fn align(mut self, align: TitleAlign) -> Self {
        self.align = align;
        self
    }

    pub fn bold(mut self, bold: bool) -> Self {
        self.bold = bold;
        self
    }
}

//==============================================================================
// Writer
//==============================================================================

pub struct ExcelWriter<R> {
    ctx: WriteContext<R>,
    base: ExcelSettings,
    file_name: Option<String>,
}

impl<R: Record> ExcelWriter<R> {
    /// Writer with default settings and the global listener registry
    pub fn new(ignores: &[&str]) -> ExcelResult<Self> {
        Self::with_settings(ExcelSettings::default(), ignores)
    }

    pub fn with_settings(settings: ExcelSettings, ignores: &[&str]) -> ExcelResult<Self> {
        Self::with_registry(settings, &listener::global(), ignores)
    }

    /// Writer whose initializer listeners come from `registry`
    pub fn with_registry(
        settings: ExcelSettings,
        registry: &ListenerRegistry,
        ignores: &[&str],
    ) -> ExcelResult<Self> {
        settings.validate()?;
        let ignores: Vec<String> = ignores.iter().map(|s| s.to_string()).collect();
        let schema = Schema::<R>::resolve(&ignores)?;
        schema.ensure_writable()?;

        let record = std::any::type_name::<R>();
        let excel_type = registry
            .excel_type(record, ExecMode::Write)
            .unwrap_or(schema.sheet().excel_type);
        if excel_type == ExcelType::Xls {
            return Err(ExcelError::Resource(
                "xls export is not supported, write xlsx instead".to_string(),
            ));
        }

        let effective = settings.overlay(schema.sheet());
        let sink = WorkbookSink::new(&effective)?;
        let mut listeners = WriteChain::default();
        for l in registry.write_listeners(record) {
            listeners.push(l);
        }

        let ctx = WriteContext {
            unique_key: unique_key(&schema, None),
            bind: effective.bind,
            schema,
            settings: effective,
            listeners,
            evaluator: default_evaluator(),
            sink: Some(sink),
            mode: WrMode::Sort,
            excel_type,
            released: false,
        };
        let mut writer = Self {
            ctx,
            base: settings,
            file_name: None,
        };
        writer.announce();
        debug!(
            record,
            columns = writer.ctx.schema.len(),
            listeners = writer.ctx.listeners.len(),
            "writer ready"
        );
        Ok(writer)
    }

    /// Hand the current writer state to every listener
    fn announce(&mut self) {
        let info = self.ctx.info();
        self.ctx.listeners.register_all(&info);
    }

    pub fn listener(mut self, listener: impl WriteListener + 'static) -> Self {
        let mut boxed: Box<dyn WriteListener> = Box::new(listener);
        boxed.on_register(&self.ctx.info());
        self.ctx.listeners.push(boxed);
        self
    }

    /// Column placement; listeners are told about the change
    pub fn mode(mut self, mode: WrMode) -> Self {
        self.ctx.mode = mode;
        self.announce();
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.ctx.evaluator = evaluator;
        self
    }

    /// Bind the export to `key`; an empty key keeps the record's own key
    pub fn id_card(mut self, key: &str) -> Self {
        if !key.is_empty() {
            self.ctx.unique_key = key.to_string();
        }
        self.ctx.bind = true;
        self.announce();
        self
    }

    pub fn bind(mut self, enable: bool) -> Self {
        self.ctx.bind = enable;
        self.announce();
        self
    }

    pub fn unbind(self) -> Self {
        self.bind(false)
    }

    /// File name used by [`ExcelWriter::flush_to_dir`], without extension
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    fn guarded<T>(&mut self, f: impl FnOnce(&mut WriteContext<R>) -> ExcelResult<T>) -> ExcelResult<T> {
        if self.ctx.released {
            return Err(ExcelError::Resource(
                "the workbook has already been released".to_string(),
            ));
        }
        f(&mut self.ctx).map_err(|e| {
            self.ctx.release();
            e
        })
    }

    /// Write to the default sheet, header included
    pub fn write(&mut self, records: &[R]) -> ExcelResult<&mut Self> {
        let sheet = self.ctx.settings.default_sheet.clone();
        self.write_to_sheet(records, &sheet, true)
    }

    pub fn write_to_sheet(&mut self, records: &[R], sheet: &str, need_head: bool) -> ExcelResult<&mut Self> {
        self.guarded(|ctx| {
            executor::select_sheet(&mut ctx.sink, &mut ctx.listeners, sheet)?;
            if need_head {
                executor::write_head(&mut SheetTarget::of(ctx))?;
            }
            executor::write_body(ctx, records)?;
            debug!(sheet, rows = records.len(), need_head, "records written");
            Ok(())
        })?;
        Ok(self)
    }

    /// Title block on the default sheet
    pub fn write_title(&mut self, title: &Title) -> ExcelResult<&mut Self> {
        let sheet = self.ctx.settings.default_sheet.clone();
        self.write_title_to_sheet(title, &sheet)
    }

    pub fn write_title_to_sheet(&mut self, title: &Title, sheet: &str) -> ExcelResult<&mut Self> {
        self.guarded(|ctx| {
            executor::select_sheet(&mut ctx.sink, &mut ctx.listeners, sheet)?;
            executor::write_title(&mut SheetTarget::of(ctx), title)
        })?;
        Ok(self)
    }

    /// Continue the same workbook with another record type.
    ///
    /// Listeners, sheets, file name and binding key carry over; row heights
    /// follow the new record.
    pub fn reset<N: Record>(self, ignores: &[&str]) -> ExcelResult<ExcelWriter<N>> {
        if self.ctx.released {
            return Err(ExcelError::Resource(
                "the workbook has already been released".to_string(),
            ));
        }
        let ignores: Vec<String> = ignores.iter().map(|s| s.to_string()).collect();
        let schema = Schema::<N>::resolve(&ignores)?;
        schema.ensure_writable()?;

        let WriteContext {
            listeners,
            evaluator,
            sink,
            mode,
            excel_type,
            unique_key,
            bind,
            settings,
            ..
        } = self.ctx;
        let effective = ExcelSettings {
            default_sheet: settings.default_sheet,
            ..self.base.overlay(schema.sheet())
        };

        let mut writer = ExcelWriter {
            ctx: WriteContext {
                schema,
                settings: effective,
                listeners,
                evaluator,
                sink,
                mode,
                excel_type,
                unique_key,
                bind,
                released: false,
            },
            base: self.base,
            file_name: self.file_name,
        };
        writer.announce();
        debug!(record = std::any::type_name::<N>(), "writer reset");
        Ok(writer)
    }

    /// Bind, ask the flush gate, then save through `save`.
    ///
    /// The workbook is released on every path.
    fn finish(mut self, save: impl FnOnce(&mut WorkbookSink) -> ExcelResult<()>) -> ExcelResult<bool> {
        if self.ctx.released {
            return Err(ExcelError::Resource(
                "the workbook has already been released".to_string(),
            ));
        }
        let sink = self
            .ctx
            .sink
            .take()
            .ok_or_else(|| ExcelError::Resource("the workbook has already been released".to_string()))?;
        self.ctx.released = true;

        let key = self.ctx.bind.then_some(self.ctx.unique_key.as_str());
        let flushed = executor::flush(sink, &mut self.ctx.listeners, &self.ctx.settings.default_sheet, key, save)?;
        if flushed {
            info!(record = std::any::type_name::<R>(), "workbook flushed");
        } else {
            info!(record = std::any::type_name::<R>(), "flush aborted by listener");
        }
        Ok(flushed)
    }

    pub fn flush_to_path<P: AsRef<Path>>(self, path: P) -> ExcelResult<bool> {
        let path = path.as_ref().to_path_buf();
        self.finish(|sink| sink.save_to_path(&path))
    }

    /// Save into `dir` as the configured file name, the record's sheet name,
    /// or a timestamp, plus the `.xlsx` extension.
    pub fn flush_to_dir<P: AsRef<Path>>(self, dir: P) -> ExcelResult<bool> {
        let stem = self
            .file_name
            .clone()
            .or_else(|| self.ctx.schema.sheet().name.clone())
            .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d%H%M%S").to_string());
        let path = dir
            .as_ref()
            .join(format!("{}.{}", stem, self.ctx.excel_type.extension()));
        self.flush_to_path(path)
    }

    pub fn flush_to_writer<W: Write + Seek + Send>(self, writer: W) -> ExcelResult<bool> {
        self.finish(|sink| sink.save_to_writer(writer))
    }

    /// The saved bytes, `None` when the flush gate said no
    pub fn flush_to_buffer(self) -> ExcelResult<Option<Vec<u8>>> {
        let mut bytes = None;
        let flushed = self.finish(|sink| {
            bytes = Some(sink.save_to_buffer()?);
            Ok(())
        })?;
        Ok(if flushed { bytes } else { None })
    }
}

impl<R> std::fmt::Debug for ExcelWriter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExcelWriter")
            .field("schema", &self.ctx.schema)
            .field("listeners", &self.ctx.listeners.len())
            .field("released", &self.ctx.released)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, FieldBinding};

    #[derive(Debug, Default, Clone)]
    struct Line {
        sku: String,
        qty: i64,
    }

    impl Record for Line {
        fn bindings() -> Vec<FieldBinding<Self>> {
            vec![
                FieldBinding::new("sku", |l: &Line| &l.sku, |l, v| l.sku = v).column(Column::new(["SKU"])),
                FieldBinding::new("qty", |l: &Line| &l.qty, |l, v| l.qty = v).column(Column::new(["Qty"])),
            ]
        }
    }

    #[derive(Debug, Default)]
    struct Unmapped {
        note: String,
    }

    impl Record for Unmapped {
        fn bindings() -> Vec<FieldBinding<Self>> {
            vec![FieldBinding::new("note", |u: &Unmapped| &u.note, |u, v| u.note = v)]
        }
    }

    fn writer() -> ExcelWriter<Line> {
        ExcelWriter::<Line>::with_registry(ExcelSettings::default(), &ListenerRegistry::new(), &[]).unwrap()
    }

    #[test]
    fn test_unmapped_record_fails_fast() {
        let err = ExcelWriter::<Unmapped>::new(&[]).unwrap_err();
        assert!(matches!(err, ExcelError::Schema(_)));
    }

    #[test]
    fn test_one_cell_title_rejected() {
        let mut w = writer();
        let err = w.write_title(&Title::new("Report").rows(1).cols(1, 1)).unwrap_err();
        assert!(matches!(err, ExcelError::Config(_)));
        // the failure released the workbook
        assert!(matches!(w.write(&[]), Err(ExcelError::Resource(_))));
    }

    #[test]
    fn test_flush_to_buffer_produces_bytes() {
        let mut w = writer();
        w.write_title(&Title::new("Lines")).unwrap();
        w.write(&[Line {
            sku: "A-1".into(),
            qty: 4,
        }])
        .unwrap();
        let bytes = w.flush_to_buffer().unwrap().unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[test]
    fn test_flush_without_writes_still_saves() {
        let bytes = writer().unbind().flush_to_buffer().unwrap();
        assert!(bytes.is_some());
    }
}
