//! Export of untyped rows
//!
//! [`RowWriter`] writes plain `Vec<CellValue>` rows under headers given at
//! run time. Titles, header placement, merging and every listener hook work
//! as they do for [`super::ExcelWriter`].

use super::executor::{self, SheetTarget};
use super::Title;
use crate::config::ExcelSettings;
use crate::context::WriteInfo;
use crate::error::{ExcelError, ExcelResult};
use crate::listener::{self, ListenerRegistry, WriteChain, WriteListener};
use crate::schema::{untyped_columns, Column, ColumnSchema, ROW_RECORD};
use crate::stream::WorkbookSink;
use crate::types::{CellValue, ExcelType, ExecMode, WrMode};
use std::io::{Seek, Write};
use std::path::Path;
use tracing::{debug, info};

pub struct RowWriter {
    sink: Option<WorkbookSink>,
    listeners: WriteChain,
    columns: Vec<ColumnSchema>,
    depth: usize,
    settings: ExcelSettings,
    mode: WrMode,
    /// Template key, `None` leaves the export unbound
    unique_key: Option<String>,
    file_name: Option<String>,
    released: bool,
}

impl RowWriter {
    /// Writer with default settings and the global listener registry
    pub fn new() -> ExcelResult<Self> {
        Self::with_settings(ExcelSettings::default())
    }

    pub fn with_settings(settings: ExcelSettings) -> ExcelResult<Self> {
        Self::with_registry(settings, &listener::global())
    }

    /// Writer whose initializer listeners are the ones `registry` gives the
    /// `"rows"` record
    pub fn with_registry(settings: ExcelSettings, registry: &ListenerRegistry) -> ExcelResult<Self> {
        settings.validate()?;
        if registry.excel_type(ROW_RECORD, ExecMode::Write) == Some(ExcelType::Xls) {
            return Err(ExcelError::Resource(
                "xls export is not supported, write xlsx instead".to_string(),
            ));
        }
        let sink = WorkbookSink::new(&settings)?;
        let mut listeners = WriteChain::default();
        for l in registry.write_listeners(ROW_RECORD) {
            listeners.push(l);
        }
        let mut writer = Self {
            sink: Some(sink),
            listeners,
            columns: Vec::new(),
            depth: 0,
            settings,
            mode: WrMode::Sort,
            unique_key: None,
            file_name: None,
            released: false,
        };
        writer.announce();
        debug!(listeners = writer.listeners.len(), "row writer ready");
        Ok(writer)
    }

    fn info(&self) -> WriteInfo {
        WriteInfo {
            record: ROW_RECORD,
            columns: self.columns.clone(),
            depth: self.depth,
            mode: self.mode,
            excel_type: ExcelType::Xlsx,
            header_height: self.settings.header_height,
            body_height: self.settings.body_height,
            unique_key: self.unique_key.clone().unwrap_or_default(),
            bind: self.unique_key.is_some(),
        }
    }

    fn announce(&mut self) {
        let info = self.info();
        self.listeners.register_all(&info);
    }

    /// One column per header path, outermost label first
    pub fn head<I, S>(self, heads: Vec<I>) -> ExcelResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns(heads.into_iter().map(Column::new).collect())
    }

    /// Full column declarations: widths, formats, colors and order
    pub fn columns(mut self, columns: Vec<Column>) -> ExcelResult<Self> {
        let (columns, depth) = untyped_columns(columns)?;
        self.columns = columns;
        self.depth = depth;
        self.announce();
        Ok(self)
    }

    pub fn header_height(mut self, height: f64) -> Self {
        self.settings.header_height = height;
        self.announce();
        self
    }

    pub fn body_height(mut self, height: f64) -> Self {
        self.settings.body_height = height;
        self.announce();
        self
    }

    pub fn listener(mut self, listener: impl WriteListener + 'static) -> Self {
        let mut boxed: Box<dyn WriteListener> = Box::new(listener);
        boxed.on_register(&self.info());
        self.listeners.push(boxed);
        self
    }

    pub fn mode(mut self, mode: WrMode) -> Self {
        self.mode = mode;
        self.announce();
        self
    }

    /// Bind the export to `key`; an empty key leaves it unbound
    pub fn bind(mut self, key: &str) -> Self {
        self.unique_key = (!key.is_empty()).then(|| key.to_string());
        self.announce();
        self
    }

    pub fn unbind(self) -> Self {
        self.bind("")
    }

    /// File name used by [`RowWriter::flush_to_dir`], without extension
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    fn release(&mut self) {
        if self.sink.take().is_some() {
            debug!("row workbook released");
        }
        self.released = true;
    }

    fn guarded<T>(&mut self, f: impl FnOnce(&mut SheetTarget) -> ExcelResult<T>) -> ExcelResult<T> {
        if self.released {
            return Err(ExcelError::Resource(
                "the workbook has already been released".to_string(),
            ));
        }
        if self.columns.is_empty() {
            return Err(ExcelError::Schema("no columns declared for the rows".to_string()));
        }
        let mut target = SheetTarget {
            sink: &mut self.sink,
            listeners: &mut self.listeners,
            columns: &self.columns,
            depth: self.depth,
            mode: self.mode,
            settings: &self.settings,
        };
        let result = f(&mut target);
        if result.is_err() {
            self.release();
        }
        result
    }

    /// Write to the default sheet, header included
    pub fn write(&mut self, rows: &[Vec<CellValue>]) -> ExcelResult<&mut Self> {
        let sheet = self.settings.default_sheet.clone();
        self.write_to_sheet(rows, &sheet, true)
    }

    pub fn write_to_sheet(&mut self, rows: &[Vec<CellValue>], sheet: &str, need_head: bool) -> ExcelResult<&mut Self> {
        self.guarded(|target| {
            executor::select_sheet(target.sink, target.listeners, sheet)?;
            if need_head {
                executor::write_head(target)?;
            }
            executor::write_rows(target, rows)?;
            debug!(sheet, rows = rows.len(), need_head, "rows written");
            Ok(())
        })?;
        Ok(self)
    }

    pub fn write_title(&mut self, title: &Title) -> ExcelResult<&mut Self> {
        let sheet = self.settings.default_sheet.clone();
        self.write_title_to_sheet(title, &sheet)
    }

    pub fn write_title_to_sheet(&mut self, title: &Title, sheet: &str) -> ExcelResult<&mut Self> {
        self.guarded(|target| {
            executor::select_sheet(target.sink, target.listeners, sheet)?;
            executor::write_title(target, title)
        })?;
        Ok(self)
    }

    fn finish(mut self, save: impl FnOnce(&mut WorkbookSink) -> ExcelResult<()>) -> ExcelResult<bool> {
        let sink = self
            .sink
            .take()
            .ok_or_else(|| ExcelError::Resource("the workbook has already been released".to_string()))?;
        self.released = true;

        let flushed = executor::flush(
            sink,
            &mut self.listeners,
            &self.settings.default_sheet,
            self.unique_key.as_deref(),
            save,
        )?;
        if flushed {
            info!(columns = self.columns.len(), "row workbook flushed");
        } else {
            info!("row flush aborted by listener");
        }
        Ok(flushed)
    }

    pub fn flush_to_path<P: AsRef<Path>>(self, path: P) -> ExcelResult<bool> {
        let path = path.as_ref().to_path_buf();
        self.finish(|sink| sink.save_to_path(&path))
    }

    /// Save into `dir` as the configured file name or a timestamp
    pub fn flush_to_dir<P: AsRef<Path>>(self, dir: P) -> ExcelResult<bool> {
        let stem = self
            .file_name
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d%H%M%S").to_string());
        let path = dir
            .as_ref()
            .join(format!("{}.{}", stem, ExcelType::Xlsx.extension()));
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

impl std::fmt::Debug for RowWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowWriter")
            .field("columns", &self.columns.len())
            .field("depth", &self.depth)
            .field("listeners", &self.listeners.len())
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}
