//! Import
//!
//! [`ExcelReader`] decodes the rows of a sheet into typed records. The
//! source is opened once and may be read sheet after sheet; a failed read
//! releases it.
//!
//! ```ignore
//! let staff = ExcelReader::<Staff>::open("staff.xlsx", &[])?
//!     .check(true)
//!     .read_records(0, "Sheet1")?;
//! ```

mod executor;
mod formula;
mod rows;

pub use executor::IGNORED_HEADER;
pub use formula::{CachedValueFormulaReader, FormulaReader};
pub use rows::RowReader;

use crate::config::ExcelSettings;
use crate::context::{unique_key, ReadContext};
use crate::error::{ExcelError, ExcelResult};
use crate::expr::{default_evaluator, Evaluator};
use crate::listener::{self, ListenerRegistry, ReadChain, ReadListener};
use crate::schema::{Record, Schema};
use crate::stream::{ReadSeek, SourceWorkbook};
use crate::types::{ExcelType, ExecMode, WrMode};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

type Subscriber<R> = Box<dyn FnMut(Vec<R>)>;

pub struct ExcelReader<R> {
    ctx: ReadContext<R>,
    ignores: Vec<String>,
    subscriber: Option<Subscriber<R>>,
}

impl<R: Record> ExcelReader<R> {
    /// Reader over a file; the container kind comes from its extension and
    /// falls back to the record's sheet attribute.
    pub fn open<P: AsRef<Path>>(path: P, ignores: &[&str]) -> ExcelResult<Self> {
        Self::open_with(path, ExcelSettings::default(), ignores)
    }

    pub fn open_with<P: AsRef<Path>>(path: P, settings: ExcelSettings, ignores: &[&str]) -> ExcelResult<Self> {
        let path = path.as_ref();
        let declared = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(ExcelType::from_file_name)
            .unwrap_or(R::sheet().excel_type);
        let file = File::open(path)
            .map_err(|e| ExcelError::resource(&format!("Failed to open {}", path.display()), e))?;
        Self::from_reader(file, declared, settings, &listener::global(), ignores)
    }

    /// Reader over any seekable byte source of the given container kind.
    /// An initializer in `registry` may still override the kind.
    pub fn from_reader<S: ReadSeek + 'static>(
        source: S,
        excel_type: ExcelType,
        settings: ExcelSettings,
        registry: &ListenerRegistry,
        ignores: &[&str],
    ) -> ExcelResult<Self> {
        settings.validate()?;
        let ignores: Vec<String> = ignores.iter().map(|s| s.to_string()).collect();
        let schema = Schema::<R>::resolve(&ignores)?;

        let record = std::any::type_name::<R>();
        let excel_type = registry.excel_type(record, ExecMode::Read).unwrap_or(excel_type);
        let effective = settings.overlay(schema.sheet());
        let workbook = SourceWorkbook::open(Box::new(source), excel_type, effective.buffer_size)?;

        let mut listeners = ReadChain::default();
        for l in registry.read_listeners(record) {
            listeners.push(l);
        }

        let ctx = ReadContext {
            schema,
            settings: effective,
            listeners,
            evaluator: default_evaluator(),
            formula_reader: None,
            source: Some(workbook),
            mode: WrMode::Sort,
            excel_type,
            check_key: None,
            read_other: false,
            released: false,
        };
        let mut reader = Self {
            ctx,
            ignores,
            subscriber: None,
        };
        reader.announce();
        debug!(
            record,
            kind = excel_type.extension(),
            listeners = reader.ctx.listeners.len(),
            "reader ready"
        );
        Ok(reader)
    }

    fn announce(&mut self) {
        let info = self.ctx.info();
        self.ctx.listeners.register_all(&info);
    }

    pub fn listener(mut self, listener: impl ReadListener + 'static) -> Self {
        let mut boxed: Box<dyn ReadListener> = Box::new(listener);
        boxed.on_register(&self.ctx.info());
        self.ctx.listeners.push(boxed);
        self
    }

    /// Verify the workbook against the record's own key before each read
    pub fn check(mut self, enable: bool) -> Self {
        self.ctx.check_key = enable.then(|| unique_key(&self.ctx.schema, None));
        self.announce();
        self
    }

    /// Verify against `key`; an empty key fails the next read
    pub fn check_with(mut self, key: &str) -> Self {
        self.ctx.check_key = Some(key.to_string());
        self.announce();
        self
    }

    /// Route rows above the header to the listeners
    pub fn read_other(mut self, enable: bool) -> Self {
        self.ctx.read_other = enable;
        self.announce();
        self
    }

    pub fn mode(mut self, mode: WrMode) -> Self {
        self.ctx.mode = mode;
        self.announce();
        self
    }

    /// Resolve formula cells; switches the read to the buffered path
    pub fn formula_reader(mut self, reader: impl FormulaReader + 'static) -> Self {
        self.ctx.formula_reader = Some(Box::new(reader));
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.ctx.evaluator = evaluator;
        self
    }

    /// Receive the records of every [`ExcelReader::read_sheet`] call
    pub fn subscribe(mut self, subscriber: impl FnMut(Vec<R>) + 'static) -> Self {
        self.subscriber = Some(Box::new(subscriber));
        self
    }

    pub fn sheet_names(&self) -> ExcelResult<Vec<String>> {
        self.ctx
            .source
            .as_ref()
            .map(SourceWorkbook::sheet_names)
            .ok_or_else(|| ExcelError::Resource("the workbook has already been released".to_string()))
    }

    fn ensure_open(&self) -> ExcelResult<()> {
        if self.ctx.released {
            return Err(ExcelError::Resource(
                "the workbook has already been released".to_string(),
            ));
        }
        Ok(())
    }

    /// Read the default sheet with the header on the last header level
    pub fn read(&mut self) -> ExcelResult<&mut Self> {
        let header_index = self.ctx.schema.depth().saturating_sub(1) as u32;
        let sheet = self.ctx.settings.default_sheet.clone();
        self.read_sheet(header_index, &sheet)
    }

    /// Read `sheet` and hand its records to the subscriber, if any
    pub fn read_sheet(&mut self, header_index: u32, sheet: &str) -> ExcelResult<&mut Self> {
        self.ensure_open()?;
        let collect = self.subscriber.is_some();
        let records = executor::read_sheet(&mut self.ctx, &self.ignores, header_index, sheet, collect)?;
        if let Some(subscriber) = self.subscriber.as_mut() {
            subscriber(records);
        }
        Ok(self)
    }

    /// Read `sheet` and return its records directly
    pub fn read_records(&mut self, header_index: u32, sheet: &str) -> ExcelResult<Vec<R>> {
        self.ensure_open()?;
        executor::read_sheet(&mut self.ctx, &self.ignores, header_index, sheet, true)
    }

    /// Release the source workbook
    pub fn close(mut self) {
        self.ctx.release();
    }
}

impl<R> std::fmt::Debug for ExcelReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExcelReader")
            .field("schema", &self.ctx.schema)
            .field("listeners", &self.ctx.listeners.len())
            .field("released", &self.ctx.released)
            .finish_non_exhaustive()
    }
}
