//! Execution contexts
//!
//! One context per reader or writer. It owns the workbook handle, the
//! resolved schema and the listener chain for the whole invocation and
//! releases the workbook exactly once. Listeners never see the context
//! itself: they get an immutable [`WriteInfo`] / [`ReadInfo`] snapshot when
//! they join, and explicit handles on each hook.

use crate::config::ExcelSettings;
use crate::expr::Evaluator;
use crate::listener::{ReadChain, WriteChain};
use crate::read::FormulaReader;
use crate::schema::{ColumnSchema, Record, Schema};
use crate::stream::{SourceWorkbook, WorkbookSink};
use crate::types::{ExcelType, WrMode};
use std::sync::Arc;
use tracing::debug;

/// Identifying key of a record type: explicit key, then the record's
/// declared id card, then its type name.
pub fn unique_key<R: Record>(schema: &Schema<R>, explicit: Option<&str>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| schema.sheet().id_card.clone())
        .unwrap_or_else(|| std::any::type_name::<R>().to_string())
}

//==============================================================================
// Listener-facing snapshots
//==============================================================================

/// What a write listener may know about its writer
#[derive(Debug, Clone)]
pub struct WriteInfo {
    pub record: &'static str,
    pub columns: Vec<ColumnSchema>,
    /// Header depth
    pub depth: usize,
    pub mode: WrMode,
    pub excel_type: ExcelType,
    pub header_height: f64,
    pub body_height: f64,
    pub unique_key: String,
    pub bind: bool,
}

/// What a read listener may know about its reader
#[derive(Debug, Clone)]
pub struct ReadInfo {
    pub record: &'static str,
    pub columns: Vec<ColumnSchema>,
    pub depth: usize,
    pub mode: WrMode,
    pub excel_type: ExcelType,
    /// Expected key when template checking is on
    pub unique_key: Option<String>,
    pub read_other: bool,
}

//==============================================================================
// Write
//==============================================================================

pub struct WriteContext<R> {
    pub(crate) schema: Schema<R>,
    pub(crate) settings: ExcelSettings,
    pub(crate) listeners: WriteChain,
    pub(crate) evaluator: Arc<dyn Evaluator>,
    pub(crate) sink: Option<WorkbookSink>,
    pub(crate) mode: WrMode,
    pub(crate) excel_type: ExcelType,
    pub(crate) unique_key: String,
    pub(crate) bind: bool,
    pub(crate) released: bool,
}

impl<R: Record> WriteContext<R> {
    pub fn info(&self) -> WriteInfo {
        WriteInfo {
            record: std::any::type_name::<R>(),
            columns: self.schema.columns().to_vec(),
            depth: self.schema.depth(),
            mode: self.mode,
            excel_type: self.excel_type,
            header_height: self.settings.header_height,
            body_height: self.settings.body_height,
            unique_key: self.unique_key.clone(),
            bind: self.bind,
        }
    }

    /// Drop the workbook; later calls fail with a resource error
    pub(crate) fn release(&mut self) {
        if self.sink.take().is_some() {
            debug!(record = std::any::type_name::<R>(), "write workbook released");
        }
        self.released = true;
    }
}

//==============================================================================
// Read
//==============================================================================

pub struct ReadContext<R> {
    pub(crate) schema: Schema<R>,
    pub(crate) settings: ExcelSettings,
    pub(crate) listeners: ReadChain,
    pub(crate) evaluator: Arc<dyn Evaluator>,
    pub(crate) formula_reader: Option<Box<dyn FormulaReader>>,
    pub(crate) source: Option<SourceWorkbook>,
    pub(crate) mode: WrMode,
    pub(crate) excel_type: ExcelType,
    /// Expected template key, `None` when checking is off
    pub(crate) check_key: Option<String>,
    pub(crate) read_other: bool,
    pub(crate) released: bool,
}

impl<R: Record> ReadContext<R> {
    pub fn info(&self) -> ReadInfo {
        ReadInfo {
            record: std::any::type_name::<R>(),
            columns: self.schema.columns().to_vec(),
            depth: self.schema.depth(),
            mode: self.mode,
            excel_type: self.excel_type,
            unique_key: self.check_key.clone(),
            read_other: self.read_other,
        }
    }

    pub(crate) fn release(&mut self) {
        if self.source.take().is_some() {
            debug!(record = std::any::type_name::<R>(), "read workbook released");
        }
        self.released = true;
    }
}
