//! Listener chain
//!
//! Listeners observe and intercept the read and write lifecycles. Every hook
//! has a no-op default, so a listener implements only the capabilities it
//! cares about. The chains dispatch in registration order:
//!
//! - transforming hooks (`assignment_before`, `read_cell`) fold left to
//!   right, each listener receiving the previous listener's output;
//! - continuation hooks (`read_row`, `read_empty`, `flush_before`) stop at
//!   the first `false`, later listeners are not asked.

pub mod lock;
pub mod merge;
pub mod style;

pub use lock::SheetLockListener;
pub use merge::HeaderMergeListener;
pub use style::SchemaStyleListener;

use crate::context::{ReadInfo, WriteInfo};
use crate::layout::HeaderGrid;
use crate::schema::{ColumnSchema, RecordView};
use crate::types::{CellValue, ExcelType, ExecMode, RowType};
use crate::write::Title;
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use std::sync::{Arc, OnceLock};

//==============================================================================
// Events
//==============================================================================

/// Position and role of the cell a hook is invoked for
#[derive(Debug, Clone, Copy)]
pub struct CellEvent<'a> {
    pub row: u32,
    pub col: u16,
    pub row_type: RowType,
    /// Header level for header cells, record index for body cells
    pub index: usize,
    /// Column the cell belongs to, absent for pre-header cells
    pub column: Option<&'a ColumnSchema>,
}

/// A completed or about-to-be-created row
#[derive(Debug, Clone, Copy)]
pub struct RowEvent<'a> {
    pub row: u32,
    pub row_type: RowType,
    /// Header level for header rows, record index for body rows
    pub index: usize,
    /// Complete header placement, on header rows of the write path
    pub header: Option<&'a HeaderGrid>,
}

//==============================================================================
// Capabilities
//==============================================================================

/// Hooks on the export path
#[allow(unused_variables)]
pub trait WriteListener: Send {
    /// Called when the listener joins a writer and again whenever the
    /// writer's configuration changes (mode, binding, reset, row heights)
    fn on_register(&mut self, info: &WriteInfo) {}

    fn sheet_created(&mut self, sheet: &mut Worksheet, name: &str) {}

    fn row_create_before(&mut self, row: u32, index: usize, row_type: RowType) {}

    /// Style of the first title cell
    fn title_style(&mut self, title: &Title, format: &mut Format) {}

    /// May set or replace the format of a header cell
    fn head_style(&mut self, cell: &CellEvent, format: &mut Option<Format>) {}

    /// May set or replace the format of a body cell
    fn body_style(&mut self, cell: &CellEvent, format: &mut Option<Format>) {}

    /// Transform the value about to be written
    fn assignment_before(&mut self, cell: &CellEvent, value: CellValue) -> CellValue {
        value
    }

    fn cell_completed(&mut self, sheet: &mut Worksheet, cell: &CellEvent, value: &CellValue) {}

    /// `record` is the source record on body rows
    fn row_completed(&mut self, sheet: &mut Worksheet, row: &RowEvent, record: Option<&dyn RecordView>) {}

    /// Return `false` to abort the flush
    fn flush_before(&mut self, workbook: &mut Workbook) -> bool {
        true
    }
}

/// Hooks on the import path
#[allow(unused_variables)]
pub trait ReadListener: Send {
    /// Called when the listener joins a reader and again whenever the
    /// reader's configuration changes (mode, checking, read_other)
    fn on_register(&mut self, info: &ReadInfo) {}

    fn read_before(&mut self) {}

    /// Transform a decoded cell value (header, pre-header and body cells)
    fn read_cell(&mut self, value: CellValue, cell: &CellEvent) -> CellValue {
        value
    }

    /// Return `false` to stop reading after this row
    fn read_row(&mut self, row: &RowEvent, record: Option<&dyn RecordView>) -> bool {
        true
    }

    /// A required cell is blank; return `false` to drop the row
    fn read_empty(&mut self, cell: &CellEvent, record: &dyn RecordView) -> bool {
        true
    }

    fn read_finish(&mut self) {}
}

//==============================================================================
// Chains
//==============================================================================

/// Ordered write listeners
#[derive(Default)]
pub struct WriteChain {
    listeners: Vec<Box<dyn WriteListener>>,
}

impl WriteChain {
    pub fn push(&mut self, listener: Box<dyn WriteListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn register_all(&mut self, info: &WriteInfo) {
        for l in &mut self.listeners {
            l.on_register(info);
        }
    }

    pub fn sheet_created(&mut self, sheet: &mut Worksheet, name: &str) {
        for l in &mut self.listeners {
            l.sheet_created(sheet, name);
        }
    }

    pub fn row_create_before(&mut self, row: u32, index: usize, row_type: RowType) {
        for l in &mut self.listeners {
            l.row_create_before(row, index, row_type);
        }
    }

    pub fn title_style(&mut self, title: &Title, format: &mut Format) {
        for l in &mut self.listeners {
            l.title_style(title, format);
        }
    }

    pub fn head_style(&mut self, cell: &CellEvent, format: &mut Option<Format>) {
        for l in &mut self.listeners {
            l.head_style(cell, format);
        }
    }

    pub fn body_style(&mut self, cell: &CellEvent, format: &mut Option<Format>) {
        for l in &mut self.listeners {
            l.body_style(cell, format);
        }
    }

    pub fn assignment_before(&mut self, cell: &CellEvent, value: CellValue) -> CellValue {
        self.listeners
            .iter_mut()
            .fold(value, |value, l| l.assignment_before(cell, value))
    }

    pub fn cell_completed(&mut self, sheet: &mut Worksheet, cell: &CellEvent, value: &CellValue) {
        for l in &mut self.listeners {
            l.cell_completed(sheet, cell, value);
        }
    }

    pub fn row_completed(&mut self, sheet: &mut Worksheet, row: &RowEvent, record: Option<&dyn RecordView>) {
        for l in &mut self.listeners {
            l.row_completed(sheet, row, record);
        }
    }

    pub fn flush_before(&mut self, workbook: &mut Workbook) -> bool {
        self.listeners.iter_mut().all(|l| l.flush_before(workbook))
    }
}

/// Ordered read listeners
#[derive(Default)]
pub struct ReadChain {
    listeners: Vec<Box<dyn ReadListener>>,
}

impl ReadChain {
    pub fn push(&mut self, listener: Box<dyn ReadListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn register_all(&mut self, info: &ReadInfo) {
        for l in &mut self.listeners {
            l.on_register(info);
        }
    }

    pub fn read_before(&mut self) {
        for l in &mut self.listeners {
            l.read_before();
        }
    }

    pub fn read_cell(&mut self, value: CellValue, cell: &CellEvent) -> CellValue {
        self.listeners
            .iter_mut()
            .fold(value, |value, l| l.read_cell(value, cell))
    }

    pub fn read_row(&mut self, row: &RowEvent, record: Option<&dyn RecordView>) -> bool {
        self.listeners.iter_mut().all(|l| l.read_row(row, record))
    }

    pub fn read_empty(&mut self, cell: &CellEvent, record: &dyn RecordView) -> bool {
        self.listeners.iter_mut().all(|l| l.read_empty(cell, record))
    }

    pub fn read_finish(&mut self) {
        for l in &mut self.listeners {
            l.read_finish();
        }
    }
}

//==============================================================================
// Initializers
//==============================================================================

/// Process-wide factory consulted whenever a reader or writer is built
#[allow(unused_variables)]
pub trait ListenerInitializer: Send + Sync {
    /// Listeners to prepend to a writer of `record`
    fn init_write(&self, record: &str, listeners: &mut Vec<Box<dyn WriteListener>>) {}

    /// Listeners to prepend to a reader of `record`
    fn init_read(&self, record: &str, listeners: &mut Vec<Box<dyn ReadListener>>) {}

    /// Override the container kind for `record`
    fn excel_type(&self, record: &str, mode: ExecMode) -> Option<ExcelType> {
        None
    }
}

/// Immutable set of initializers
#[derive(Default, Clone)]
pub struct ListenerRegistry {
    initializers: Vec<Arc<dyn ListenerInitializer>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, initializer: impl ListenerInitializer + 'static) -> Self {
        self.initializers.push(Arc::new(initializer));
        self
    }

    pub fn len(&self) -> usize {
        self.initializers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.initializers.is_empty()
    }

    pub fn write_listeners(&self, record: &str) -> Vec<Box<dyn WriteListener>> {
        let mut listeners = Vec::new();
        for init in &self.initializers {
            init.init_write(record, &mut listeners);
        }
        listeners
    }

    pub fn read_listeners(&self, record: &str) -> Vec<Box<dyn ReadListener>> {
        let mut listeners = Vec::new();
        for init in &self.initializers {
            init.init_read(record, &mut listeners);
        }
        listeners
    }

    /// First initializer with an opinion wins
    pub fn excel_type(&self, record: &str, mode: ExecMode) -> Option<ExcelType> {
        self.initializers
            .iter()
            .find_map(|init| init.excel_type(record, mode))
    }
}

static GLOBAL: OnceLock<Arc<ListenerRegistry>> = OnceLock::new();

/// Install the process-wide registry; only the first call succeeds
pub fn install_global(registry: ListenerRegistry) -> crate::error::ExcelResult<()> {
    GLOBAL.set(Arc::new(registry)).map_err(|_| {
        crate::error::ExcelError::Config("global listener registry already installed".to_string())
    })
}

/// The installed registry, or an empty one
pub fn global() -> Arc<ListenerRegistry> {
    GLOBAL
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(ListenerRegistry::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Suffix(&'static str);

    impl WriteListener for Suffix {
        fn assignment_before(&mut self, _cell: &CellEvent, value: CellValue) -> CellValue {
            CellValue::Text(format!("{}{}", value, self.0))
        }
    }

    impl ReadListener for Suffix {
        fn read_cell(&mut self, value: CellValue, _cell: &CellEvent) -> CellValue {
            CellValue::Text(format!("{}{}", value, self.0))
        }
    }

    struct Vote {
        answer: bool,
        asked: Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    }

    impl ReadListener for Vote {
        fn read_row(&mut self, _row: &RowEvent, _record: Option<&dyn RecordView>) -> bool {
            self.asked.lock().unwrap().push(self.name);
            self.answer
        }
    }

    fn cell() -> CellEvent<'static> {
        CellEvent {
            row: 1,
            col: 0,
            row_type: RowType::Body,
            index: 0,
            column: None,
        }
    }

    #[test]
    fn test_transform_hooks_fold_in_registration_order() {
        let mut chain = WriteChain::default();
        chain.push(Box::new(Suffix("-a")));
        chain.push(Box::new(Suffix("-b")));
        assert_eq!(
            chain.assignment_before(&cell(), CellValue::Text("x".into())),
            CellValue::Text("x-a-b".into())
        );

        let mut chain = ReadChain::default();
        chain.push(Box::new(Suffix("-1")));
        chain.push(Box::new(Suffix("-2")));
        assert_eq!(
            chain.read_cell(CellValue::Text("y".into()), &cell()),
            CellValue::Text("y-1-2".into())
        );
    }

    #[test]
    fn test_first_false_vote_stops_dispatch() {
        let asked = Arc::new(Mutex::new(Vec::new()));
        let mut chain = ReadChain::default();
        for (name, answer) in [("first", true), ("second", false), ("third", true)] {
            chain.push(Box::new(Vote {
                answer,
                asked: Arc::clone(&asked),
                name,
            }));
        }
        let row = RowEvent {
            row: 3,
            row_type: RowType::Body,
            index: 0,
            header: None,
        };
        assert!(!chain.read_row(&row, None));
        assert_eq!(*asked.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let mut chain = ReadChain::default();
        assert_eq!(chain.read_cell(CellValue::Int(5), &cell()), CellValue::Int(5));
        let row = RowEvent {
            row: 0,
            row_type: RowType::Head,
            index: 0,
            header: None,
        };
        assert!(chain.read_row(&row, None));
    }

    struct TypedInit;

    impl ListenerInitializer for TypedInit {
        fn init_read(&self, record: &str, listeners: &mut Vec<Box<dyn ReadListener>>) {
            if record.ends_with("Staff") {
                listeners.push(Box::new(Suffix("!")));
            }
        }

        fn excel_type(&self, _record: &str, mode: ExecMode) -> Option<ExcelType> {
            (mode == ExecMode::Read).then_some(ExcelType::Xls)
        }
    }

    #[test]
    fn test_registry_filters_by_record() {
        let registry = ListenerRegistry::new().with(TypedInit);
        assert_eq!(registry.read_listeners("app::Staff").len(), 1);
        assert_eq!(registry.read_listeners("app::Other").len(), 0);
        assert_eq!(registry.excel_type("x", ExecMode::Read), Some(ExcelType::Xls));
        assert_eq!(registry.excel_type("x", ExecMode::Write), None);
    }
}
