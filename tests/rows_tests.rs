//! Untyped rows under run-time headers, and sheet protection

use pretty_assertions::assert_eq;
use royalbit_sheetbind::listener::{CellEvent, ReadListener, RowEvent};
use royalbit_sheetbind::schema::RecordView;
use royalbit_sheetbind::{
    CellValue, Column, ExcelError, ExcelSettings, ExcelType, HeaderMergeListener, ListenerRegistry, RowReader,
    RowType, RowWriter, SchemaStyleListener, SheetLockListener, Title, WriteListener,
};
use rust_xlsxwriter::Workbook;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};

fn writer() -> RowWriter {
    RowWriter::with_registry(ExcelSettings::default(), &ListenerRegistry::new()).unwrap()
}

fn reader(bytes: Vec<u8>) -> RowReader {
    RowReader::from_reader(
        Cursor::new(bytes),
        ExcelType::Xlsx,
        ExcelSettings::default(),
        &ListenerRegistry::new(),
    )
    .unwrap()
}

fn text(s: &str) -> CellValue {
    CellValue::Text(s.to_string())
}

fn contacts() -> Vec<Vec<CellValue>> {
    vec![
        vec![text("Dee"), text("555"), text("d@x")],
        vec![text("Eli"), text("556"), text("e@x")],
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
// ROUND TRIPS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_rows_round_trip_with_title_and_merged_header() {
    let mut w = writer()
        .head(vec![["Name", "Name"], ["Contact", "Phone"], ["Contact", "Mail"]])
        .unwrap()
        .listener(SchemaStyleListener::new())
        .listener(HeaderMergeListener::new());
    w.write_title(&Title::new("Contacts")).unwrap();
    w.write(&contacts()).unwrap();
    let bytes = w.flush_to_buffer().unwrap().unwrap();

    // two title rows, then the header on rows 2 and 3
    let back = reader(bytes).check_with("").read_rows(3, "Sheet1");
    assert!(matches!(back, Err(ExcelError::Resource(_))));

    let mut w = writer()
        .head(vec![["Name", "Name"], ["Contact", "Phone"], ["Contact", "Mail"]])
        .unwrap()
        .listener(HeaderMergeListener::new())
        .bind("contacts-v1");
    w.write_title(&Title::new("Contacts")).unwrap();
    w.write(&contacts()).unwrap();
    let bytes = w.flush_to_buffer().unwrap().unwrap();

    let rows = reader(bytes).check_with("contacts-v1").read_rows(3, "Sheet1").unwrap();
    assert_eq!(rows, contacts());
}

#[test]
fn test_short_rows_pad_and_long_rows_truncate() {
    let mut w = writer().head(vec![["A"], ["B"]]).unwrap();
    w.write(&[vec![CellValue::Int(1)], vec![CellValue::Int(2), CellValue::Int(3), CellValue::Int(4)]])
        .unwrap();
    let bytes = w.flush_to_buffer().unwrap().unwrap();

    let rows = reader(bytes).read().unwrap();
    assert_eq!(
        rows,
        vec![
            vec![CellValue::Float(1.0), CellValue::Null],
            vec![CellValue::Float(2.0), CellValue::Float(3.0)],
        ]
    );
}

#[test]
fn test_ignored_header_columns_are_left_out() {
    let mut w = writer().head(vec![["Name"], ["Secret"], ["Mail"]]).unwrap();
    w.write(&[vec![text("Dee"), text("hunter2"), text("d@x")]]).unwrap();
    let bytes = w.flush_to_buffer().unwrap().unwrap();

    let rows = reader(bytes).ignores(&["Secret"]).read().unwrap();
    assert_eq!(rows, vec![vec![text("Dee"), text("d@x")]]);
}

#[test]
fn test_columns_follow_declared_order() {
    let mut w = writer()
        .columns(vec![Column::new(["Second"]).order(2), Column::new(["First"]).order(1)])
        .unwrap();
    w.write(&[vec![text("one"), text("two")]]).unwrap();
    let bytes = w.flush_to_buffer().unwrap().unwrap();

    let seen = Labels::default();
    let rows = reader(bytes).listener(seen.clone()).read().unwrap();
    assert_eq!(rows, vec![vec![text("one"), text("two")]]);
    assert_eq!(*seen.head.lock().unwrap(), vec!["First".to_string(), "Second".to_string()]);
}

#[test]
fn test_sheets_read_one_after_another() {
    let mut w = writer().head(vec![["Item"]]).unwrap();
    w.write_to_sheet(&[vec![text("a")]], "Left", true).unwrap();
    w.write_to_sheet(&[vec![text("b")]], "Right", true).unwrap();
    w.write_to_sheet(&[vec![text("c")]], "Left", false).unwrap();
    let bytes = w.unbind().flush_to_buffer().unwrap().unwrap();

    let mut r = reader(bytes);
    assert_eq!(r.sheet_names().unwrap(), vec!["Left".to_string(), "Right".to_string()]);
    assert_eq!(r.read_rows(0, "Left").unwrap(), vec![vec![text("a")], vec![text("c")]]);
    assert_eq!(r.read_rows(0, "Right").unwrap(), vec![vec![text("b")]]);
    assert!(matches!(r.read_rows(0, "Nope"), Err(ExcelError::SheetNotFound(_))));
    // the failed read released the source
    assert!(r.sheet_names().is_err());
}

// ═══════════════════════════════════════════════════════════════════════════
// LISTENERS
// ═══════════════════════════════════════════════════════════════════════════

/// Header labels, pre-header values and body row views
#[derive(Clone, Default)]
struct Labels {
    head: Arc<Mutex<Vec<String>>>,
    other: Arc<Mutex<Vec<String>>>,
    mails: Arc<Mutex<Vec<String>>>,
}

impl ReadListener for Labels {
    fn read_cell(&mut self, value: CellValue, cell: &CellEvent) -> CellValue {
        match cell.row_type {
            RowType::Head => self.head.lock().unwrap().push(value.as_text()),
            RowType::Other if !value.is_blank() => self.other.lock().unwrap().push(value.as_text()),
            _ => {}
        }
        value
    }

    fn read_row(&mut self, row: &RowEvent, record: Option<&dyn RecordView>) -> bool {
        if let (RowType::Body, Some(view)) = (row.row_type, record) {
            if let Some(mail) = view.field("Mail") {
                self.mails.lock().unwrap().push(mail.as_text());
            }
        }
        true
    }
}

#[test]
fn test_row_listeners_see_title_and_labelled_rows() {
    let mut w = writer().head(vec![["Name"], ["Phone"], ["Mail"]]).unwrap();
    w.write_title(&Title::new("Contacts")).unwrap();
    w.write(&contacts()).unwrap();
    let bytes = w.flush_to_buffer().unwrap().unwrap();

    let seen = Labels::default();
    let rows = reader(bytes).read_other(true).listener(seen.clone()).read_rows(2, "Sheet1").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(*seen.other.lock().unwrap(), vec!["Contacts".to_string()]);
    assert_eq!(*seen.mails.lock().unwrap(), vec!["d@x".to_string(), "e@x".to_string()]);
}

struct Veto;

impl WriteListener for Veto {
    fn flush_before(&mut self, _workbook: &mut Workbook) -> bool {
        false
    }
}

#[test]
fn test_row_flush_gate() {
    let mut w = writer().head(vec![["A"]]).unwrap().listener(Veto);
    w.write(&[vec![CellValue::Int(1)]]).unwrap();
    assert_eq!(w.flush_to_buffer().unwrap(), None);
}

// ═══════════════════════════════════════════════════════════════════════════
// SHEET PROTECTION
// ═══════════════════════════════════════════════════════════════════════════

fn sheet_xml(bytes: Vec<u8>, name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut xml = String::new();
    archive.by_name(name).unwrap().read_to_string(&mut xml).unwrap();
    xml
}

#[test]
fn test_locked_sheets_carry_protection() {
    let lock = SheetLockListener::new("abc123").unwrap();
    let mut w = writer().head(vec![["A"]]).unwrap().listener(lock).unbind();
    w.write(&[vec![CellValue::Int(1)]]).unwrap();
    w.write_to_sheet(&[vec![CellValue::Int(2)]], "Second", true).unwrap();
    let bytes = w.flush_to_buffer().unwrap().unwrap();

    assert!(sheet_xml(bytes.clone(), "xl/worksheets/sheet1.xml").contains("<sheetProtection"));
    assert!(sheet_xml(bytes.clone(), "xl/worksheets/sheet2.xml").contains("<sheetProtection"));

    // protection does not get in the way of reading
    assert_eq!(reader(bytes).read().unwrap(), vec![vec![CellValue::Float(1.0)]]);
}

#[test]
fn test_unlocked_sheets_have_no_protection() {
    let mut w = writer().head(vec![["A"]]).unwrap().unbind();
    w.write(&[vec![CellValue::Int(1)]]).unwrap();
    let bytes = w.flush_to_buffer().unwrap().unwrap();
    assert!(!sheet_xml(bytes, "xl/worksheets/sheet1.xml").contains("<sheetProtection"));
}

#[test]
fn test_empty_lock_password_rejected() {
    assert!(matches!(SheetLockListener::new(""), Err(ExcelError::Config(_))));
}
