//! Failure paths: template binding, type mismatches, assertions, released
//! workbooks

use royalbit_sheetbind::schema::{Column, FieldBinding, Record, SheetAttr};
use royalbit_sheetbind::{ExcelError, ExcelReader, ExcelSettings, ExcelType, ExcelWriter, ListenerRegistry, Title};
use std::io::Cursor;

#[derive(Debug, Default, Clone, PartialEq)]
struct Reading {
    label: String,
    value: String,
}

impl Record for Reading {
    fn bindings() -> Vec<FieldBinding<Self>> {
        vec![
            FieldBinding::new("label", |r: &Reading| &r.label, |r, v| r.label = v)
                .column(Column::new(["Label"])),
            FieldBinding::new("value", |r: &Reading| &r.value, |r, v| r.value = v)
                .column(Column::new(["Value"])),
        ]
    }
}

/// Same headers as [`Reading`], numeric value
#[derive(Debug, Default, Clone, PartialEq)]
struct Measured {
    label: String,
    value: i64,
}

impl Record for Measured {
    fn bindings() -> Vec<FieldBinding<Self>> {
        vec![
            FieldBinding::new("label", |m: &Measured| &m.label, |m, v| m.label = v)
                .column(Column::new(["Label"])),
            FieldBinding::new("value", |m: &Measured| &m.value, |m, v| m.value = v)
                .column(Column::new(["Value"])),
        ]
    }
}

/// [`Measured`] with a sign check on the value
#[derive(Debug, Default, Clone, PartialEq)]
struct Checked {
    label: String,
    value: i64,
}

impl Record for Checked {
    fn bindings() -> Vec<FieldBinding<Self>> {
        vec![
            FieldBinding::new("label", |c: &Checked| &c.label, |c, v| c.label = v)
                .column(Column::new(["Label"])),
            FieldBinding::new("value", |c: &Checked| &c.value, |c, v| c.value = v)
                .column(Column::new(["Value"]))
                .assert("value >= 0", "value must not be negative"),
        ]
    }
}

#[derive(Debug, Default)]
struct Legacy {
    code: String,
}

impl Record for Legacy {
    fn bindings() -> Vec<FieldBinding<Self>> {
        vec![FieldBinding::new("code", |l: &Legacy| &l.code, |l, v| l.code = v).column(Column::new(["Code"]))]
    }

    fn sheet() -> SheetAttr {
        SheetAttr {
            excel_type: ExcelType::Xls,
            ..Default::default()
        }
    }
}

fn readings(values: &[&str]) -> Vec<Reading> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| Reading {
            label: format!("r{}", i + 1),
            value: v.to_string(),
        })
        .collect()
}

fn export(writer: ExcelWriter<Reading>, rows: &[Reading]) -> Vec<u8> {
    let mut writer = writer;
    writer.write(rows).unwrap();
    writer.flush_to_buffer().unwrap().unwrap()
}

fn writer() -> ExcelWriter<Reading> {
    ExcelWriter::<Reading>::with_registry(ExcelSettings::default(), &ListenerRegistry::new(), &[]).unwrap()
}

fn reader<R: Record>(bytes: Vec<u8>) -> ExcelReader<R> {
    ExcelReader::<R>::from_reader(
        Cursor::new(bytes),
        ExcelType::Xlsx,
        ExcelSettings::default(),
        &ListenerRegistry::new(),
        &[],
    )
    .unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// TEMPLATE BINDING
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_bound_export_verifies_under_its_key() {
    let bytes = export(writer().id_card("readings-v2"), &readings(&["1"]));

    let back = reader::<Reading>(bytes.clone())
        .check_with("readings-v2")
        .read_records(0, "Sheet1")
        .unwrap();
    assert_eq!(back, readings(&["1"]));

    // the record's own key is not the one the export was bound to
    let err = reader::<Reading>(bytes).check(true).read_records(0, "Sheet1").unwrap_err();
    assert!(matches!(err, ExcelError::TemplateMismatch(_)));
}

#[test]
fn test_unbound_export_fails_the_check() {
    let bytes = export(writer().unbind(), &readings(&["1"]));

    let err = reader::<Reading>(bytes.clone()).check(true).read_records(0, "Sheet1").unwrap_err();
    assert!(matches!(err, ExcelError::TemplateMismatch(_)));
    assert!(err.is_fail_fast());

    // without checking the same bytes read fine
    assert_eq!(reader::<Reading>(bytes).read_records(0, "Sheet1").unwrap().len(), 1);
}

#[test]
fn test_empty_check_key_is_a_resource_error() {
    let bytes = export(writer(), &readings(&["1"]));
    let err = reader::<Reading>(bytes).check_with("").read_records(0, "Sheet1").unwrap_err();
    assert!(matches!(err, ExcelError::Resource(_)));
}

#[test]
fn test_check_runs_on_every_read() {
    let bytes = export(writer(), &readings(&["1"]));
    let mut r = reader::<Reading>(bytes).check(true);
    assert_eq!(r.read_records(0, "Sheet1").unwrap().len(), 1);
    assert_eq!(r.read_records(0, "Sheet1").unwrap().len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// DECODING FAILURES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_text_into_integer_is_a_type_mismatch() {
    let bytes = export(writer(), &readings(&["12", "twelve"]));
    let err = reader::<Measured>(bytes).read_records(0, "Sheet1").unwrap_err();
    match err {
        ExcelError::TypeMismatch {
            row,
            column,
            field,
            source_type,
            target_type,
        } => {
            assert_eq!((row, column), (2, 1));
            assert_eq!(field, "value");
            assert_eq!(source_type, "Text");
            assert_eq!(target_type, "Int");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_numeric_text_is_coerced() {
    let bytes = export(writer(), &readings(&["12", " 7 "]));
    let back = reader::<Measured>(bytes).read_records(0, "Sheet1").unwrap();
    let values: Vec<i64> = back.iter().map(|m| m.value).collect();
    assert_eq!(values, vec![12, 7]);
}

#[test]
fn test_failed_assertion_names_the_cell_and_releases() {
    let bytes = export(writer(), &readings(&["3", "-4"]));
    let mut r = reader::<Checked>(bytes);
    let err = r.read_records(0, "Sheet1").unwrap_err();
    match err {
        ExcelError::Assertion {
            row,
            column,
            field,
            message,
        } => {
            assert_eq!((row, column), (2, 1));
            assert_eq!(field, "value");
            assert_eq!(message, "value must not be negative");
        }
        other => panic!("unexpected {:?}", other),
    }

    // the failure released the source
    assert!(matches!(r.read_records(0, "Sheet1"), Err(ExcelError::Resource(_))));
    assert!(r.sheet_names().is_err());
}

#[test]
fn test_missing_sheet() {
    let bytes = export(writer(), &readings(&["1"]));
    let err = reader::<Reading>(bytes).read_records(0, "Nope").unwrap_err();
    assert!(matches!(err, ExcelError::SheetNotFound(ref name) if name == "Nope"));
}

// ═══════════════════════════════════════════════════════════════════════════
// WRITER FAILURES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_xls_export_is_refused() {
    let err = ExcelWriter::<Legacy>::with_registry(ExcelSettings::default(), &ListenerRegistry::new(), &[])
        .unwrap_err();
    assert!(matches!(err, ExcelError::Resource(_)));
}

#[test]
fn test_reversed_title_columns() {
    let mut w = writer();
    let err = w.write_title(&Title::new("Readings").cols(3, 1)).unwrap_err();
    assert!(matches!(err, ExcelError::Config(_)));
    assert!(matches!(w.flush_to_buffer(), Err(ExcelError::Resource(_))));
}

#[test]
fn test_invalid_settings_rejected() {
    let settings = ExcelSettings {
        cache_rows: 0,
        ..ExcelSettings::default()
    };
    let err = ExcelWriter::<Reading>::with_registry(settings, &ListenerRegistry::new(), &[]).unwrap_err();
    assert!(matches!(err, ExcelError::Config(_)));
}
