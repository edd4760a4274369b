//! Template binding
//!
//! An export can carry a marker tying it to the schema that produced it: a
//! hidden, password-protected sheet whose first cell holds the SHA-256 of
//! the record's identifying key. Imports with template checking look for
//! that marker before decoding any row.

use crate::error::{ExcelError, ExcelResult};
use crate::stream::{SourceWorkbook, WorkbookSink};
use calamine::Data;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

/// Name of the marker sheet
pub const MARKER_SHEET: &str = "sheetbindKey";

/// Hex SHA-256 of an identifying key
pub fn digest(key: &str) -> String {
    Sha256::digest(key.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Add the marker sheet to an export
pub fn embed(sink: &mut WorkbookSink, key: &str) -> ExcelResult<()> {
    let hash = digest(key);
    let sheet = sink.add_auxiliary(MARKER_SHEET)?;
    sheet
        .write_string(0, 0, &hash)
        .map_err(|e| ExcelError::resource("Failed to write template marker", e))?;
    sheet.set_hidden(true);
    sheet.protect_with_password(&Uuid::new_v4().to_string());
    debug!(sheet = MARKER_SHEET, "template marker embedded");
    Ok(())
}

/// Check that a source carries the marker for `key`
pub fn verify(source: &mut SourceWorkbook, key: &str) -> ExcelResult<()> {
    if !source.has_sheet(MARKER_SHEET) {
        return Err(ExcelError::TemplateMismatch(
            "the file carries no template marker".to_string(),
        ));
    }
    let range = source.range(MARKER_SHEET)?;
    let stored = match range.get_value((0, 0)) {
        Some(Data::String(s)) => s.trim().to_string(),
        _ => String::new(),
    };
    if stored != digest(key) {
        return Err(ExcelError::TemplateMismatch(
            "the template marker does not match the expected key".to_string(),
        ));
    }
    debug!("template marker verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExcelSettings;
    use crate::types::ExcelType;
    use std::io::Cursor;

    fn open(bytes: Vec<u8>) -> SourceWorkbook {
        SourceWorkbook::open(Box::new(Cursor::new(bytes)), ExcelType::Xlsx, 2048).unwrap()
    }

    fn bound(key: &str) -> Vec<u8> {
        let mut sink = WorkbookSink::new(&ExcelSettings::default()).unwrap();
        sink.select("Sheet1").unwrap();
        embed(&mut sink, key).unwrap();
        sink.save_to_buffer().unwrap()
    }

    #[test]
    fn test_digest_is_sha256_hex() {
        assert_eq!(
            digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_is_repeatable() {
        let mut source = open(bound("staff-v1"));
        verify(&mut source, "staff-v1").unwrap();
        verify(&mut source, "staff-v1").unwrap();
    }

    #[test]
    fn test_wrong_key_is_mismatch() {
        let mut source = open(bound("staff-v1"));
        assert!(matches!(
            verify(&mut source, "staff-v2"),
            Err(ExcelError::TemplateMismatch(_))
        ));
    }

    #[test]
    fn test_tampered_marker_is_mismatch() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        workbook.add_worksheet().set_name("Sheet1").unwrap();
        let marker = workbook.add_worksheet();
        marker.set_name(MARKER_SHEET).unwrap();
        marker.write_string(0, 0, "0000").unwrap();
        let mut source = open(workbook.save_to_buffer().unwrap());
        assert!(matches!(
            verify(&mut source, "staff-v1"),
            Err(ExcelError::TemplateMismatch(_))
        ));
    }

    #[test]
    fn test_missing_marker_is_mismatch() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        workbook.add_worksheet().set_name("Sheet1").unwrap();
        let mut source = open(workbook.save_to_buffer().unwrap());
        assert!(matches!(
            verify(&mut source, "anything"),
            Err(ExcelError::TemplateMismatch(_))
        ));
    }
}
