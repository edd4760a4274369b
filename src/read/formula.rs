//! Formula cells on import

use crate::error::ExcelResult;
use crate::types::CellValue;

/// Turns a formula cell into a value. `formula` is the text without the
/// leading `=`; `cached` is the result the producing application stored,
/// `Null` when it stored none.
pub trait FormulaReader: Send {
    fn read(&mut self, formula: &str, cached: &CellValue) -> ExcelResult<CellValue>;
}

impl<F> FormulaReader for F
where
    F: FnMut(&str, &CellValue) -> ExcelResult<CellValue> + Send,
{
    fn read(&mut self, formula: &str, cached: &CellValue) -> ExcelResult<CellValue> {
        self(formula, cached)
    }
}

/// Keeps the stored result and ignores the formula text
#[derive(Debug, Default, Clone, Copy)]
pub struct CachedValueFormulaReader;

impl FormulaReader for CachedValueFormulaReader {
    fn read(&mut self, _formula: &str, cached: &CellValue) -> ExcelResult<CellValue> {
        Ok(cached.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_reader_keeps_result() {
        let mut reader = CachedValueFormulaReader;
        let value = reader.read("SUM(A1:A3)", &CellValue::Float(6.0)).unwrap();
        assert_eq!(value, CellValue::Float(6.0));
    }

    #[test]
    fn test_closure_reader() {
        let mut reader = |formula: &str, _cached: &CellValue| Ok(CellValue::Text(formula.to_lowercase()));
        assert_eq!(
            FormulaReader::read(&mut reader, "SUM(A1)", &CellValue::Null).unwrap(),
            CellValue::Text("sum(a1)".into())
        );
    }
}
