use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

//==============================================================================
// Cell values
//==============================================================================

/// A native value travelling between a record field and a spreadsheet cell
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    /// Absent or blank
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Enum variant written as its text label
    Enum(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// Not representable in a single cell without a conversion
    List(Vec<CellValue>),
}

impl CellValue {
    /// Kind of the value, `None` for `Null`
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            CellValue::Null => None,
            CellValue::Bool(_) => Some(ValueKind::Bool),
            CellValue::Int(_) => Some(ValueKind::Int),
            CellValue::Float(_) => Some(ValueKind::Float),
            CellValue::Text(_) => Some(ValueKind::Text),
            CellValue::Enum(_) => Some(ValueKind::Enum),
            CellValue::Date(_) => Some(ValueKind::Date),
            CellValue::DateTime(_) => Some(ValueKind::DateTime),
            CellValue::List(_) => Some(ValueKind::List),
        }
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        self.kind().map(|k| k.name()).unwrap_or("Null")
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Null, or text that is empty after trimming
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            CellValue::Text(s) => s.trim().parse().ok(),
            CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Date(d) => Some(crate::convert::date_to_serial(*d)),
            CellValue::DateTime(dt) => Some(crate::convert::datetime_to_serial(*dt)),
            _ => None,
        }
    }

    /// Text rendering, Excel style (integral floats print without decimals)
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Text(s) | CellValue::Enum(s) => s.clone(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            CellValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            CellValue::List(items) => {
                let strs: Vec<String> = items.iter().map(|v| v.as_text()).collect();
                format!("[{}]", strs.join(", "))
            }
        }
    }

    /// Try to convert to boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            CellValue::Int(i) => Some(*i != 0),
            CellValue::Float(n) => Some(*n != 0.0),
            CellValue::Text(s) => {
                let upper = s.trim().to_uppercase();
                if upper == "TRUE" || upper == "1" {
                    Some(true)
                } else if upper == "FALSE" || upper == "0" {
                    Some(false)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Check if value is truthy
    pub fn is_truthy(&self) -> bool {
        self.as_bool().unwrap_or(false)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Float(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Int(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

/// Declared kind of a record field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    Enum,
    Date,
    DateTime,
    List,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Bool => "Bool",
            ValueKind::Int => "Int",
            ValueKind::Float => "Float",
            ValueKind::Text => "Text",
            ValueKind::Enum => "Enum",
            ValueKind::Date => "Date",
            ValueKind::DateTime => "DateTime",
            ValueKind::List => "List",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

//==============================================================================
// Row / workbook enums
//==============================================================================

/// Where a row sits relative to the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowType {
    /// Rows before the header (titles, notes)
    Other,
    Head,
    Body,
}

/// Spreadsheet container kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExcelType {
    /// Legacy BIFF8 container
    Xls,
    /// Office Open XML container
    Xlsx,
}

impl ExcelType {
    pub fn extension(self) -> &'static str {
        match self {
            ExcelType::Xls => "xls",
            ExcelType::Xlsx => "xlsx",
        }
    }

    /// Detect the kind from a file name extension
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.').map(|(_, ext)| ext)?;
        match ext.to_ascii_lowercase().as_str() {
            "xls" => Some(ExcelType::Xls),
            "xlsx" => Some(ExcelType::Xlsx),
            _ => None,
        }
    }
}

/// Column placement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrMode {
    /// Next column takes the next free cell, in schema order
    #[default]
    Sort,
    /// Each column sits at its explicit index, gaps stay blank
    Index,
}

/// Which codec an initializer is being asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecMode {
    Write,
    Read,
}

/// Palette used by schema color metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcelColor {
    None,
    Black,
    White,
    Lime,
    Gray,
    Silver,
    Blue,
    Navy,
    Green,
    Red,
    Orange,
    Yellow,
    Purple,
    Pink,
    Brown,
    Cyan,
    Magenta,
    Rgb(u32),
}

impl ExcelColor {
    /// Fill/font color for rust_xlsxwriter, `None` means "leave unset"
    pub fn to_xlsx(self) -> Option<rust_xlsxwriter::Color> {
        use rust_xlsxwriter::Color;
        let color = match self {
            ExcelColor::None => return None,
            ExcelColor::Black => Color::Black,
            ExcelColor::White => Color::White,
            ExcelColor::Lime => Color::Lime,
            ExcelColor::Gray => Color::Gray,
            ExcelColor::Silver => Color::Silver,
            ExcelColor::Blue => Color::Blue,
            ExcelColor::Navy => Color::Navy,
            ExcelColor::Green => Color::Green,
            ExcelColor::Red => Color::Red,
            ExcelColor::Orange => Color::Orange,
            ExcelColor::Yellow => Color::Yellow,
            ExcelColor::Purple => Color::Purple,
            ExcelColor::Pink => Color::Pink,
            ExcelColor::Brown => Color::Brown,
            ExcelColor::Cyan => Color::Cyan,
            ExcelColor::Magenta => Color::Magenta,
            ExcelColor::Rgb(rgb) => Color::RGB(rgb),
        };
        Some(color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_text_integral_float() {
        assert_eq!(CellValue::Float(3.0).as_text(), "3");
        assert_eq!(CellValue::Float(2.5).as_text(), "2.5");
        assert_eq!(CellValue::Bool(true).as_text(), "TRUE");
        assert_eq!(CellValue::Null.as_text(), "");
    }

    #[test]
    fn test_is_blank() {
        assert!(CellValue::Null.is_blank());
        assert!(CellValue::Text("   ".to_string()).is_blank());
        assert!(!CellValue::Int(0).is_blank());
    }

    #[test]
    fn test_excel_type_from_file_name() {
        assert_eq!(ExcelType::from_file_name("a.xlsx"), Some(ExcelType::Xlsx));
        assert_eq!(ExcelType::from_file_name("b.XLS"), Some(ExcelType::Xls));
        assert_eq!(ExcelType::from_file_name("c.csv"), None);
        assert_eq!(ExcelType::from_file_name("noext"), None);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(CellValue::Null.type_name(), "Null");
        assert_eq!(CellValue::Enum("A".into()).type_name(), "Enum");
        assert_eq!(ValueKind::DateTime.to_string(), "DateTime");
    }
}
