//! Typed field accessors
//!
//! A [`FieldBinding`] pairs a field name with type-erased getter/setter
//! closures so the codecs can move [`CellValue`]s in and out of a record
//! without knowing its concrete field types.

use super::{Column, ColumnSchema, ROW_RECORD};
use crate::types::{CellValue, ValueKind};
use chrono::{NaiveDate, NaiveDateTime};
use std::any::Any;
use std::sync::Arc;

//==============================================================================
// Field types
//==============================================================================

/// A Rust type that can live in a record field bound to a column
pub trait FieldType: Sized + 'static {
    /// Declared kind used for read-side coercion
    const KIND: ValueKind;

    fn to_cell(&self) -> CellValue;

    /// `None` when the (already coerced) value does not fit this type
    fn from_cell(value: CellValue) -> Option<Self>;
}

macro_rules! int_field {
    ($($t:ty),*) => {$(
        impl FieldType for $t {
            const KIND: ValueKind = ValueKind::Int;

            /// Values past `i64::MAX` fall back to a float
            fn to_cell(&self) -> CellValue {
                i64::try_from(*self).map_or(CellValue::Float(*self as f64), CellValue::Int)
            }

            fn from_cell(value: CellValue) -> Option<Self> {
                match value {
                    CellValue::Int(i) => <$t>::try_from(i).ok(),
                    _ => None,
                }
            }
        }
    )*};
}

int_field!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

impl FieldType for f64 {
    const KIND: ValueKind = ValueKind::Float;

    fn to_cell(&self) -> CellValue {
        CellValue::Float(*self)
    }

    fn from_cell(value: CellValue) -> Option<Self> {
        match value {
            CellValue::Float(f) => Some(f),
            _ => None,
        }
    }
}

impl FieldType for f32 {
    const KIND: ValueKind = ValueKind::Float;

    fn to_cell(&self) -> CellValue {
        CellValue::Float(*self as f64)
    }

    fn from_cell(value: CellValue) -> Option<Self> {
        match value {
            CellValue::Float(f) => Some(f as f32),
            _ => None,
        }
    }
}

impl FieldType for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn to_cell(&self) -> CellValue {
        CellValue::Bool(*self)
    }

    fn from_cell(value: CellValue) -> Option<Self> {
        match value {
            CellValue::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl FieldType for String {
    const KIND: ValueKind = ValueKind::Text;

    fn to_cell(&self) -> CellValue {
        CellValue::Text(self.clone())
    }

    fn from_cell(value: CellValue) -> Option<Self> {
        match value {
            CellValue::Text(s) | CellValue::Enum(s) => Some(s),
            _ => None,
        }
    }
}

impl FieldType for NaiveDate {
    const KIND: ValueKind = ValueKind::Date;

    fn to_cell(&self) -> CellValue {
        CellValue::Date(*self)
    }

    fn from_cell(value: CellValue) -> Option<Self> {
        match value {
            CellValue::Date(d) => Some(d),
            _ => None,
        }
    }
}

impl FieldType for NaiveDateTime {
    const KIND: ValueKind = ValueKind::DateTime;

    fn to_cell(&self) -> CellValue {
        CellValue::DateTime(*self)
    }

    fn from_cell(value: CellValue) -> Option<Self> {
        match value {
            CellValue::DateTime(dt) => Some(dt),
            _ => None,
        }
    }
}

impl<T: FieldType> FieldType for Option<T> {
    const KIND: ValueKind = T::KIND;

    fn to_cell(&self) -> CellValue {
        match self {
            Some(v) => v.to_cell(),
            None => CellValue::Null,
        }
    }

    fn from_cell(value: CellValue) -> Option<Self> {
        if value.is_null() {
            return Some(None);
        }
        T::from_cell(value).map(Some)
    }
}

impl<T: FieldType> FieldType for Vec<T> {
    const KIND: ValueKind = ValueKind::List;

    fn to_cell(&self) -> CellValue {
        CellValue::List(self.iter().map(FieldType::to_cell).collect())
    }

    fn from_cell(value: CellValue) -> Option<Self> {
        match value {
            CellValue::List(items) => items.into_iter().map(T::from_cell).collect(),
            _ => None,
        }
    }
}

/// Implement [`FieldType`] for enums that round-trip through `Display` and
/// `FromStr`; the variant is written as its text label.
///
/// ```ignore
/// enum_field!(Gender, Status);
/// ```
#[macro_export]
macro_rules! enum_field {
    ($($t:ty),+ $(,)?) => {$(
        impl $crate::schema::FieldType for $t {
            const KIND: $crate::types::ValueKind = $crate::types::ValueKind::Enum;

            fn to_cell(&self) -> $crate::types::CellValue {
                $crate::types::CellValue::Enum(self.to_string())
            }

            fn from_cell(value: $crate::types::CellValue) -> Option<Self> {
                match value {
                    $crate::types::CellValue::Enum(s) | $crate::types::CellValue::Text(s) => {
                        s.trim().parse().ok()
                    }
                    _ => None,
                }
            }
        }
    )+};
}

//==============================================================================
// Bindings
//==============================================================================

/// Field-level assertion evaluated on read
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub expr: String,
    pub message: String,
}

type Getter<R> = Arc<dyn Fn(&R) -> CellValue + Send + Sync>;
type Setter<R> = Arc<dyn Fn(&mut R, CellValue) -> bool + Send + Sync>;

/// One record field, its column metadata and its accessors
pub struct FieldBinding<R> {
    pub(crate) name: &'static str,
    pub(crate) kind: ValueKind,
    pub(crate) column: Option<Column>,
    pub(crate) read_expr: Option<String>,
    pub(crate) write_expr: Option<String>,
    pub(crate) assertion: Option<Assertion>,
    get: Getter<R>,
    set: Setter<R>,
}

impl<R> Clone for FieldBinding<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            kind: self.kind,
            column: self.column.clone(),
            read_expr: self.read_expr.clone(),
            write_expr: self.write_expr.clone(),
            assertion: self.assertion.clone(),
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
        }
    }
}

impl<R> std::fmt::Debug for FieldBinding<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldBinding")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("column", &self.column)
            .finish_non_exhaustive()
    }
}

impl<R: 'static> FieldBinding<R> {
    /// Bind a field through a borrow-getter and a setter.
    ///
    /// ```ignore
    /// FieldBinding::new("age", |p: &Person| &p.age, |p, v| p.age = v)
    /// ```
    pub fn new<T: FieldType>(name: &'static str, get: fn(&R) -> &T, set: fn(&mut R, T)) -> Self {
        Self {
            name,
            kind: T::KIND,
            column: None,
            read_expr: None,
            write_expr: None,
            assertion: None,
            get: Arc::new(move |record| get(record).to_cell()),
            set: Arc::new(move |record, value| match T::from_cell(value) {
                Some(v) => {
                    set(record, v);
                    true
                }
                None => false,
            }),
        }
    }

    /// Map the field to a spreadsheet column; unmapped fields are skipped
    /// by the codecs but stay visible to expressions.
    pub fn column(mut self, column: Column) -> Self {
        self.column = Some(column);
        self
    }

    /// Expression applied to the decoded value before it is assigned
    pub fn read_expr(mut self, expr: impl Into<String>) -> Self {
        self.read_expr = Some(expr.into());
        self
    }

    /// Expression producing the cell value on export
    pub fn write_expr(mut self, expr: impl Into<String>) -> Self {
        self.write_expr = Some(expr.into());
        self
    }

    /// Expression that must evaluate to `TRUE` for the cell to be accepted
    pub fn assert(mut self, expr: impl Into<String>, message: impl Into<String>) -> Self {
        self.assertion = Some(Assertion {
            expr: expr.into(),
            message: message.into(),
        });
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn column_attr(&self) -> Option<&Column> {
        self.column.as_ref()
    }

    pub fn get(&self, record: &R) -> CellValue {
        (self.get)(record)
    }

    /// Assign a value of the declared kind; `false` when it does not fit
    pub fn set(&self, record: &mut R, value: CellValue) -> bool {
        (self.set)(record, value)
    }

    /// Re-home this binding onto a record that embeds `R`
    pub fn lift<C: 'static>(self, part: fn(&C) -> &R, part_mut: fn(&mut C) -> &mut R) -> FieldBinding<C> {
        let get = self.get;
        let set = self.set;
        FieldBinding {
            name: self.name,
            kind: self.kind,
            column: self.column,
            read_expr: self.read_expr,
            write_expr: self.write_expr,
            assertion: self.assertion,
            get: Arc::new(move |record| get(part(record))),
            set: Arc::new(move |record, value| set(part_mut(record), value)),
        }
    }
}

//==============================================================================
// Record views
//==============================================================================

/// Type-erased read access to a record, handed to listeners
pub trait RecordView {
    fn type_name(&self) -> &'static str;

    /// Current value of a bound field by name
    fn field(&self, name: &str) -> Option<CellValue>;

    fn as_any(&self) -> &dyn Any;
}

impl dyn RecordView + '_ {
    /// Recover the concrete record
    pub fn downcast_ref<R: 'static>(&self) -> Option<&R> {
        self.as_any().downcast_ref::<R>()
    }
}

/// A record together with the bindings that can read it
pub struct RecordRef<'a, R> {
    record: &'a R,
    fields: &'a [FieldBinding<R>],
}

impl<'a, R> RecordRef<'a, R> {
    pub fn new(record: &'a R, fields: &'a [FieldBinding<R>]) -> Self {
        Self { record, fields }
    }
}

impl<R: 'static> RecordView for RecordRef<'_, R> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<R>()
    }

    fn field(&self, name: &str) -> Option<CellValue> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.get(self.record))
    }

    fn as_any(&self) -> &dyn Any {
        self.record
    }
}

/// An untyped row together with the columns it was written under
pub struct RowRef<'a> {
    cells: &'a Vec<CellValue>,
    columns: &'a [ColumnSchema],
}

impl<'a> RowRef<'a> {
    pub fn new(cells: &'a Vec<CellValue>, columns: &'a [ColumnSchema]) -> Self {
        Self { cells, columns }
    }
}

impl RecordView for RowRef<'_> {
    fn type_name(&self) -> &'static str {
        ROW_RECORD
    }

    /// Cell under the column whose innermost label is `name`
    fn field(&self, name: &str) -> Option<CellValue> {
        let pos = self.columns.iter().position(|c| c.title() == name)?;
        Some(self.cells.get(pos).cloned().unwrap_or(CellValue::Null))
    }

    fn as_any(&self) -> &dyn Any {
        self.cells
    }
}
