//! Schema resolution
//!
//! A record type declares its fields once through [`Record::bindings`]; the
//! resolver turns that declaration into the ordered column list both codecs
//! and the header layout work from.

pub mod field;

pub use field::{Assertion, FieldBinding, FieldType, RecordRef, RecordView, RowRef};

use crate::error::{ExcelError, ExcelResult};
use crate::types::{ExcelColor, ExcelType, ValueKind};
use tracing::debug;

/// Default column width, in characters
pub const DEFAULT_COLUMN_WIDTH: f64 = 20.0;

/// Record name of untyped rows, as seen by listeners and initializers
pub const ROW_RECORD: &str = "rows";

//==============================================================================
// Declarations
//==============================================================================

/// A type whose instances map to spreadsheet rows
pub trait Record: Default + 'static {
    /// Fields declared directly on this type
    fn bindings() -> Vec<FieldBinding<Self>>;

    /// Fields of embedded ancestor records, see [`inherit`]
    fn parent_bindings() -> Vec<FieldBinding<Self>> {
        Vec::new()
    }

    /// Sheet-level attributes
    fn sheet() -> SheetAttr {
        SheetAttr::default()
    }
}

/// Bindings of an embedded ancestor record (own and inherited), re-homed
/// onto the child.
pub fn inherit<P: Record, C: 'static>(
    part: fn(&C) -> &P,
    part_mut: fn(&mut C) -> &mut P,
) -> Vec<FieldBinding<C>> {
    P::bindings()
        .into_iter()
        .chain(P::parent_bindings())
        .map(|b| b.lift(part, part_mut))
        .collect()
}

/// Column metadata attached to a field
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// One label per header level, outermost first
    pub headers: Vec<String>,
    /// Width in characters
    pub width: f64,
    /// Explicit position, used in index mode
    pub index: u16,
    /// Number format applied to body cells
    pub format: Option<String>,
    /// Header fill per level, last entry reused
    pub colors: Vec<ExcelColor>,
    /// Header font color per level, last entry reused
    pub font_colors: Vec<ExcelColor>,
    pub required: bool,
    pub trim: bool,
    pub order: i32,
}

impl Column {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            width: DEFAULT_COLUMN_WIDTH,
            index: 0,
            format: None,
            colors: vec![ExcelColor::Lime],
            font_colors: vec![ExcelColor::Black],
            required: false,
            trim: false,
            order: 0,
        }
    }

    pub fn width(mut self, width: f64) -> Self {
        self.width = width;
        self
    }

    pub fn index(mut self, index: u16) -> Self {
        self.index = index;
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn colors(mut self, colors: impl Into<Vec<ExcelColor>>) -> Self {
        self.colors = colors.into();
        self
    }

    pub fn font_colors(mut self, colors: impl Into<Vec<ExcelColor>>) -> Self {
        self.font_colors = colors.into();
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

/// Sheet-level attributes of a record type.
///
/// Unset sizes fall back to [`crate::config::ExcelSettings`].
#[derive(Debug, Clone, PartialEq)]
pub struct SheetAttr {
    /// Output file name (without extension)
    pub name: Option<String>,
    pub excel_type: ExcelType,
    pub window_size: Option<usize>,
    pub cache_rows: Option<usize>,
    pub buffer_size: Option<usize>,
    /// Header row height in points
    pub header_height: Option<f64>,
    /// Body row height in points
    pub body_height: Option<f64>,
    /// Identifying key for template binding
    pub id_card: Option<String>,
}

impl Default for SheetAttr {
    fn default() -> Self {
        Self {
            name: None,
            excel_type: ExcelType::Xlsx,
            window_size: None,
            cache_rows: None,
            buffer_size: None,
            header_height: None,
            body_height: None,
            id_card: None,
        }
    }
}

//==============================================================================
// Resolved schema
//==============================================================================

/// One resolved column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    /// Bound field name, empty on untyped row columns
    pub field: &'static str,
    pub kind: ValueKind,
    pub headers: Vec<String>,
    pub width: f64,
    pub index: u16,
    pub format: Option<String>,
    pub colors: Vec<ExcelColor>,
    pub font_colors: Vec<ExcelColor>,
    pub required: bool,
    pub trim: bool,
    pub order: i32,
    pub read_expr: Option<String>,
    pub write_expr: Option<String>,
    pub assertion: Option<Assertion>,
}

impl ColumnSchema {
    fn from_binding<R>(binding: &FieldBinding<R>, column: &Column) -> Self {
        Self {
            field: binding.name,
            kind: binding.kind,
            headers: column.headers.clone(),
            width: column.width,
            index: column.index,
            format: column.format.clone(),
            colors: column.colors.clone(),
            font_colors: column.font_colors.clone(),
            required: column.required,
            trim: column.trim,
            order: column.order,
            read_expr: binding.read_expr.clone(),
            write_expr: binding.write_expr.clone(),
            assertion: binding.assertion.clone(),
        }
    }

    /// Column of an untyped row; it binds no field
    fn untyped(column: &Column) -> Self {
        Self {
            field: "",
            kind: ValueKind::Text,
            headers: column.headers.clone(),
            width: column.width,
            index: column.index,
            format: column.format.clone(),
            colors: column.colors.clone(),
            font_colors: column.font_colors.clone(),
            required: column.required,
            trim: column.trim,
            order: column.order,
            read_expr: None,
            write_expr: None,
            assertion: None,
        }
    }

    /// Label at a header level, empty past the last level
    pub fn header(&self, level: usize) -> &str {
        self.headers.get(level).map(String::as_str).unwrap_or("")
    }

    /// Innermost label, the one the read side matches on
    pub fn title(&self) -> &str {
        self.headers.last().map(String::as_str).unwrap_or("")
    }

    pub fn color(&self, level: usize) -> ExcelColor {
        pick(&self.colors, level)
    }

    pub fn font_color(&self, level: usize) -> ExcelColor {
        pick(&self.font_colors, level)
    }
}

fn pick(colors: &[ExcelColor], level: usize) -> ExcelColor {
    colors
        .get(level)
        .or_else(|| colors.last())
        .copied()
        .unwrap_or(ExcelColor::None)
}

/// Ordered columns of a record type plus the accessors behind them
pub struct Schema<R> {
    columns: Vec<ColumnSchema>,
    accessors: Vec<FieldBinding<R>>,
    fields: Vec<FieldBinding<R>>,
    sheet: SheetAttr,
    depth: usize,
}

impl<R> std::fmt::Debug for Schema<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("columns", &self.columns)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// Columns of untyped rows, ordered like record columns, plus the header
/// depth they share.
pub fn untyped_columns(columns: Vec<Column>) -> ExcelResult<(Vec<ColumnSchema>, usize)> {
    let mut resolved: Vec<ColumnSchema> = columns.iter().map(ColumnSchema::untyped).collect();
    resolved.sort_by_key(|c| c.order);

    let depth = resolved.first().map(|c| c.headers.len()).unwrap_or(0);
    for (pos, column) in resolved.iter().enumerate() {
        if column.headers.is_empty() {
            return Err(ExcelError::Schema(format!("column {} declares no header label", pos)));
        }
        if column.headers.len() != depth {
            return Err(ExcelError::Schema(format!(
                "column {} ('{}') has {} header levels, expected {}",
                pos,
                column.title(),
                column.headers.len(),
                depth
            )));
        }
    }
    Ok((resolved, depth))
}

impl<R: Record> Schema<R> {
    /// Resolve the column schema of `R`, dropping any column whose header
    /// labels intersect `ignores`.
    pub fn resolve(ignores: &[String]) -> ExcelResult<Self> {
        let fields: Vec<FieldBinding<R>> = R::bindings()
            .into_iter()
            .chain(R::parent_bindings())
            .collect();

        let mut mapped: Vec<(ColumnSchema, FieldBinding<R>)> = fields
            .iter()
            .filter_map(|binding| {
                let column = binding.column.as_ref()?;
                if column.headers.iter().any(|h| ignores.contains(h)) {
                    return None;
                }
                Some((ColumnSchema::from_binding(binding, column), binding.clone()))
            })
            .collect();

        // Vec::sort_by_key is stable: equal orders keep declaration order
        mapped.sort_by_key(|(column, _)| column.order);

        let depth = mapped.first().map(|(c, _)| c.headers.len()).unwrap_or(0);
        for (column, _) in &mapped {
            if column.headers.is_empty() {
                return Err(ExcelError::Schema(format!(
                    "field '{}' declares no header label",
                    column.field
                )));
            }
            if column.headers.len() != depth {
                return Err(ExcelError::Schema(format!(
                    "field '{}' has {} header levels, expected {}",
                    column.field,
                    column.headers.len(),
                    depth
                )));
            }
        }

        let (columns, accessors): (Vec<_>, Vec<_>) = mapped.into_iter().unzip();
        debug!(
            record = std::any::type_name::<R>(),
            columns = columns.len(),
            depth,
            "schema resolved"
        );

        Ok(Self {
            columns,
            accessors,
            fields,
            sheet: R::sheet(),
            depth,
        })
    }
}

impl<R> Schema<R> {
    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    /// Number of header rows
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Accessor of the column at `position`
    pub fn accessor(&self, position: usize) -> Option<&FieldBinding<R>> {
        self.accessors.get(position)
    }

    /// Every declared binding, mapped or not
    pub fn fields(&self) -> &[FieldBinding<R>] {
        &self.fields
    }

    pub fn sheet(&self) -> &SheetAttr {
        &self.sheet
    }

    /// Export needs at least one column
    pub fn ensure_writable(&self) -> ExcelResult<()> {
        if self.columns.is_empty() {
            return Err(ExcelError::Schema(format!(
                "no column resolved for {}, nothing to write",
                std::any::type_name::<R>()
            )));
        }
        Ok(())
    }
}
