use thiserror::Error;

pub type ExcelResult<T> = Result<T, ExcelError>;

#[derive(Error, Debug)]
pub enum ExcelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Excel template do not match: {0}")]
    TemplateMismatch(String),

    #[error("Unsupported cell type at [row:{row},column:{column}]: {detail}")]
    UnsupportedCellType {
        row: u32,
        column: u16,
        detail: String,
    },

    #[error("Unsupported value type '{kind}' for field '{field}', supply a write conversion")]
    UnsupportedValueType { field: String, kind: String },

    #[error(
        "Type mismatch at [row:{row},column:{column}]: cell value is {source_type}, but field '{field}' is {target_type}"
    )]
    TypeMismatch {
        row: u32,
        column: u16,
        field: String,
        source_type: String,
        target_type: String,
    },

    #[error("Assertion failed at [row:{row},column:{column}] on field '{field}': {message}")]
    Assertion {
        row: u32,
        column: u16,
        field: String,
        message: String,
    },

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("The sheet '{0}' is not found in the workbook")]
    SheetNotFound(String),

    #[error("Expression error in '{expr}': {message}")]
    Expression { expr: String, message: String },

    #[error("Config error: {0}")]
    Config(String),
}

impl ExcelError {
    pub fn resource(context: &str, err: impl std::fmt::Display) -> Self {
        ExcelError::Resource(format!("{}: {}", context, err))
    }

    /// True for errors raised before any row is processed.
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            ExcelError::Schema(_) | ExcelError::TemplateMismatch(_) | ExcelError::SheetNotFound(_)
        )
    }
}

impl From<rust_xlsxwriter::XlsxError> for ExcelError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        ExcelError::Resource(format!("Workbook write failure: {}", err))
    }
}
