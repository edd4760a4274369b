//! Runtime settings
//!
//! Defaults for the streaming windows, row heights and template binding.
//! Settings can be built in code or loaded from YAML; record-level
//! [`SheetAttr`] values take precedence over whatever is loaded here.

use crate::error::{ExcelError, ExcelResult};
use crate::schema::SheetAttr;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Rows kept in memory by a constant-memory export before they are flushed
pub const DEFAULT_WINDOW_SIZE: usize = 500;
/// Rows assembled ahead of the read codec when streaming a source
pub const DEFAULT_CACHE_ROWS: usize = 100;
/// Decode buffer for opening a source, in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcelSettings {
    /// Export row window; `0` keeps the whole sheet in memory
    pub window_size: usize,
    pub cache_rows: usize,
    pub buffer_size: usize,
    /// Header row height in points
    pub header_height: f64,
    /// Body row height in points
    pub body_height: f64,
    pub default_sheet: String,
    /// Embed the template marker on export
    pub bind: bool,
    /// Scratch directory for constant-memory worksheets
    pub temp_dir: Option<PathBuf>,
}

impl Default for ExcelSettings {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            cache_rows: DEFAULT_CACHE_ROWS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            header_height: 22.5,
            body_height: 19.5,
            default_sheet: "Sheet1".to_string(),
            bind: true,
            temp_dir: None,
        }
    }
}

impl ExcelSettings {
    pub fn from_yaml_str(yaml: &str) -> ExcelResult<Self> {
        let settings: ExcelSettings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> ExcelResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> ExcelResult<()> {
        if self.cache_rows == 0 {
            return Err(ExcelError::Config("cache_rows must be at least 1".to_string()));
        }
        if self.buffer_size == 0 {
            return Err(ExcelError::Config("buffer_size must be at least 1".to_string()));
        }
        if !(self.header_height >= 0.0 && self.body_height >= 0.0) {
            return Err(ExcelError::Config(format!(
                "row heights must be non-negative, got header {} body {}",
                self.header_height, self.body_height
            )));
        }
        if self.default_sheet.trim().is_empty() {
            return Err(ExcelError::Config("default_sheet must not be empty".to_string()));
        }
        Ok(())
    }

    /// These settings with the record's own attributes applied on top
    pub fn overlay(&self, sheet: &SheetAttr) -> ExcelSettings {
        ExcelSettings {
            window_size: sheet.window_size.unwrap_or(self.window_size),
            cache_rows: sheet.cache_rows.unwrap_or(self.cache_rows).max(1),
            buffer_size: sheet.buffer_size.unwrap_or(self.buffer_size).max(1),
            header_height: sheet.header_height.unwrap_or(self.header_height),
            body_height: sheet.body_height.unwrap_or(self.body_height),
            ..self.clone()
        }
    }
}
