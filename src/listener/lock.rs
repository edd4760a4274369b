//! Sheet protection listener

use super::WriteListener;
use crate::error::{ExcelError, ExcelResult};
use rust_xlsxwriter::Worksheet;
use tracing::debug;
use uuid::Uuid;

/// Protects every sheet the writer creates with one password
#[derive(Debug, Clone)]
pub struct SheetLockListener {
    password: String,
    locked: Vec<String>,
}

impl SheetLockListener {
    pub fn new(password: impl Into<String>) -> ExcelResult<Self> {
        let password = password.into();
        if password.is_empty() {
            return Err(ExcelError::Config("sheet lock password must not be empty".to_string()));
        }
        Ok(Self {
            password,
            locked: Vec::new(),
        })
    }

    /// Lock with a password nobody knows
    pub fn random() -> Self {
        Self {
            password: Uuid::new_v4().simple().to_string(),
            locked: Vec::new(),
        }
    }

    /// Names of the sheets locked so far
    pub fn locked(&self) -> &[String] {
        &self.locked
    }
}

impl WriteListener for SheetLockListener {
    fn sheet_created(&mut self, sheet: &mut Worksheet, name: &str) {
        sheet.protect_with_password(&self.password);
        self.locked.push(name.to_string());
        debug!(sheet = name, "sheet locked");
    }
}
