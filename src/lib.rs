//! Sheetbind - typed row/object binding for spreadsheets
//!
//! This library maps plain Rust records to spreadsheet rows and back. A
//! record declares its columns once; the same declaration drives both the
//! streaming `.xlsx` export and the `.xlsx`/`.xls` import.
//!
//! # Features
//!
//! - Schema resolution with ordering, ignore lists and inherited fields
//! - Multi-level headers with automatic merging of equal labels
//! - Listener hooks around every sheet, row and cell, on both paths
//! - Excel-flavoured conversion and assertion expressions per field
//! - Template binding: exports carry a key the import can verify
//! - Untyped rows under run-time headers ([`RowWriter`], [`RowReader`])
//! - Password-protected sheets ([`SheetLockListener`])
//! - Bounded memory on both paths (row windows)
//!
//! # Example
//!
//! ```no_run
//! use royalbit_sheetbind::schema::{Column, FieldBinding, Record};
//! use royalbit_sheetbind::{ExcelReader, ExcelWriter, HeaderMergeListener};
//!
//! #[derive(Debug, Default)]
//! struct Person {
//!     name: String,
//!     age: i64,
//! }
//!
//! impl Record for Person {
//!     fn bindings() -> Vec<FieldBinding<Self>> {
//!         vec![
//!             FieldBinding::new("name", |p: &Person| &p.name, |p, v| p.name = v)
//!                 .column(Column::new(["Name"])),
//!             FieldBinding::new("age", |p: &Person| &p.age, |p, v| p.age = v)
//!                 .column(Column::new(["Age"])),
//!         ]
//!     }
//! }
//!
//! let people = vec![Person { name: "Alice".into(), age: 30 }];
//! let mut writer = ExcelWriter::<Person>::new(&[])?.listener(HeaderMergeListener::new());
//! writer.write(&people)?;
//! writer.flush_to_path("people.xlsx")?;
//!
//! let back = ExcelReader::<Person>::open("people.xlsx", &[])?
//!     .check(true)
//!     .read_records(0, "Sheet1")?;
//! assert_eq!(back[0].name, "Alice");
//! # Ok::<(), royalbit_sheetbind::error::ExcelError>(())
//! ```

pub mod binding;
pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod expr;
pub mod layout;
pub mod listener;
pub mod read;
pub mod schema;
pub mod stream;
pub mod types;
pub mod write;

// Re-export commonly used types
pub use config::ExcelSettings;
pub use error::{ExcelError, ExcelResult};
pub use listener::{
    HeaderMergeListener, ListenerRegistry, ReadListener, SchemaStyleListener, SheetLockListener, WriteListener,
};
pub use read::{ExcelReader, RowReader};
pub use schema::{Column, FieldBinding, Record, SheetAttr};
pub use types::{CellValue, ExcelColor, ExcelType, RowType, ValueKind, WrMode};
pub use write::{ExcelWriter, RowWriter, Title};
