//! Schema-driven styling
//!
//! Header cells get bold centered text with the column's fill and font
//! color for their level; body cells get the column number format. Column
//! widths are applied when a sheet is created.

use super::{CellEvent, WriteListener};
use crate::context::WriteInfo;
use crate::layout::positions;
use crate::types::ValueKind;
use crate::write::{Title, DATETIME_FORMAT, DATE_FORMAT};
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Worksheet};
use tracing::warn;

#[derive(Debug, Default)]
pub struct SchemaStyleListener {
    widths: Vec<(u16, f64)>,
    bordered: bool,
}

impl SchemaStyleListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Thin borders around header and body cells
    pub fn bordered(mut self, bordered: bool) -> Self {
        self.bordered = bordered;
        self
    }

    fn base(&self) -> Format {
        let format = Format::new().set_align(FormatAlign::VerticalCenter);
        if self.bordered {
            format.set_border(FormatBorder::Thin)
        } else {
            format
        }
    }
}

impl WriteListener for SchemaStyleListener {
    fn on_register(&mut self, info: &WriteInfo) {
        self.widths = positions(&info.columns, info.mode)
            .into_iter()
            .zip(info.columns.iter().map(|c| c.width))
            .collect();
    }

    fn sheet_created(&mut self, sheet: &mut Worksheet, name: &str) {
        for (col, width) in &self.widths {
            if let Err(e) = sheet.set_column_width(*col, *width) {
                warn!(sheet = name, col, error = %e, "column width rejected");
            }
        }
    }

    fn title_style(&mut self, _title: &Title, format: &mut Format) {
        *format = format.clone().set_align(FormatAlign::VerticalCenter);
    }

    fn head_style(&mut self, cell: &CellEvent, format: &mut Option<Format>) {
        let Some(column) = cell.column else {
            return;
        };
        let level = cell.index;
        let mut head = self.base().set_bold().set_align(FormatAlign::Center);
        if let Some(fill) = column.color(level).to_xlsx() {
            head = head.set_background_color(fill);
        }
        if let Some(font) = column.font_color(level).to_xlsx() {
            head = head.set_font_color(font);
        }
        *format = Some(head);
    }

    fn body_style(&mut self, cell: &CellEvent, format: &mut Option<Format>) {
        let Some(column) = cell.column else {
            return;
        };
        let num_format = match (&column.format, column.kind) {
            (Some(custom), _) => Some(custom.as_str()),
            (None, ValueKind::Date) => Some(DATE_FORMAT),
            (None, ValueKind::DateTime) => Some(DATETIME_FORMAT),
            _ => None,
        };
        let body = match num_format {
            Some(num) => self.base().set_num_format(num),
            None => self.base(),
        };
        *format = Some(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, FieldBinding, Record, Schema};
    use crate::types::{ExcelColor, ExcelType, RowType, WrMode};

    #[derive(Default)]
    struct Styled {
        name: String,
        born: Option<chrono::NaiveDate>,
    }

    impl Record for Styled {
        fn bindings() -> Vec<FieldBinding<Self>> {
            vec![
                FieldBinding::new("name", |s: &Styled| &s.name, |s, v| s.name = v)
                    .column(Column::new(["Name"]).width(32.0).colors([ExcelColor::Navy])),
                FieldBinding::new("born", |s: &Styled| &s.born, |s, v| s.born = v)
                    .column(Column::new(["Born"]).colors([ExcelColor::None])),
            ]
        }
    }

    fn info() -> WriteInfo {
        let schema = Schema::<Styled>::resolve(&[]).unwrap();
        WriteInfo {
            record: "Styled",
            columns: schema.columns().to_vec(),
            depth: 1,
            mode: WrMode::Sort,
            excel_type: ExcelType::Xlsx,
            header_height: 22.5,
            body_height: 19.5,
            unique_key: "Styled".into(),
            bind: false,
        }
    }

    #[test]
    fn test_widths_follow_positions() {
        let mut listener = SchemaStyleListener::new();
        listener.on_register(&info());
        assert_eq!(listener.widths, vec![(0, 32.0), (1, 20.0)]);
    }

    #[test]
    fn test_head_and_body_formats_set() {
        // Born has no fill; the body still gets the default date format
        let info = info();
        let mut listener = SchemaStyleListener::new().bordered(true);
        listener.on_register(&info);

        let head = CellEvent {
            row: 0,
            col: 0,
            row_type: RowType::Head,
            index: 0,
            column: Some(&info.columns[0]),
        };
        let mut format = None;
        listener.head_style(&head, &mut format);
        assert!(format.is_some());

        let body = CellEvent {
            row: 1,
            col: 1,
            row_type: RowType::Body,
            index: 0,
            column: Some(&info.columns[1]),
        };
        let mut format = None;
        listener.body_style(&body, &mut format);
        assert!(format.is_some());
    }

    #[test]
    fn test_cells_without_column_untouched() {
        let mut listener = SchemaStyleListener::new();
        let cell = CellEvent {
            row: 0,
            col: 0,
            row_type: RowType::Head,
            index: 0,
            column: None,
        };
        let mut format = None;
        listener.head_style(&cell, &mut format);
        assert!(format.is_none());
    }
}
