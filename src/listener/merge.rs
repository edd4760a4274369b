//! Header merge listener
//!
//! Merges equal adjacent header labels as soon as the first header row of
//! a sheet is complete. The write path settles every level's labels up
//! front, so the whole grid is known at that point; merging there keeps
//! every merged cell at or below the current row, which constant-memory
//! sheets require. Lower header rows are written afterwards and keep their
//! labels inside the merged area.

use super::{RowEvent, WriteListener};
use crate::layout::HeaderCellSpan;
use crate::schema::RecordView;
use crate::types::RowType;
use rust_xlsxwriter::Worksheet;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct HeaderMergeListener {
    merged: Vec<HeaderCellSpan>,
}

impl HeaderMergeListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every span merged so far, across sheets
    pub fn merged(&self) -> &[HeaderCellSpan] {
        &self.merged
    }
}

impl WriteListener for HeaderMergeListener {
    fn row_completed(&mut self, sheet: &mut Worksheet, row: &RowEvent, _record: Option<&dyn RecordView>) {
        if row.row_type != RowType::Head {
            return;
        }
        let Some(grid) = row.header else {
            return;
        };
        if row.index != 0 {
            return;
        }

        let spans = grid.merge_spans();
        for span in &spans {
            let level = (span.first_row - grid.first_row()) as usize;
            let Some(cell) = grid.cell(level, span.first_col) else {
                continue;
            };
            let format = cell.format.clone().unwrap_or_default();
            if let Err(e) = sheet.merge_range(
                span.first_row,
                span.first_col,
                span.last_row,
                span.last_col,
                &cell.label,
                &format,
            ) {
                warn!(?span, error = %e, "header merge rejected");
                continue;
            }
            self.merged.push(*span);
        }
        debug!(spans = spans.len(), "header cells merged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::HeaderGrid;
    use rust_xlsxwriter::Format;

    #[test]
    fn test_merges_once_on_first_level() {
        let mut grid = HeaderGrid::new(0, 2);
        grid.record(0, 0, "Group", Some(Format::new().set_bold()));
        grid.record(0, 1, "Group", None);
        grid.record(1, 0, "X", None);
        grid.record(1, 1, "Y", None);

        let mut sheet = Worksheet::new();
        let mut listener = HeaderMergeListener::new();

        let first = RowEvent {
            row: 0,
            row_type: RowType::Head,
            index: 0,
            header: Some(&grid),
        };
        listener.row_completed(&mut sheet, &first, None);
        let group = HeaderCellSpan {
            first_row: 0,
            last_row: 0,
            first_col: 0,
            last_col: 1,
        };
        assert_eq!(listener.merged(), &[group]);

        // the lower level does not merge again
        let last = RowEvent {
            row: 1,
            index: 1,
            ..first
        };
        listener.row_completed(&mut sheet, &last, None);
        assert_eq!(listener.merged(), &[group]);
    }

    #[test]
    fn test_body_rows_ignored() {
        let mut grid = HeaderGrid::new(0, 1);
        grid.record(0, 0, "A", None);
        grid.record(0, 1, "A", None);
        let mut sheet = Worksheet::new();
        let mut listener = HeaderMergeListener::new();
        let body = RowEvent {
            row: 1,
            row_type: RowType::Body,
            index: 0,
            header: Some(&grid),
        };
        listener.row_completed(&mut sheet, &body, None);
        assert!(listener.merged().is_empty());
    }
}
