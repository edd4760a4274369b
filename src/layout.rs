//! Header layout
//!
//! Placement of header cells across the header rows and the merge search
//! over equal labels. The grid holds what the write codec puts in every
//! header cell, settled before the first header row is emitted, so the
//! merge pass sees the whole header at once.

use crate::schema::ColumnSchema;
use crate::types::WrMode;
use rust_xlsxwriter::Format;

/// A rectangular merge candidate, absolute sheet coordinates (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderCellSpan {
    pub first_row: u32,
    pub last_row: u32,
    pub first_col: u16,
    pub last_col: u16,
}

impl HeaderCellSpan {
    pub fn rows(&self) -> u32 {
        self.last_row - self.first_row + 1
    }

    pub fn cols(&self) -> u16 {
        self.last_col - self.first_col + 1
    }

    /// More than one cell covered
    pub fn is_multi_cell(&self) -> bool {
        self.rows() > 1 || self.cols() > 1
    }

    pub fn overlaps(&self, other: &HeaderCellSpan) -> bool {
        self.first_row <= other.last_row
            && other.first_row <= self.last_row
            && self.first_col <= other.last_col
            && other.first_col <= self.last_col
    }
}

/// Column positions for a schema under a placement mode
pub fn positions(columns: &[ColumnSchema], mode: WrMode) -> Vec<u16> {
    match mode {
        WrMode::Sort => (0..columns.len()).map(|i| i as u16).collect(),
        WrMode::Index => columns.iter().map(|c| c.index).collect(),
    }
}

/// A written header cell
#[derive(Debug, Clone)]
pub struct HeaderCell {
    pub label: String,
    /// Format the cell was written with, reused when the merge rewrites it
    pub format: Option<Format>,
}

/// Labels written into the header rows, indexed by level then column
#[derive(Debug, Clone)]
pub struct HeaderGrid {
    first_row: u32,
    levels: Vec<Vec<Option<HeaderCell>>>,
}

impl HeaderGrid {
    pub fn new(first_row: u32, depth: usize) -> Self {
        Self {
            first_row,
            levels: vec![Vec::new(); depth],
        }
    }

    /// Sheet row of the first header level
    pub fn first_row(&self) -> u32 {
        self.first_row
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Number of columns touched by any level
    pub fn width(&self) -> u16 {
        self.levels.iter().map(Vec::len).max().unwrap_or(0) as u16
    }

    pub fn record(&mut self, level: usize, col: u16, label: impl Into<String>, format: Option<Format>) {
        let Some(cells) = self.levels.get_mut(level) else {
            return;
        };
        let col = col as usize;
        if cells.len() <= col {
            cells.resize(col + 1, None);
        }
        cells[col] = Some(HeaderCell {
            label: label.into(),
            format,
        });
    }

    pub fn cell(&self, level: usize, col: u16) -> Option<&HeaderCell> {
        self.levels.get(level)?.get(col as usize)?.as_ref()
    }

    fn label(&self, level: usize, col: u16) -> Option<&str> {
        self.cell(level, col).map(|c| c.label.as_str())
    }

    /// Merge spans over equal labels.
    ///
    /// Levels are scanned top to bottom, columns left to right. A span grows
    /// to the right over equal neighbours first, then downwards while the
    /// whole block row below carries the same label. Cells already inside a
    /// span are never revisited, so spans are disjoint. Blank labels never
    /// merge and single cells are not reported.
    pub fn merge_spans(&self) -> Vec<HeaderCellSpan> {
        let depth = self.depth();
        let width = self.width() as usize;
        let mut covered = vec![vec![false; width]; depth];
        let mut spans = Vec::new();

        for level in 0..depth {
            let mut col = 0usize;
            while col < width {
                let Some(label) = self.label(level, col as u16).filter(|l| !l.is_empty()) else {
                    col += 1;
                    continue;
                };
                if covered[level][col] {
                    col += 1;
                    continue;
                }

                let mut last_col = col;
                while last_col + 1 < width
                    && !covered[level][last_col + 1]
                    && self.label(level, (last_col + 1) as u16) == Some(label)
                {
                    last_col += 1;
                }

                let mut last_level = level;
                while last_level + 1 < depth
                    && (col..=last_col).all(|c| {
                        !covered[last_level + 1][c] && self.label(last_level + 1, c as u16) == Some(label)
                    })
                {
                    last_level += 1;
                }

                for row in covered.iter_mut().take(last_level + 1).skip(level) {
                    for cell in row.iter_mut().take(last_col + 1).skip(col) {
                        *cell = true;
                    }
                }

                let span = HeaderCellSpan {
                    first_row: self.first_row + level as u32,
                    last_row: self.first_row + last_level as u32,
                    first_col: col as u16,
                    last_col: last_col as u16,
                };
                if span.is_multi_cell() {
                    spans.push(span);
                }
                col = last_col + 1;
            }
        }
        spans
    }
}
