use serde::{Deserialize, Serialize};

use crate::cell_id::CellId;

/// A rectangular range of cells, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start_row: usize,
    pub start_col: usize,
    pub end_row: usize,
    pub end_col: usize,
}

impl Range {
    /// Create a new range, automatically normalizing so start <= end.
    pub fn new(r1: usize, c1: usize, r2: usize, c2: usize) -> Self {
        Self {
            start_row: r1.min(r2),
            start_col: c1.min(c2),
            end_row: r1.max(r2),
            end_col: c1.max(c2),
        }
    }

    /// Range spanned by two corners given in any order.
    pub fn from_corners(a: CellId, b: CellId) -> Self {
        Self::new(a.row, a.col, b.row, b.col)
    }

    /// Create a single-cell range.
    pub fn single(cell: CellId) -> Self {
        Self::new(cell.row, cell.col, cell.row, cell.col)
    }

    /// Top-left corner.
    pub fn start(&self) -> CellId {
        CellId::new(self.start_row, self.start_col)
    }

    /// Bottom-right corner.
    pub fn end(&self) -> CellId {
        CellId::new(self.end_row, self.end_col)
    }

    /// Check if this range contains a cell.
    pub fn contains(&self, cell: CellId) -> bool {
        cell.row >= self.start_row && cell.row <= self.end_row &&
        cell.col >= self.start_col && cell.col <= self.end_col
    }

    /// Number of cells in this range.
    pub fn cell_count(&self) -> usize {
        (self.end_row - self.start_row + 1).saturating_mul(self.end_col - self.start_col + 1)
    }

    /// The part of this range inside a `rows` x `cols` grid, `None` when the
    /// two do not overlap.
    pub fn clamped(&self, rows: usize, cols: usize) -> Option<Range> {
        if rows == 0 || cols == 0 || self.start_row >= rows || self.start_col >= cols {
            return None;
        }
        Some(Range::new(
            self.start_row,
            self.start_col,
            self.end_row.min(rows - 1),
            self.end_col.min(cols - 1),
        ))
    }

    /// Iterate over all cells in this range (row-major order).
    pub fn cells(&self) -> impl Iterator<Item = CellId> {
        let start_row = self.start_row;
        let end_row = self.end_row;
        let start_col = self.start_col;
        let end_col = self.end_col;

        (start_row..=end_row).flat_map(move |r| {
            (start_col..=end_col).map(move |c| CellId::new(r, c))
        })
    }

    /// Check if this is a single cell.
    pub fn is_single(&self) -> bool {
        self.start_row == self.end_row && self.start_col == self.end_col
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.start())
        } else {
            write!(f, "{}:{}", self.start(), self.end())
        }
    }
}

/// The selection model: one active cell, optionally with a range around it.
///
/// Selecting a single cell drops any range. Selecting a range moves the
/// active (anchor) cell to the range's `start` argument, which is kept as
/// given rather than normalized so that shift-extension keeps working from
/// the corner the user started on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    active: CellId,
    range: Option<Range>,
}

impl Selection {
    /// Create a new selection with a single cell.
    pub fn new(cell: CellId) -> Self {
        Self { active: cell, range: None }
    }

    /// The active (anchor) cell.
    pub fn active_cell(&self) -> CellId {
        self.active
    }

    /// The selected range, if one is active.
    pub fn range(&self) -> Option<Range> {
        self.range
    }

    /// The selection as a range (a single-cell range when no range is active).
    pub fn bounds(&self) -> Range {
        self.range.unwrap_or_else(|| Range::single(self.active))
    }

    /// Check if a cell is selected.
    pub fn contains(&self, cell: CellId) -> bool {
        self.bounds().contains(cell)
    }

    /// Check if selection is a single cell.
    pub fn is_single_cell(&self) -> bool {
        self.bounds().is_single()
    }

    /// Iterate over all selected cells.
    pub fn cells(&self) -> impl Iterator<Item = CellId> {
        self.bounds().cells()
    }

    /// Set selection to a single cell (click).
    pub fn select_cell(&mut self, cell: CellId) {
        self.active = cell;
        self.range = None;
    }

    /// Select a range; the anchor becomes `start`.
    pub fn select_range(&mut self, start: CellId, end: CellId) {
        self.active = start;
        self.range = Some(Range::from_corners(start, end));
    }

    /// Extend from the anchor to the given cell (shift+click/arrow).
    pub fn extend_to(&mut self, cell: CellId) {
        let anchor = self.active;
        self.select_range(anchor, cell);
    }

    /// Move active cell by delta, collapsing to single cell and clamping to the grid.
    pub fn move_by(&mut self, d_row: isize, d_col: isize, max_row: usize, max_col: usize) {
        let cell = self.active;
        let new_row = (cell.row as isize + d_row).clamp(0, max_row as isize - 1) as usize;
        let new_col = (cell.col as isize + d_col).clamp(0, max_col as isize - 1) as usize;
        self.select_cell(CellId::new(new_row, new_col));
    }

    /// Pull the selection back inside a grid of the given size.
    pub fn clamp_to(&mut self, rows: usize, cols: usize) {
        let clamp = |c: CellId| CellId::new(c.row.min(rows.saturating_sub(1)), c.col.min(cols.saturating_sub(1)));
        self.active = clamp(self.active);
        self.range = self.range.map(|r| Range::from_corners(clamp(r.start()), clamp(r.end())));
    }
}

impl Default for Selection {
    fn default() -> Self {
        Self::new(CellId::new(0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> CellId {
        CellId::parse(s).unwrap()
    }

    #[test]
    fn test_range_clamped_to_grid() {
        let huge = Range::new(0, 1, 99_999_998, 18_277);
        let clamped = huge.clamped(10, 5).unwrap();
        assert_eq!(clamped, Range::new(0, 1, 9, 4));
        assert_eq!(clamped.cell_count(), 40);
        assert!(Range::new(10, 0, 12, 2).clamped(10, 5).is_none());
        let unbounded = Range::new(0, 0, usize::MAX - 1, usize::MAX - 1);
        assert_eq!(unbounded.cell_count(), usize::MAX);
    }

    #[test]
    fn test_range_single() {
        let r = Range::single(CellId::new(5, 3));
        assert!(r.contains(CellId::new(5, 3)));
        assert!(!r.contains(CellId::new(5, 4)));
        assert!(r.is_single());
        assert_eq!(r.cell_count(), 1);
    }

    #[test]
    fn test_range_multi() {
        let r = Range::new(1, 1, 3, 2);
        assert!(r.contains(CellId::new(1, 1)));
        assert!(r.contains(CellId::new(2, 2)));
        assert!(r.contains(CellId::new(3, 1)));
        assert!(!r.contains(CellId::new(0, 0)));
        assert!(!r.is_single());
        assert_eq!(r.cell_count(), 6); // 3 rows x 2 cols
    }

    #[test]
    fn test_range_normalizes() {
        let r = Range::from_corners(id("B5"), id("A1"));
        assert_eq!(r.start(), id("A1"));
        assert_eq!(r.end(), id("B5"));
        assert_eq!(r.to_string(), "A1:B5");
    }

    #[test]
    fn test_range_cells_row_major() {
        let cells: Vec<String> = Range::from_corners(id("A1"), id("B2")).cells().map(|c| c.to_string()).collect();
        assert_eq!(cells, vec!["A1", "B1", "A2", "B2"]);
    }

    #[test]
    fn test_select_cell_clears_range() {
        let mut sel = Selection::default();
        sel.select_range(id("B2"), id("C3"));
        assert!(sel.range().is_some());
        sel.select_cell(id("D4"));
        assert_eq!(sel.range(), None);
        assert_eq!(sel.active_cell(), id("D4"));
    }

    #[test]
    fn test_select_range_sets_anchor_to_start() {
        let mut sel = Selection::default();
        sel.select_range(id("C3"), id("A1"));
        assert_eq!(sel.active_cell(), id("C3"));
        assert_eq!(sel.bounds(), Range::from_corners(id("A1"), id("C3")));
    }

    #[test]
    fn test_selection_extend() {
        let mut sel = Selection::new(CellId::new(2, 2));
        sel.extend_to(CellId::new(4, 5));

        assert_eq!(sel.active_cell(), CellId::new(2, 2));
        assert!(sel.contains(CellId::new(2, 2)));
        assert!(sel.contains(CellId::new(3, 3)));
        assert!(sel.contains(CellId::new(4, 5)));
        assert!(!sel.contains(CellId::new(1, 1)));
    }

    #[test]
    fn test_move_by_clamps() {
        let mut sel = Selection::default();
        sel.move_by(-1, -1, 10, 10);
        assert_eq!(sel.active_cell(), id("A1"));
        sel.move_by(20, 3, 10, 10);
        assert_eq!(sel.active_cell(), id("D10"));
    }
}
