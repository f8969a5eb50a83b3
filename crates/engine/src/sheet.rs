use std::cmp::Ordering;
use std::collections::BTreeMap;

use calcgrid_core::{col_to_letters, CellId};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::cell::{format_display, Cell, FormatPatch};
use crate::formula::eval::{self, CellLookup};

/// Sparse cell storage. Ordered row-major so iteration is deterministic.
pub type CellMap = BTreeMap<CellId, Cell>;

impl CellLookup for CellMap {
    fn raw_value(&self, id: CellId) -> Option<&str> {
        self.get(&id).map(|c| c.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// The last sort applied to the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortConfig {
    pub column: usize,
    pub direction: SortDirection,
}

/// Cells plus grid structure.
///
/// Rows and columns are always the contiguous sequences `1..=rows` and
/// `A..` (`cols` labels), so structural edits only ever change the counts and
/// move cells; there are no gaps to track.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    cells: CellMap,
    rows: usize,
    cols: usize,
    /// Sparse widths keyed by column index
    column_widths: BTreeMap<usize, u32>,
    /// Sparse heights keyed by row index
    row_heights: BTreeMap<usize, u32>,
}

impl CellLookup for Sheet {
    fn raw_value(&self, id: CellId) -> Option<&str> {
        self.cells.raw_value(id)
    }
}

impl Default for Sheet {
    fn default() -> Self {
        Self::new(100, 26)
    }
}

impl Sheet {
    /// A sheet always has at least one row and one column.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            cells: CellMap::new(),
            rows: rows.max(1),
            cols: cols.max(1),
            column_widths: BTreeMap::new(),
            row_heights: BTreeMap::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, columns)`
    pub fn bounds(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn contains(&self, id: CellId) -> bool {
        id.row < self.rows && id.col < self.cols
    }

    /// `A, B, ..., Z, AA, ...` for every column.
    pub fn column_labels(&self) -> Vec<String> {
        (0..self.cols).map(col_to_letters).collect()
    }

    /// `1..=rows`
    pub fn row_numbers(&self) -> Vec<usize> {
        (1..=self.rows).collect()
    }

    /// Grow the grid so it is at least `rows` x `cols`.
    pub fn ensure_size(&mut self, rows: usize, cols: usize) {
        self.rows = self.rows.max(rows);
        self.cols = self.cols.max(cols);
    }

    // =========================================================================
    // Cells
    // =========================================================================

    pub fn cells(&self) -> &CellMap {
        &self.cells
    }

    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(&id)
    }

    pub fn raw(&self, id: CellId) -> &str {
        self.cells.get(&id).map(|c| c.value.as_str()).unwrap_or_default()
    }

    /// Store a cell, pruning it when it carries nothing. Out-of-bounds ids are ignored.
    pub fn set_cell(&mut self, id: CellId, cell: Cell) {
        if !self.contains(id) {
            return;
        }
        if cell.is_blank() {
            self.cells.remove(&id);
        } else {
            self.cells.insert(id, cell);
        }
    }

    /// Set the raw value. With an empty value and no format patch the entry is
    /// dropped; otherwise the patch is merged into the existing format.
    pub fn set_value(&mut self, id: CellId, value: &str, format: Option<&FormatPatch>) {
        if !self.contains(id) {
            return;
        }
        if value.is_empty() && format.is_none() {
            self.cells.remove(&id);
            return;
        }
        let mut cell = self.cells.get(&id).cloned().unwrap_or_default();
        cell.value = value.to_string();
        if let Some(patch) = format {
            cell.format = cell.format.merged(patch);
        }
        self.set_cell(id, cell);
    }

    /// Merge a format patch, creating an empty-valued cell if needed.
    pub fn apply_format(&mut self, id: CellId, patch: &FormatPatch) {
        if !self.contains(id) {
            return;
        }
        let mut cell = self.cells.get(&id).cloned().unwrap_or_default();
        cell.format = cell.format.merged(patch);
        self.set_cell(id, cell);
    }

    pub fn remove(&mut self, id: CellId) -> Option<Cell> {
        self.cells.remove(&id)
    }

    /// Swap in a whole cell map (undo/redo, hydrate). Entries outside the grid are dropped.
    pub fn replace_cells(&mut self, cells: CellMap) {
        let (rows, cols) = self.bounds();
        self.cells = cells
            .into_iter()
            .filter(|(id, cell)| id.row < rows && id.col < cols && !cell.is_blank())
            .collect();
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluated value of a cell (raw text for non-formulas).
    pub fn evaluate(&self, id: CellId) -> String {
        eval::evaluate_cell(id, &self.cells, self.bounds())
    }

    /// Evaluated value rendered with the cell's display format.
    pub fn display(&self, id: CellId) -> String {
        let value = self.evaluate(id);
        match self.cells.get(&id) {
            Some(cell) => format_display(&value, cell.format.display_format),
            None => value,
        }
    }

    // =========================================================================
    // Sizes
    // =========================================================================

    pub fn column_width(&self, col: usize) -> Option<u32> {
        self.column_widths.get(&col).copied()
    }

    pub fn row_height(&self, row: usize) -> Option<u32> {
        self.row_heights.get(&row).copied()
    }

    pub fn column_widths(&self) -> &BTreeMap<usize, u32> {
        &self.column_widths
    }

    pub fn row_heights(&self) -> &BTreeMap<usize, u32> {
        &self.row_heights
    }

    pub fn resize_column(&mut self, col: usize, width: u32) -> bool {
        if col >= self.cols {
            return false;
        }
        self.column_widths.insert(col, width);
        true
    }

    pub fn resize_row(&mut self, row: usize, height: u32) -> bool {
        if row >= self.rows {
            return false;
        }
        self.row_heights.insert(row, height);
        true
    }

    /// Replace all sizes at once (hydrate). Entries outside the grid are dropped.
    pub fn set_sizes(&mut self, column_widths: BTreeMap<usize, u32>, row_heights: BTreeMap<usize, u32>) {
        let (rows, cols) = self.bounds();
        self.column_widths = column_widths.into_iter().filter(|(c, _)| *c < cols).collect();
        self.row_heights = row_heights.into_iter().filter(|(r, _)| *r < rows).collect();
    }

    // =========================================================================
    // Structural edits
    // =========================================================================

    /// Insert an empty row above `at` (`at == rows` appends). Returns false when out of range.
    pub fn insert_row(&mut self, at: usize) -> bool {
        if at > self.rows {
            return false;
        }
        // Descending so each move lands on an already vacated slot
        let moving: Vec<CellId> = self.cells.range(CellId::new(at, 0)..).map(|(id, _)| *id).collect();
        for id in moving.into_iter().rev() {
            if let Some(cell) = self.cells.remove(&id) {
                self.cells.insert(CellId::new(id.row + 1, id.col), cell);
            }
        }
        shift_keys_up(&mut self.row_heights, at);
        self.rows += 1;
        true
    }

    /// Delete row `at`, shifting lower rows up. The last remaining row cannot be deleted.
    pub fn delete_row(&mut self, at: usize) -> bool {
        if at >= self.rows || self.rows <= 1 {
            return false;
        }
        let doomed: Vec<CellId> = self
            .cells
            .range(CellId::new(at, 0)..CellId::new(at + 1, 0))
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            self.cells.remove(&id);
        }
        let moving: Vec<CellId> = self.cells.range(CellId::new(at + 1, 0)..).map(|(id, _)| *id).collect();
        for id in moving {
            if let Some(cell) = self.cells.remove(&id) {
                self.cells.insert(CellId::new(id.row - 1, id.col), cell);
            }
        }
        shift_keys_down(&mut self.row_heights, at);
        self.rows -= 1;
        true
    }

    /// Insert an empty column left of `at` (`at == cols` appends).
    pub fn insert_column(&mut self, at: usize) -> bool {
        if at > self.cols {
            return false;
        }
        let mut moving: Vec<CellId> = self.cells.keys().filter(|id| id.col >= at).copied().collect();
        moving.sort_by(|a, b| b.col.cmp(&a.col));
        for id in moving {
            if let Some(cell) = self.cells.remove(&id) {
                self.cells.insert(CellId::new(id.row, id.col + 1), cell);
            }
        }
        shift_keys_up(&mut self.column_widths, at);
        self.cols += 1;
        true
    }

    /// Delete column `at`, shifting later columns left. The last remaining column cannot be deleted.
    pub fn delete_column(&mut self, at: usize) -> bool {
        if at >= self.cols || self.cols <= 1 {
            return false;
        }
        self.cells.retain(|id, _| id.col != at);
        let mut moving: Vec<CellId> = self.cells.keys().filter(|id| id.col > at).copied().collect();
        moving.sort_by_key(|id| id.col);
        for id in moving {
            if let Some(cell) = self.cells.remove(&id) {
                self.cells.insert(CellId::new(id.row, id.col - 1), cell);
            }
        }
        shift_keys_down(&mut self.column_widths, at);
        self.cols -= 1;
        true
    }

    // =========================================================================
    // Sort
    // =========================================================================

    /// Stable sort of all rows by the evaluated values of `col`.
    ///
    /// The column sorts numerically when every non-empty value parses as a
    /// number and as case-insensitive text otherwise. Empty values go last in
    /// both directions. Row heights stay with their positions.
    pub fn sort_by_column(&mut self, col: usize, direction: SortDirection) -> bool {
        if col >= self.cols {
            return false;
        }

        let values: Vec<String> = (0..self.rows)
            .map(|row| self.evaluate(CellId::new(row, col)))
            .collect();
        let numeric = values
            .iter()
            .filter(|v| !v.trim().is_empty())
            .all(|v| v.trim().parse::<f64>().is_ok());

        let mut order: Vec<(usize, SortKey)> = values
            .iter()
            .enumerate()
            .map(|(row, v)| (row, SortKey::new(v, numeric)))
            .collect();
        order.sort_by(|(_, a), (_, b)| a.compare(b, direction));

        // new_row[old] = position after sorting
        let mut new_row = vec![0usize; self.rows];
        for (pos, (old, _)) in order.iter().enumerate() {
            new_row[*old] = pos;
        }

        let cells = std::mem::take(&mut self.cells);
        self.cells = cells
            .into_iter()
            .map(|(id, cell)| (CellId::new(new_row[id.row], id.col), cell))
            .collect();
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Empty,
    Number(OrderedFloat<f64>),
    Text(String),
}

impl SortKey {
    fn new(value: &str, numeric: bool) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return SortKey::Empty;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if numeric => SortKey::Number(OrderedFloat(n)),
            _ => SortKey::Text(value.to_lowercase()),
        }
    }

    fn compare(&self, other: &SortKey, direction: SortDirection) -> Ordering {
        let ord = match (self, other) {
            (SortKey::Empty, SortKey::Empty) => return Ordering::Equal,
            (SortKey::Empty, _) => return Ordering::Greater,
            (_, SortKey::Empty) => return Ordering::Less,
            (SortKey::Number(a), SortKey::Number(b)) => a.cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
            (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
        };
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

fn shift_keys_up(map: &mut BTreeMap<usize, u32>, at: usize) {
    let moved: Vec<(usize, u32)> = map.split_off(&at).into_iter().map(|(k, v)| (k + 1, v)).collect();
    map.extend(moved);
}

fn shift_keys_down(map: &mut BTreeMap<usize, u32>, at: usize) {
    let tail = map.split_off(&at);
    map.extend(tail.into_iter().filter(|(k, _)| *k != at).map(|(k, v)| (k - 1, v)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::DisplayFormat;

    fn id(s: &str) -> CellId {
        CellId::parse(s).unwrap()
    }

    fn sheet_with(entries: &[(&str, &str)]) -> Sheet {
        let mut sheet = Sheet::new(10, 5);
        for (k, v) in entries {
            sheet.set_value(id(k), v, None);
        }
        sheet
    }

    #[test]
    fn test_labels_are_contiguous() {
        let sheet = Sheet::new(3, 28);
        assert_eq!(sheet.row_numbers(), vec![1, 2, 3]);
        let labels = sheet.column_labels();
        assert_eq!(labels.len(), 28);
        assert_eq!(labels[0], "A");
        assert_eq!(labels[25], "Z");
        assert_eq!(labels[27], "AB");
    }

    #[test]
    fn test_empty_value_prunes() {
        let mut sheet = sheet_with(&[("A1", "x")]);
        sheet.set_value(id("A1"), "", None);
        assert!(sheet.cells().is_empty());
    }

    #[test]
    fn test_format_only_cell_kept() {
        let mut sheet = Sheet::new(5, 5);
        let patch = FormatPatch { bold: Some(true), ..Default::default() };
        sheet.apply_format(id("B2"), &patch);
        assert_eq!(sheet.cell(id("B2")).map(|c| c.value.as_str()), Some(""));
        // Reverting the format leaves nothing worth keeping
        sheet.apply_format(id("B2"), &FormatPatch { bold: Some(false), ..Default::default() });
        assert!(sheet.cell(id("B2")).is_none());
    }

    #[test]
    fn test_empty_value_with_format_kept() {
        let mut sheet = Sheet::new(5, 5);
        let patch = FormatPatch { italic: Some(true), ..Default::default() };
        sheet.set_value(id("A1"), "", Some(&patch));
        assert!(sheet.cell(id("A1")).is_some_and(|c| c.format.italic));
    }

    #[test]
    fn test_out_of_bounds_ignored() {
        let mut sheet = Sheet::new(2, 2);
        sheet.set_value(id("C3"), "x", None);
        assert!(sheet.cells().is_empty());
    }

    #[test]
    fn test_insert_row_shifts_cells_and_heights() {
        let mut sheet = sheet_with(&[("A1", "a"), ("A2", "b"), ("B3", "c")]);
        sheet.resize_row(1, 40);
        assert!(sheet.insert_row(1));
        assert_eq!(sheet.rows(), 11);
        assert_eq!(sheet.raw(id("A1")), "a");
        assert_eq!(sheet.raw(id("A2")), "");
        assert_eq!(sheet.raw(id("A3")), "b");
        assert_eq!(sheet.raw(id("B4")), "c");
        assert_eq!(sheet.row_height(1), None);
        assert_eq!(sheet.row_height(2), Some(40));
    }

    #[test]
    fn test_insert_then_delete_row_round_trips() {
        let mut sheet = sheet_with(&[("A1", "a"), ("C2", "b"), ("B7", "=A1")]);
        sheet.resize_row(3, 25);
        let before = sheet.clone();
        assert!(sheet.insert_row(2));
        assert!(sheet.delete_row(2));
        assert_eq!(sheet, before);
    }

    #[test]
    fn test_delete_row() {
        let mut sheet = sheet_with(&[("A1", "a"), ("A2", "b"), ("A3", "c")]);
        assert!(sheet.delete_row(1));
        assert_eq!(sheet.rows(), 9);
        assert_eq!(sheet.raw(id("A1")), "a");
        assert_eq!(sheet.raw(id("A2")), "c");
        assert_eq!(sheet.cells().len(), 2);
    }

    #[test]
    fn test_delete_last_row_is_noop() {
        let mut sheet = Sheet::new(1, 3);
        sheet.set_value(id("A1"), "x", None);
        assert!(!sheet.delete_row(0));
        assert!(!sheet.delete_row(5));
        assert_eq!(sheet.rows(), 1);
        assert_eq!(sheet.raw(id("A1")), "x");
    }

    #[test]
    fn test_insert_and_delete_column() {
        let mut sheet = sheet_with(&[("A1", "a"), ("B1", "b"), ("C2", "c")]);
        sheet.resize_column(1, 120);
        assert!(sheet.insert_column(1));
        assert_eq!(sheet.cols(), 6);
        assert_eq!(sheet.raw(id("B1")), "");
        assert_eq!(sheet.raw(id("C1")), "b");
        assert_eq!(sheet.raw(id("D2")), "c");
        assert_eq!(sheet.column_width(2), Some(120));

        let before = sheet_with(&[("A1", "a"), ("B1", "b"), ("C2", "c")]);
        assert!(sheet.delete_column(1));
        assert_eq!(sheet.cells(), before.cells());
        assert_eq!(sheet.column_width(1), Some(120));
    }

    #[test]
    fn test_delete_last_column_is_noop() {
        let mut sheet = Sheet::new(3, 1);
        assert!(!sheet.delete_column(0));
        assert_eq!(sheet.cols(), 1);
    }

    #[test]
    fn test_sort_numeric() {
        let mut sheet = Sheet::new(3, 2);
        for (k, v) in [("A1", "10"), ("B1", "ten"), ("A2", "9"), ("B2", "nine"), ("A3", "100"), ("B3", "hundred")] {
            sheet.set_value(id(k), v, None);
        }
        assert!(sheet.sort_by_column(0, SortDirection::Asc));
        assert_eq!(sheet.raw(id("A1")), "9");
        assert_eq!(sheet.raw(id("B1")), "nine");
        assert_eq!(sheet.raw(id("A2")), "10");
        assert_eq!(sheet.raw(id("A3")), "100");
        assert_eq!(sheet.raw(id("B3")), "hundred");
    }

    #[test]
    fn test_sort_mixed_is_lexicographic() {
        let mut sheet = Sheet::new(3, 1);
        sheet.set_value(id("A1"), "10", None);
        sheet.set_value(id("A2"), "9", None);
        sheet.set_value(id("A3"), "Apple", None);
        sheet.sort_by_column(0, SortDirection::Asc);
        assert_eq!(sheet.raw(id("A1")), "10");
        assert_eq!(sheet.raw(id("A2")), "9");
        assert_eq!(sheet.raw(id("A3")), "Apple");
    }

    #[test]
    fn test_sort_desc_keeps_empties_last() {
        let mut sheet = Sheet::new(4, 1);
        sheet.set_value(id("A1"), "1", None);
        sheet.set_value(id("A3"), "3", None);
        sheet.set_value(id("A4"), "2", None);
        sheet.sort_by_column(0, SortDirection::Desc);
        assert_eq!(sheet.raw(id("A1")), "3");
        assert_eq!(sheet.raw(id("A2")), "2");
        assert_eq!(sheet.raw(id("A3")), "1");
        assert_eq!(sheet.raw(id("A4")), "");
    }

    #[test]
    fn test_sort_is_stable() {
        let mut sheet = Sheet::new(4, 2);
        for (row, (key, tag)) in [("b", "1"), ("a", "2"), ("b", "3"), ("a", "4")].iter().enumerate() {
            sheet.set_value(CellId::new(row, 0), key, None);
            sheet.set_value(CellId::new(row, 1), tag, None);
        }
        sheet.sort_by_column(0, SortDirection::Asc);
        let tags: Vec<&str> = (0..4).map(|r| sheet.raw(CellId::new(r, 1))).collect();
        assert_eq!(tags, vec!["2", "4", "1", "3"]);

        sheet.sort_by_column(0, SortDirection::Desc);
        let tags: Vec<&str> = (0..4).map(|r| sheet.raw(CellId::new(r, 1))).collect();
        assert_eq!(tags, vec!["1", "3", "2", "4"]);
    }

    #[test]
    fn test_sort_uses_evaluated_values() {
        let mut sheet = Sheet::new(2, 1);
        sheet.set_value(id("A1"), "=5*2", None);
        sheet.set_value(id("A2"), "3", None);
        sheet.sort_by_column(0, SortDirection::Asc);
        assert_eq!(sheet.raw(id("A1")), "3");
        assert_eq!(sheet.raw(id("A2")), "=5*2");
    }

    #[test]
    fn test_sort_bad_column_is_noop() {
        let mut sheet = Sheet::new(2, 1);
        assert!(!sheet.sort_by_column(3, SortDirection::Asc));
    }

    #[test]
    fn test_display_applies_format() {
        let mut sheet = Sheet::new(5, 5);
        let currency = FormatPatch { display_format: Some(DisplayFormat::Currency), ..Default::default() };
        sheet.set_value(id("A1"), "=2*3", Some(&currency));
        assert_eq!(sheet.evaluate(id("A1")), "6");
        assert_eq!(sheet.display(id("A1")), "$6.00");
    }
}
