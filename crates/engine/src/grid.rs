//! The grid state store: the single owner of a document's cells, structure,
//! selection and undo history on one client.
//!
//! Local mutations go through [`GridStore`] methods, which snapshot the
//! pre-state into history and record which coordinates changed so the sync
//! layer can pick them up with [`GridStore::take_changes`]. Remote updates use
//! the `apply_remote_*` methods, which touch neither history nor the change set.

use std::collections::{BTreeMap, BTreeSet};

use calcgrid_core::{CellId, Range, Selection};

use crate::cell::{Cell, FormatPatch};
use crate::clipboard::{self, Clipboard};
use crate::formula::ReferenceSink;
use crate::history::{History, HistoryEntry, DEFAULT_CAPACITY};
use crate::sheet::{CellMap, Sheet, SortConfig, SortDirection};

/// Coordinates and structure touched by local edits since the last drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub cells: BTreeSet<CellId>,
    pub column_widths: BTreeSet<usize>,
    pub row_heights: BTreeSet<usize>,
    pub name: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.column_widths.is_empty() && self.row_heights.is_empty() && !self.name
    }
}

/// Full persisted state of a grid, as used for hydration and autosave.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridSnapshot {
    pub cells: CellMap,
    pub cursor: Option<CellId>,
    pub column_widths: BTreeMap<usize, u32>,
    pub row_heights: BTreeMap<usize, u32>,
    pub rows: Option<usize>,
    pub cols: Option<usize>,
}

#[derive(Debug)]
pub struct GridStore {
    sheet: Sheet,
    selection: Selection,
    sort_config: Option<SortConfig>,
    history: History,
    clipboard: Clipboard,
    name: String,
    changes: ChangeSet,
    default_rows: usize,
    default_cols: usize,
}

impl Default for GridStore {
    fn default() -> Self {
        Self::new(100, 26, DEFAULT_CAPACITY)
    }
}

impl GridStore {
    pub fn new(rows: usize, cols: usize, history_capacity: usize) -> Self {
        Self {
            sheet: Sheet::new(rows, cols),
            selection: Selection::default(),
            sort_config: None,
            history: History::new(history_capacity),
            clipboard: Clipboard::default(),
            name: String::new(),
            changes: ChangeSet::default(),
            default_rows: rows,
            default_cols: cols,
        }
    }

    // =========================================================================
    // Read access
    // =========================================================================

    pub fn sheet(&self) -> &Sheet {
        &self.sheet
    }

    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.sheet.cell(id)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn sort_config(&self) -> Option<SortConfig> {
        self.sort_config
    }

    pub fn clipboard(&self) -> &Clipboard {
        &self.clipboard
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Evaluated value of a cell.
    pub fn evaluate(&self, id: CellId) -> String {
        self.sheet.evaluate(id)
    }

    /// Evaluated value with the cell's display format applied.
    pub fn display_value(&self, id: CellId) -> String {
        self.sheet.display(id)
    }

    // =========================================================================
    // Local mutations
    // =========================================================================

    fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            sheet: self.sheet.clone(),
            selection: self.selection.clone(),
            sort_config: self.sort_config,
        }
    }

    /// Run a mutation with history and change tracking. Mutations that leave
    /// the grid untouched do not produce an undo step.
    fn mutate<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let pre = self.history_entry();
        let result = f(self);
        if self.sheet != pre.sheet || self.sort_config != pre.sort_config {
            self.record_diff(&pre.sheet);
            self.history.save(pre);
        }
        result
    }

    fn record_diff(&mut self, before: &Sheet) {
        let after = &self.sheet;
        let ids: BTreeSet<CellId> = before.cells().keys().chain(after.cells().keys()).copied().collect();
        for id in ids {
            if before.cell(id) != after.cell(id) {
                self.changes.cells.insert(id);
            }
        }
        diff_keys(before.column_widths(), after.column_widths(), &mut self.changes.column_widths);
        diff_keys(before.row_heights(), after.row_heights(), &mut self.changes.row_heights);
    }

    /// Set a cell's raw value, optionally merging a format patch.
    pub fn update_cell(&mut self, id: CellId, value: &str, format: Option<&FormatPatch>) {
        self.mutate(|store| store.sheet.set_value(id, value, format));
    }

    /// Merge a format patch into each target, creating empty cells as needed.
    pub fn update_cell_format(&mut self, ids: &[CellId], patch: &FormatPatch) {
        if patch.is_empty() {
            return;
        }
        self.mutate(|store| {
            for &id in ids {
                store.sheet.apply_format(id, patch);
            }
        });
    }

    pub fn clear_cells(&mut self, ids: &[CellId]) {
        self.mutate(|store| {
            for id in ids {
                store.sheet.remove(*id);
            }
        });
    }

    pub fn copy_cells(&mut self, ids: &[CellId]) {
        self.clipboard = Clipboard::copy(&self.sheet, ids);
    }

    /// Copy, then clear the sources.
    pub fn cut_cells(&mut self, ids: &[CellId]) {
        self.copy_cells(ids);
        self.clear_cells(ids);
    }

    /// Paste the clipboard with its anchor at `target`. Returns the cells written.
    pub fn paste_cells(&mut self, target: CellId) -> Vec<CellId> {
        if self.clipboard.is_empty() {
            return Vec::new();
        }
        let clip = self.clipboard.clone();
        self.mutate(|store| clip.paste(&mut store.sheet, target))
    }

    /// Fill-handle drag-copy of `source` over `range`.
    pub fn fill_range(&mut self, source: CellId, range: Range) -> Vec<CellId> {
        self.mutate(|store| clipboard::fill_range(&mut store.sheet, source, range))
    }

    pub fn insert_row(&mut self, at: usize) -> bool {
        let done = self.mutate(|store| store.sheet.insert_row(at));
        self.clamp_selection();
        done
    }

    pub fn delete_row(&mut self, at: usize) -> bool {
        let done = self.mutate(|store| store.sheet.delete_row(at));
        self.clamp_selection();
        done
    }

    pub fn insert_column(&mut self, at: usize) -> bool {
        let done = self.mutate(|store| store.sheet.insert_column(at));
        self.clamp_selection();
        done
    }

    pub fn delete_column(&mut self, at: usize) -> bool {
        let done = self.mutate(|store| store.sheet.delete_column(at));
        self.clamp_selection();
        done
    }

    pub fn resize_column(&mut self, col: usize, width: u32) -> bool {
        self.mutate(|store| store.sheet.resize_column(col, width))
    }

    pub fn resize_row(&mut self, row: usize, height: u32) -> bool {
        self.mutate(|store| store.sheet.resize_row(row, height))
    }

    pub fn sort_by_column(&mut self, col: usize, direction: SortDirection) -> bool {
        self.mutate(|store| {
            let sorted = store.sheet.sort_by_column(col, direction);
            if sorted {
                store.sort_config = Some(SortConfig { column: col, direction });
            }
            sorted
        })
    }

    /// Rename the document. Not part of undo history.
    pub fn rename(&mut self, name: &str) {
        if self.name != name {
            self.name = name.to_string();
            self.changes.name = true;
        }
    }

    fn clamp_selection(&mut self) {
        let (rows, cols) = self.sheet.bounds();
        self.selection.clamp_to(rows, cols);
    }

    // =========================================================================
    // Selection
    // =========================================================================

    pub fn select_cell(&mut self, id: CellId) {
        self.selection.select_cell(id);
    }

    pub fn select_range(&mut self, start: CellId, end: CellId) {
        self.selection.select_range(start, end);
    }

    /// Offer the clicked cell (or the current range, when the click extends
    /// it) to a formula being edited. Returns true if the sink took it.
    pub fn pick_reference(&self, id: CellId, sink: &mut dyn ReferenceSink) -> bool {
        if !sink.accepts_reference() || !self.sheet.contains(id) {
            return false;
        }
        let reference = match self.selection.range() {
            Some(range) if !range.is_single() && range.contains(id) => range.to_string(),
            _ => id.to_string(),
        };
        sink.append_reference(&reference);
        true
    }

    // =========================================================================
    // Undo / redo
    // =========================================================================

    fn restore(&mut self, entry: HistoryEntry) {
        let before = std::mem::replace(&mut self.sheet, entry.sheet);
        self.selection = entry.selection;
        self.sort_config = entry.sort_config;
        self.record_diff(&before);
    }

    pub fn undo(&mut self) -> bool {
        let current = self.history_entry();
        match self.history.undo(current) {
            Some(entry) => {
                self.restore(entry);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo() {
            Some(entry) => {
                self.restore(entry);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Sync plumbing
    // =========================================================================

    /// Drain the set of locally changed coordinates.
    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    /// Replace the whole grid with persisted state. History and pending
    /// changes are discarded.
    pub fn hydrate(&mut self, snapshot: GridSnapshot) {
        let (mut rows, mut cols) = (
            snapshot.rows.unwrap_or(self.default_rows),
            snapshot.cols.unwrap_or(self.default_cols),
        );
        // Never hide stored cells
        for id in snapshot.cells.keys() {
            rows = rows.max(id.row + 1);
            cols = cols.max(id.col + 1);
        }
        let mut sheet = Sheet::new(rows, cols);
        sheet.replace_cells(snapshot.cells);
        sheet.set_sizes(snapshot.column_widths, snapshot.row_heights);
        self.sheet = sheet;

        self.selection = Selection::new(snapshot.cursor.unwrap_or(CellId::new(0, 0)));
        self.clamp_selection();
        self.sort_config = None;
        self.history.clear();
        self.changes = ChangeSet::default();
    }

    /// Persistable state for autosave.
    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            cells: self.sheet.cells().clone(),
            cursor: Some(self.selection.active_cell()),
            column_widths: self.sheet.column_widths().clone(),
            row_heights: self.sheet.row_heights().clone(),
            rows: Some(self.sheet.rows()),
            cols: Some(self.sheet.cols()),
        }
    }

    /// Set a cell from a remote update. The grid grows to fit the coordinate.
    pub fn apply_remote_cell(&mut self, id: CellId, cell: Cell) {
        self.sheet.ensure_size(id.row + 1, id.col + 1);
        self.sheet.set_cell(id, cell);
    }

    pub fn apply_remote_column_width(&mut self, col: usize, width: Option<u32>) {
        self.sheet.ensure_size(0, col + 1);
        let mut widths = self.sheet.column_widths().clone();
        match width {
            Some(w) => widths.insert(col, w),
            None => widths.remove(&col),
        };
        let heights = self.sheet.row_heights().clone();
        self.sheet.set_sizes(widths, heights);
    }

    pub fn apply_remote_row_height(&mut self, row: usize, height: Option<u32>) {
        self.sheet.ensure_size(row + 1, 0);
        let mut heights = self.sheet.row_heights().clone();
        match height {
            Some(h) => heights.insert(row, h),
            None => heights.remove(&row),
        };
        let widths = self.sheet.column_widths().clone();
        self.sheet.set_sizes(widths, heights);
    }

    pub fn apply_remote_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

fn diff_keys(before: &BTreeMap<usize, u32>, after: &BTreeMap<usize, u32>, out: &mut BTreeSet<usize>) {
    for key in before.keys().chain(after.keys()) {
        if before.get(key) != after.get(key) {
            out.insert(*key);
        }
    }
}
