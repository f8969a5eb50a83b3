//! Copy/paste and fill-handle replication.

use calcgrid_core::{CellId, Range};

use crate::cell::Cell;
use crate::sheet::{CellMap, Sheet};

/// Copied cells. `cell_ids` keeps the copy order; the first id is the paste anchor.
/// Empty source cells are in `cell_ids` but not in `data`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clipboard {
    pub data: CellMap,
    pub cell_ids: Vec<CellId>,
}

impl Clipboard {
    /// Snapshot values and formats of `coords` from the sheet.
    pub fn copy(sheet: &Sheet, coords: &[CellId]) -> Self {
        let mut cell_ids = Vec::with_capacity(coords.len());
        let mut data = CellMap::new();
        for &id in coords {
            if cell_ids.contains(&id) {
                continue;
            }
            cell_ids.push(id);
            if let Some(cell) = sheet.cell(id) {
                data.insert(id, cell.clone());
            }
        }
        Self { data, cell_ids }
    }

    pub fn is_empty(&self) -> bool {
        self.cell_ids.is_empty()
    }

    /// Destination of every copied cell when pasting at `target`, keeping each
    /// cell's offset from the anchor. Destinations left of column A or above
    /// row 1 are dropped.
    pub fn placements(&self, target: CellId) -> Vec<(CellId, Cell)> {
        let Some(anchor) = self.cell_ids.first() else {
            return Vec::new();
        };
        self.cell_ids
            .iter()
            .filter_map(|id| {
                let d_row = id.row as isize - anchor.row as isize;
                let d_col = id.col as isize - anchor.col as isize;
                let dest = target.offset(d_row, d_col)?;
                let cell = self.data.get(id).cloned().unwrap_or_default();
                Some((dest, cell))
            })
            .collect()
    }

    /// Paste into the sheet, overwriting destinations. Cells outside the sheet
    /// are silently dropped. Returns the coordinates written.
    pub fn paste(&self, sheet: &mut Sheet, target: CellId) -> Vec<CellId> {
        let mut written = Vec::new();
        for (dest, cell) in self.placements(target) {
            if !sheet.contains(dest) {
                continue;
            }
            sheet.set_cell(dest, cell);
            written.push(dest);
        }
        written
    }
}

/// Fill-handle drag-copy: replicate `source` (value and format) into every
/// cell of `range` except the source itself.
pub fn fill_range(sheet: &mut Sheet, source: CellId, range: Range) -> Vec<CellId> {
    let cell = sheet.cell(source).cloned().unwrap_or_default();
    let mut written = Vec::new();
    for dest in range.cells() {
        if dest == source || !sheet.contains(dest) {
            continue;
        }
        sheet.set_cell(dest, cell.clone());
        written.push(dest);
    }
    written
}
