//! calcgrid document protocol: wire types shared by clients, the HTTP
//! backend and the in-process server.
//!
//! Everything is JSON. Coordinates travel in `B12` form, columns by label and
//! rows by their 1-based number, so payloads read the way users see the grid.
//!
//! # Versions
//!
//! Each document has a single monotonically increasing version. Writes carry
//! the version the client believes is current; the server accepts a write only
//! if it matches and answers with the new version, otherwise with a conflict
//! carrying its current version. Broadcast events carry the version they
//! produced, except `cursor.moved`, which is presence only.

use std::collections::BTreeMap;

use calcgrid_core::{letters_to_col, col_to_letters, CellId};
use calcgrid_engine::{Cell, CellFormat, CellMap, GridSnapshot};
use serde::{Deserialize, Serialize};

/// Document version number.
pub type Version = u64;

/// Current protocol version. Increment for breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// Writes
// =============================================================================

/// One cell's new content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub coord: CellId,
    pub value: String,
    #[serde(default)]
    pub format: CellFormat,
}

impl CellUpdate {
    pub fn new(coord: CellId, cell: Cell) -> Self {
        Self { coord, value: cell.value, format: cell.format }
    }

    pub fn cell(&self) -> Cell {
        Cell::with_format(self.value.clone(), self.format.clone())
    }
}

/// Batched cell write, compare-and-swap on `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub cells: Vec<CellUpdate>,
    pub version: Version,
    /// Writer id, echoed on the resulting broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Successful write: the version the server assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    pub version: Version,
}

/// Body of a rejected (stale) write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictBody {
    pub current_version: Version,
}

/// Single-column/row or document-level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralChange {
    /// `width: None` resets to the default width
    ColumnWidth { column: String, width: Option<u32> },
    /// `row` is 1-based
    RowHeight { row: usize, height: Option<u32> },
    Rename { name: String },
}

/// Structural write, same compare-and-swap contract as [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralWrite {
    pub change: StructuralChange,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

// =============================================================================
// Snapshot / load
// =============================================================================

/// Full document state. Saved without a version check (last write wins).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub cells: CellMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CellId>,
    /// Keyed by column label
    #[serde(default)]
    pub column_widths: BTreeMap<String, u32>,
    /// Keyed by 1-based row number
    #[serde(default)]
    pub row_heights: BTreeMap<usize, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<usize>,
}

impl Snapshot {
    pub fn from_grid(grid: &GridSnapshot) -> Self {
        Self {
            cells: grid.cells.clone(),
            cursor: grid.cursor,
            column_widths: grid.column_widths.iter().map(|(c, w)| (col_to_letters(*c), *w)).collect(),
            row_heights: grid.row_heights.iter().map(|(r, h)| (r + 1, *h)).collect(),
            rows: grid.rows,
            columns: grid.cols,
        }
    }

    /// Convert to engine form. Unparseable labels and row 0 are dropped.
    pub fn into_grid(self) -> GridSnapshot {
        GridSnapshot {
            cells: self.cells,
            cursor: self.cursor,
            column_widths: self
                .column_widths
                .into_iter()
                .filter_map(|(label, w)| Some((letters_to_col(&label)?, w)))
                .collect(),
            row_heights: self
                .row_heights
                .into_iter()
                .filter_map(|(row, h)| Some((row.checked_sub(1)?, h)))
                .collect(),
            rows: self.rows,
            cols: self.columns,
        }
    }
}

/// Response of the load endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadResponse {
    pub snapshot: Snapshot,
    pub version: Version,
    #[serde(default)]
    pub name: String,
}

// =============================================================================
// Broadcast events
// =============================================================================

/// Events fanned out on a document's channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DocumentEvent {
    #[serde(rename = "cell.updated")]
    CellUpdated {
        version: Version,
        #[serde(flatten)]
        update: CellUpdate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
    #[serde(rename = "cell-range.updated")]
    CellRangeUpdated {
        version: Version,
        cells: Vec<CellUpdate>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
    #[serde(rename = "column.resized")]
    ColumnResized {
        version: Version,
        column: String,
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
    #[serde(rename = "row.resized")]
    RowResized {
        version: Version,
        row: usize,
        height: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
    #[serde(rename = "name.updated")]
    NameUpdated {
        version: Version,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
    #[serde(rename = "cursor.moved")]
    CursorMoved {
        user_id: String,
        cell: CellId,
        color: String,
    },
}

impl DocumentEvent {
    /// Version carried by the event; `None` for presence.
    pub fn version(&self) -> Option<Version> {
        match self {
            DocumentEvent::CellUpdated { version, .. }
            | DocumentEvent::CellRangeUpdated { version, .. }
            | DocumentEvent::ColumnResized { version, .. }
            | DocumentEvent::RowResized { version, .. }
            | DocumentEvent::NameUpdated { version, .. } => Some(*version),
            DocumentEvent::CursorMoved { .. } => None,
        }
    }

    pub fn origin(&self) -> Option<&str> {
        match self {
            DocumentEvent::CellUpdated { origin, .. }
            | DocumentEvent::CellRangeUpdated { origin, .. }
            | DocumentEvent::ColumnResized { origin, .. }
            | DocumentEvent::RowResized { origin, .. }
            | DocumentEvent::NameUpdated { origin, .. } => origin.as_deref(),
            DocumentEvent::CursorMoved { user_id, .. } => Some(user_id),
        }
    }

    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentEvent::CellUpdated { .. } => "cell.updated",
            DocumentEvent::CellRangeUpdated { .. } => "cell-range.updated",
            DocumentEvent::ColumnResized { .. } => "column.resized",
            DocumentEvent::RowResized { .. } => "row.resized",
            DocumentEvent::NameUpdated { .. } => "name.updated",
            DocumentEvent::CursorMoved { .. } => "cursor.moved",
        }
    }

    /// Event announcing an accepted cell batch: a single cell goes out as
    /// `cell.updated`, anything larger as `cell-range.updated`.
    pub fn for_batch(batch: &WriteBatch, version: Version) -> Self {
        match batch.cells.as_slice() {
            [single] => DocumentEvent::CellUpdated {
                version,
                update: single.clone(),
                origin: batch.origin.clone(),
            },
            cells => DocumentEvent::CellRangeUpdated {
                version,
                cells: cells.to_vec(),
                origin: batch.origin.clone(),
            },
        }
    }

    /// Event announcing an accepted structural write.
    pub fn for_structural(write: &StructuralWrite, version: Version) -> Self {
        let origin = write.origin.clone();
        match &write.change {
            StructuralChange::ColumnWidth { column, width } => DocumentEvent::ColumnResized {
                version,
                column: column.clone(),
                width: *width,
                origin,
            },
            StructuralChange::RowHeight { row, height } => DocumentEvent::RowResized {
                version,
                row: *row,
                height: *height,
                origin,
            },
            StructuralChange::Rename { name } => DocumentEvent::NameUpdated {
                version,
                name: name.clone(),
                origin,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> CellId {
        CellId::parse(s).unwrap()
    }

    #[test]
    fn test_cell_updated_wire_format() {
        let event = DocumentEvent::CellUpdated {
            version: 7,
            update: CellUpdate::new(id("B3"), Cell::new("hi")),
            origin: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "cell.updated");
        assert_eq!(value["version"], 7);
        assert_eq!(value["coord"], "B3");
        assert_eq!(value["value"], "hi");
        let back: DocumentEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_cursor_has_no_version() {
        let raw = json!({"type": "cursor.moved", "user_id": "u1", "cell": "C4", "color": "#ff0000"});
        let event: DocumentEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.version(), None);
        assert_eq!(event.kind(), "cursor.moved");
        assert_eq!(event.origin(), Some("u1"));
    }

    #[test]
    fn test_parse_each_kind() {
        let events = [
            json!({"type": "cell-range.updated", "version": 3, "cells": [{"coord": "A1", "value": "x"}]}),
            json!({"type": "column.resized", "version": 4, "column": "C", "width": 120}),
            json!({"type": "row.resized", "version": 5, "row": 2, "height": null}),
            json!({"type": "name.updated", "version": 6, "name": "Budget"}),
        ];
        let versions: Vec<Option<u64>> = events
            .into_iter()
            .map(|e| serde_json::from_value::<DocumentEvent>(e).unwrap().version())
            .collect();
        assert_eq!(versions, vec![Some(3), Some(4), Some(5), Some(6)]);
    }

    #[test]
    fn test_unknown_event_rejected() {
        let raw = json!({"type": "sheet.deleted", "version": 1});
        assert!(serde_json::from_value::<DocumentEvent>(raw).is_err());
    }

    #[test]
    fn test_for_batch_picks_kind() {
        let one = WriteBatch { cells: vec![CellUpdate::new(id("A1"), Cell::new("1"))], version: 1, origin: None };
        assert_eq!(DocumentEvent::for_batch(&one, 2).kind(), "cell.updated");
        let two = WriteBatch {
            cells: vec![CellUpdate::new(id("A1"), Cell::new("1")), CellUpdate::new(id("A2"), Cell::new("2"))],
            version: 1,
            origin: Some("me".into()),
        };
        let event = DocumentEvent::for_batch(&two, 2);
        assert_eq!(event.kind(), "cell-range.updated");
        assert_eq!(event.origin(), Some("me"));
    }

    #[test]
    fn test_snapshot_keys_are_labels() {
        let mut grid = GridSnapshot::default();
        grid.cells.insert(id("A1"), Cell::new("v"));
        grid.column_widths.insert(27, 90);
        grid.row_heights.insert(0, 30);
        grid.cursor = Some(id("B2"));

        let snapshot = Snapshot::from_grid(&grid);
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["column_widths"]["AB"], 90);
        assert_eq!(value["row_heights"]["1"], 30);
        assert_eq!(value["cells"]["A1"]["value"], "v");
        assert_eq!(value["cursor"], "B2");

        let back: Snapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back.into_grid(), grid);
    }

    #[test]
    fn test_structural_write_format() {
        let write = StructuralWrite {
            change: StructuralChange::ColumnWidth { column: "B".into(), width: Some(140) },
            version: 9,
            origin: None,
        };
        let value = serde_json::to_value(&write).unwrap();
        assert_eq!(value["change"]["kind"], "column_width");
        assert_eq!(value["change"]["column"], "B");
        assert_eq!(DocumentEvent::for_structural(&write, 10).version(), Some(10));
    }
}
