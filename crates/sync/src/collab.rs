//! Applies broadcast events to the local store.
//!
//! Versioned events are applied only when strictly newer than the local
//! version, which is then adopted; anything else is discarded. Echoes of our
//! own writes only move the version: their payload may predate edits typed
//! while the write was in flight.

use std::time::Instant;

use calcgrid_core::letters_to_col;
use calcgrid_engine::GridStore;
use calcgrid_protocol::{DocumentEvent, Version};

use crate::presence::Presence;

/// What [`CollabSync::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// Version not newer than ours
    Stale,
    Presence,
    /// Echo of our own write; version adopted, payload skipped
    Own,
    /// Our own cursor echo
    Ignored,
}

#[derive(Debug, Default)]
pub struct CollabSync {
    version: Version,
    origin: Option<String>,
}

impl CollabSync {
    pub fn new(version: Version) -> Self {
        Self { version, origin: None }
    }

    /// Events carrying this origin are our own writes coming back.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Adopt an acknowledged version. Never moves backwards.
    pub fn adopt(&mut self, version: Version) {
        self.version = self.version.max(version);
    }

    /// Authoritative version from a full load.
    pub fn reset(&mut self, version: Version) {
        self.version = version;
    }

    pub fn apply(&mut self, event: DocumentEvent, store: &mut GridStore, presence: &mut Presence, now: Instant) -> Applied {
        if let Some(version) = event.version() {
            if version <= self.version {
                log::debug!("discarding stale {} at version {} (local {})", event.kind(), version, self.version);
                return Applied::Stale;
            }
            self.version = version;
            if self.origin.is_some() && event.origin() == self.origin.as_deref() {
                log::debug!("own {} echoed at version {}", event.kind(), version);
                return Applied::Own;
            }
        }

        match event {
            DocumentEvent::CellUpdated { update, .. } => {
                let coord = update.coord;
                store.apply_remote_cell(coord, update.cell());
            }
            DocumentEvent::CellRangeUpdated { cells, .. } => {
                for update in cells {
                    let coord = update.coord;
                    store.apply_remote_cell(coord, update.cell());
                }
            }
            DocumentEvent::ColumnResized { column, width, .. } => match letters_to_col(&column) {
                Some(col) => store.apply_remote_column_width(col, width),
                None => log::warn!("column.resized with invalid column label {:?}", column),
            },
            DocumentEvent::RowResized { row, height, .. } => match row.checked_sub(1) {
                Some(row) => store.apply_remote_row_height(row, height),
                None => log::warn!("row.resized with row 0"),
            },
            DocumentEvent::NameUpdated { name, .. } => store.apply_remote_name(&name),
            DocumentEvent::CursorMoved { user_id, cell, color } => {
                return if presence.update(&user_id, cell, &color, now) {
                    Applied::Presence
                } else {
                    Applied::Ignored
                };
            }
        }
        Applied::Applied
    }
}
