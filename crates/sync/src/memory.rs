//! In-process document server: compare-and-swap writes plus event fan-out.
//!
//! Used by tests and the `serve-demo` command. Cloning yields another handle
//! to the same document.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use calcgrid_engine::Cell;
use calcgrid_protocol::{
    DocumentEvent, LoadResponse, Snapshot, StructuralChange, StructuralWrite, Version, WriteAck, WriteBatch,
};

use crate::backend::DocumentBackend;
use crate::error::SyncError;

#[derive(Default)]
struct ServerState {
    version: Version,
    live: Snapshot,
    name: String,
    saved: Option<Snapshot>,
    subscribers: Vec<Sender<DocumentEvent>>,
    fail_next: u32,
}

impl ServerState {
    fn broadcast(&mut self, event: DocumentEvent) {
        // Drop receivers that have gone away
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn injected_failure(&mut self) -> Result<(), SyncError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(SyncError::Network("connection reset (injected)".into()));
        }
        Ok(())
    }

    fn check_version(&self, version: Version) -> Result<(), SyncError> {
        if version != self.version {
            return Err(SyncError::Conflict { current: self.version });
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    /// Empty document at version 1.
    pub fn new() -> Self {
        Self::with_document(Snapshot::default(), "Untitled")
    }

    pub fn with_document(snapshot: Snapshot, name: &str) -> Self {
        let state = ServerState {
            version: 1,
            live: snapshot,
            name: name.to_string(),
            ..ServerState::default()
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// New receiver for every event broadcast from now on.
    pub fn subscribe(&self) -> Receiver<DocumentEvent> {
        let (tx, rx) = mpsc::channel();
        self.state().subscribers.push(tx);
        rx
    }

    pub fn version(&self) -> Version {
        self.state().version
    }

    pub fn name(&self) -> String {
        self.state().name.clone()
    }

    /// Current document state as written through the CAS endpoints.
    pub fn live(&self) -> Snapshot {
        self.state().live.clone()
    }

    /// Last snapshot received through `save_snapshot`.
    pub fn saved_snapshot(&self) -> Option<Snapshot> {
        self.state().saved.clone()
    }

    /// Make the next `n` versioned writes fail with a network error.
    pub fn fail_next_writes(&self, n: u32) {
        self.state().fail_next = n;
    }
}

impl DocumentBackend for MemoryServer {
    fn load(&self) -> Result<LoadResponse, SyncError> {
        let state = self.state();
        Ok(LoadResponse {
            snapshot: state.live.clone(),
            version: state.version,
            name: state.name.clone(),
        })
    }

    fn write_cells(&self, batch: &WriteBatch) -> Result<WriteAck, SyncError> {
        let mut state = self.state();
        state.injected_failure()?;
        state.check_version(batch.version)?;

        for update in &batch.cells {
            let cell: Cell = update.cell();
            if cell.is_blank() {
                state.live.cells.remove(&update.coord);
            } else {
                state.live.cells.insert(update.coord, cell);
            }
        }
        state.version += 1;
        let version = state.version;
        state.broadcast(DocumentEvent::for_batch(batch, version));
        log::debug!("memory server: {} cell(s) accepted at version {}", batch.cells.len(), version);
        Ok(WriteAck { version })
    }

    fn write_structural(&self, write: &StructuralWrite) -> Result<WriteAck, SyncError> {
        let mut state = self.state();
        state.injected_failure()?;
        state.check_version(write.version)?;

        match &write.change {
            StructuralChange::ColumnWidth { column, width } => match width {
                Some(w) => {
                    state.live.column_widths.insert(column.clone(), *w);
                }
                None => {
                    state.live.column_widths.remove(column);
                }
            },
            StructuralChange::RowHeight { row, height } => match height {
                Some(h) => {
                    state.live.row_heights.insert(*row, *h);
                }
                None => {
                    state.live.row_heights.remove(row);
                }
            },
            StructuralChange::Rename { name } => state.name = name.clone(),
        }
        state.version += 1;
        let version = state.version;
        state.broadcast(DocumentEvent::for_structural(write, version));
        Ok(WriteAck { version })
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), SyncError> {
        self.state().saved = Some(snapshot.clone());
        Ok(())
    }

    fn publish_cursor(&self, event: &DocumentEvent) -> Result<(), SyncError> {
        self.state().broadcast(event.clone());
        Ok(())
    }
}
