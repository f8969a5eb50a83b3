//! Server operations a session needs. Implemented over HTTP
//! ([`HttpBackend`](crate::HttpBackend)) and in-process
//! ([`MemoryServer`](crate::MemoryServer)).

use calcgrid_protocol::{DocumentEvent, LoadResponse, Snapshot, StructuralWrite, WriteAck, WriteBatch};

use crate::error::SyncError;

pub trait DocumentBackend: Send {
    /// Current snapshot, version and name.
    fn load(&self) -> Result<LoadResponse, SyncError>;

    /// Compare-and-swap cell write: fails with [`SyncError::Conflict`] unless
    /// `batch.version` is the server's current version.
    fn write_cells(&self, batch: &WriteBatch) -> Result<WriteAck, SyncError>;

    /// Same contract as [`write_cells`](Self::write_cells).
    fn write_structural(&self, write: &StructuralWrite) -> Result<WriteAck, SyncError>;

    /// Full replace, last write wins.
    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), SyncError>;

    /// Presence only; no version involved.
    fn publish_cursor(&self, event: &DocumentEvent) -> Result<(), SyncError>;
}
