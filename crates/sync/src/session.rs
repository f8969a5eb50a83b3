//! One open document on one client.
//!
//! [`DocumentSession`] owns the [`GridStore`] and drives the sync pipeline
//! from [`tick`](DocumentSession::tick), which the host calls with the current
//! time. Each tick:
//!
//! 1. handles finished backend requests (acks, conflicts, loads, saves)
//! 2. submits the next due write and autosave
//! 3. applies broadcast events that arrived meanwhile
//! 4. sweeps stale peer cursors
//!
//! Local edits go through [`edit`](DocumentSession::edit) so the changed
//! coordinates reach the batcher and autosave.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use calcgrid_config::Settings;
use calcgrid_core::{col_to_letters, CellId};
use calcgrid_engine::GridStore;
use calcgrid_protocol::{DocumentEvent, StructuralChange, Version, WriteAck};

use crate::autosave::Autosave;
use crate::batcher::{ChangeBatcher, Outgoing, RetryOutcome};
use crate::collab::CollabSync;
use crate::dispatch::{Completion, Dispatcher, Request};
use crate::error::SyncError;
use crate::presence::{color_for, PeerCursor, Presence};

/// User-facing sync notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Someone else wrote first; local unsent changes were dropped and a
    /// reload started.
    Conflict { current_version: Version },
    Reloaded { version: Version },
    /// Write failed in transit; `retry_in` is `None` once retries are used up.
    NetworkFailure { error: String, retry_in: Option<Duration> },
    /// Server refused the write for a reason other than a stale version.
    WriteRejected(String),
    LoadFailed(String),
    SaveFailed(String),
}

/// Identity used for presence and write origins.
pub fn session_user_id(settings: &Settings) -> String {
    settings
        .server
        .user_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

pub struct DocumentSession {
    store: GridStore,
    collab: CollabSync,
    batcher: ChangeBatcher,
    autosave: Autosave,
    presence: Presence,
    dispatcher: Dispatcher,
    events: Option<Receiver<DocumentEvent>>,
    notices: VecDeque<Notice>,
    user_id: String,
    color: String,
    loading: bool,
    loaded: bool,
}

impl DocumentSession {
    /// `events` is the document's broadcast channel, if subscribed.
    pub fn new(dispatcher: Dispatcher, events: Option<Receiver<DocumentEvent>>, settings: &Settings) -> Self {
        let user_id = session_user_id(settings);
        let grid = &settings.grid;
        let sync = &settings.sync;
        Self {
            store: GridStore::new(grid.default_rows, grid.default_columns, grid.history_capacity),
            collab: CollabSync::default().with_origin(user_id.clone()),
            batcher: ChangeBatcher::from_settings(sync).with_origin(user_id.clone()),
            autosave: Autosave::new(sync.autosave_debounce()),
            presence: Presence::new(user_id.clone(), sync.presence_ttl(), sync.presence_sweep()),
            dispatcher,
            events,
            notices: VecDeque::new(),
            color: color_for(&user_id).to_string(),
            user_id,
            loading: false,
            loaded: false,
        }
    }

    /// Request the initial load; the store is hydrated on a later tick.
    pub fn open(&mut self) {
        self.request_load();
    }

    fn request_load(&mut self) {
        if !self.loading {
            self.loading = true;
            self.dispatcher.submit(Request::Load);
        }
    }

    pub fn store(&self) -> &GridStore {
        &self.store
    }

    pub fn version(&self) -> Version {
        self.collab.version()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn peers(&self) -> Vec<&PeerCursor> {
        self.presence.peers()
    }

    pub fn batcher(&self) -> &ChangeBatcher {
        &self.batcher
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    /// Nothing left to send, save or load.
    pub fn is_idle(&self) -> bool {
        self.batcher.is_idle() && !self.autosave.is_pending() && !self.loading
    }

    /// Earliest instant a tick has timed work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.batcher.next_deadline(), self.autosave.deadline()].into_iter().flatten().min()
    }

    /// Run a local mutation and queue whatever it changed.
    pub fn edit<R>(&mut self, now: Instant, f: impl FnOnce(&mut GridStore) -> R) -> R {
        let result = f(&mut self.store);
        self.record_changes(now);
        result
    }

    pub fn set_cell(&mut self, now: Instant, id: CellId, value: &str) {
        self.edit(now, |store| store.update_cell(id, value, None));
    }

    /// Move our cursor and tell the others. The saved snapshot keeps it too.
    pub fn move_cursor(&mut self, now: Instant, id: CellId) {
        self.store.select_cell(id);
        self.autosave.touch(now);
        let event = DocumentEvent::CursorMoved {
            user_id: self.user_id.clone(),
            cell: self.store.selection().active_cell(),
            color: self.color.clone(),
        };
        self.dispatcher.submit(Request::PublishCursor(event));
    }

    fn record_changes(&mut self, now: Instant) {
        let changes = self.store.take_changes();
        if changes.is_empty() {
            return;
        }
        for id in changes.cells {
            let cell = self.store.cell(id).cloned().unwrap_or_default();
            self.batcher.record_cell(id, cell, now);
        }
        for col in changes.column_widths {
            let width = self.store.sheet().column_width(col);
            self.batcher
                .record_structural(StructuralChange::ColumnWidth { column: col_to_letters(col), width });
        }
        for row in changes.row_heights {
            let height = self.store.sheet().row_height(row);
            self.batcher.record_structural(StructuralChange::RowHeight { row: row + 1, height });
        }
        if changes.name {
            self.batcher
                .record_structural(StructuralChange::Rename { name: self.store.name().to_string() });
        }
        self.autosave.touch(now);
    }

    pub fn tick(&mut self, now: Instant) {
        for completion in self.dispatcher.drain() {
            self.handle(completion, now);
        }

        if let Some(outgoing) = self.batcher.poll(now, self.collab.version()) {
            match outgoing {
                Outgoing::Cells(batch) => self.dispatcher.submit(Request::WriteCells(batch)),
                Outgoing::Structural(write) => self.dispatcher.submit(Request::WriteStructural(write)),
            }
        }
        if self.loaded {
            if let Some((snapshot, serialized)) = self.autosave.poll(now, &self.store) {
                self.dispatcher.submit(Request::SaveSnapshot { snapshot, serialized });
            }
        }

        self.drain_events(now);
        self.presence.poll(now);
    }

    fn drain_events(&mut self, now: Instant) {
        let Some(rx) = &self.events else {
            return;
        };
        let mut received = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => received.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::warn!("document event channel closed");
                    self.events = None;
                    break;
                }
            }
        }
        for event in received {
            self.collab.apply(event, &mut self.store, &mut self.presence, now);
        }
    }

    fn handle(&mut self, completion: Completion, now: Instant) {
        match completion {
            Completion::Loaded(Ok(response)) => {
                let mut grid = response.snapshot.into_grid();
                if self.loaded {
                    // A reload keeps our own cursor where it was
                    grid.cursor = Some(self.store.selection().active_cell());
                }
                self.store.hydrate(grid);
                self.store.apply_remote_name(&response.name);
                self.collab.reset(response.version);
                self.autosave.mark_saved(&self.store);
                if self.loaded {
                    log::info!("reloaded document at version {}", response.version);
                    self.notices.push_back(Notice::Reloaded { version: response.version });
                }
                self.loading = false;
                self.loaded = true;
            }
            Completion::Loaded(Err(e)) => {
                log::warn!("document load failed: {}", e);
                self.loading = false;
                self.notices.push_back(Notice::LoadFailed(e.to_string()));
            }
            Completion::CellsWritten { batch, result } => {
                if let Ok(ack) = &result {
                    log::info!("{} cell(s) written at version {}", batch.cells.len(), ack.version);
                }
                self.write_finished(result, now);
            }
            Completion::StructuralWritten { result, .. } => self.write_finished(result, now),
            Completion::SnapshotSaved { serialized, result } => match result {
                Ok(()) => self.autosave.on_saved(serialized),
                Err(e) => {
                    log::warn!("autosave failed: {}", e);
                    self.notices.push_back(Notice::SaveFailed(e.to_string()));
                }
            },
            Completion::CursorPublished(result) => {
                if let Err(e) = result {
                    log::debug!("cursor publish failed: {}", e);
                }
            }
        }
    }

    fn write_finished(&mut self, result: Result<WriteAck, SyncError>, now: Instant) {
        match result {
            Ok(ack) => {
                self.batcher.on_ack();
                self.collab.adopt(ack.version);
            }
            Err(SyncError::Conflict { current }) => {
                log::warn!("write rejected: server at version {}, local {}", current, self.collab.version());
                self.batcher.on_conflict();
                self.autosave.cancel();
                self.notices.push_back(Notice::Conflict { current_version: current });
                self.request_load();
            }
            Err(e) if e.is_retryable() => {
                log::warn!("write failed: {}", e);
                let retry_in = match self.batcher.on_failure(now) {
                    RetryOutcome::Scheduled(delay) => Some(delay),
                    RetryOutcome::Exhausted => None,
                };
                self.notices.push_back(Notice::NetworkFailure { error: e.to_string(), retry_in });
            }
            Err(e) => {
                log::warn!("write refused: {}", e);
                self.batcher.on_conflict();
                self.autosave.cancel();
                self.notices.push_back(Notice::WriteRejected(e.to_string()));
                self.request_load();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryServer;
    use calcgrid_engine::Cell;
    use calcgrid_protocol::Snapshot;

    const MS: Duration = Duration::from_millis(1);

    fn settings(user: &str) -> Settings {
        let mut s = Settings::default();
        s.server.user_id = Some(user.to_string());
        s.grid.default_rows = 20;
        s.grid.default_columns = 6;
        s
    }

    fn open(server: &MemoryServer, user: &str, t: Instant) -> DocumentSession {
        let mut session =
            DocumentSession::new(Dispatcher::inline(server.clone()), Some(server.subscribe()), &settings(user));
        session.open();
        session.tick(t);
        session
    }

    fn a1() -> CellId {
        CellId::new(0, 0)
    }

    #[test]
    fn test_open_hydrates_from_server() {
        let mut snapshot = Snapshot::default();
        snapshot.cells.insert(CellId::new(2, 1), Cell::new("=1+2"));
        snapshot.column_widths.insert("B".into(), 140);
        let server = MemoryServer::with_document(snapshot, "Budget");

        let session = open(&server, "alice", Instant::now());
        assert!(session.is_loaded());
        assert_eq!(session.version(), 1);
        assert_eq!(session.store().evaluate(CellId::new(2, 1)), "3");
        assert_eq!(session.store().sheet().column_width(1), Some(140));
        assert_eq!(session.store().name(), "Budget");
    }

    #[test]
    fn test_edit_flushes_after_debounce() {
        let t0 = Instant::now();
        let server = MemoryServer::new();
        let mut session = open(&server, "alice", t0);

        session.set_cell(t0, a1(), "hello");
        session.tick(t0 + 100 * MS);
        assert_eq!(server.version(), 1);

        session.tick(t0 + 500 * MS);
        assert_eq!(server.version(), 2);
        session.tick(t0 + 501 * MS);
        assert_eq!(session.version(), 2);
        assert!(session.batcher().is_idle());
    }

    #[test]
    fn test_remote_edit_applied() {
        let t0 = Instant::now();
        let server = MemoryServer::new();
        let mut alice = open(&server, "alice", t0);
        let mut bob = open(&server, "bob", t0);

        alice.set_cell(t0, a1(), "from alice");
        alice.tick(t0 + 500 * MS);
        bob.tick(t0 + 510 * MS);
        assert_eq!(bob.store().sheet().raw(a1()), "from alice");
        assert_eq!(bob.version(), 2);
    }

    #[test]
    fn test_structural_changes_sync() {
        let t0 = Instant::now();
        let server = MemoryServer::new();
        let mut alice = open(&server, "alice", t0);
        let mut bob = open(&server, "bob", t0);

        alice.edit(t0, |store| {
            store.resize_column(2, 200);
            store.rename("Forecast");
        });
        for i in 0..4 {
            alice.tick(t0 + i * MS);
        }
        assert_eq!(server.version(), 3);
        assert_eq!(server.name(), "Forecast");

        bob.tick(t0 + 10 * MS);
        assert_eq!(bob.store().sheet().column_width(2), Some(200));
        assert_eq!(bob.store().name(), "Forecast");
        assert_eq!(bob.version(), 3);
    }

    #[test]
    fn test_network_failure_retries_with_backoff() {
        let t0 = Instant::now();
        let server = MemoryServer::new();
        let mut session = open(&server, "alice", t0);
        server.fail_next_writes(1);

        session.set_cell(t0, a1(), "v");
        session.tick(t0 + 500 * MS);
        session.tick(t0 + 501 * MS);
        let notices = session.take_notices();
        assert!(matches!(
            notices.as_slice(),
            [Notice::NetworkFailure { retry_in: Some(d), .. }] if *d == 1_000 * MS
        ));
        assert_eq!(server.version(), 1);

        session.tick(t0 + 1_501 * MS);
        session.tick(t0 + 1_502 * MS);
        assert_eq!(server.version(), 2);
        assert_eq!(session.version(), 2);
    }

    #[test]
    fn test_autosave_after_edit() {
        let t0 = Instant::now();
        let server = MemoryServer::new();
        let mut session = open(&server, "alice", t0);
        assert!(server.saved_snapshot().is_none());

        session.set_cell(t0, a1(), "saved");
        session.tick(t0 + 800 * MS);
        session.tick(t0 + 801 * MS);
        let saved = server.saved_snapshot().unwrap();
        assert_eq!(saved.cells.get(&a1()).map(|c| c.value.as_str()), Some("saved"));
        assert!(session.is_idle());
    }

    #[test]
    fn test_cursor_move_autosaves() {
        let t0 = Instant::now();
        let server = MemoryServer::new();
        let mut session = open(&server, "alice", t0);
        let d8 = CellId::parse("D8").unwrap();

        session.move_cursor(t0, d8);
        assert!(!session.is_idle());
        session.tick(t0 + 800 * MS);
        session.tick(t0 + 801 * MS);
        let saved = server.saved_snapshot().unwrap();
        assert_eq!(saved.cursor, Some(d8));
        assert!(saved.cells.is_empty());
        assert!(session.is_idle());
    }

    #[test]
    fn test_cursor_presence() {
        let t0 = Instant::now();
        let server = MemoryServer::new();
        let mut alice = open(&server, "alice", t0);
        let mut bob = open(&server, "bob", t0);

        alice.move_cursor(t0, CellId::new(4, 2));
        alice.tick(t0);
        bob.tick(t0);
        let peers = bob.peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].user_id, "alice");
        assert_eq!(peers[0].cell, CellId::new(4, 2));
        // Own echo ignored
        assert!(alice.peers().is_empty());

        bob.tick(t0 + 11_000 * MS);
        assert!(bob.peers().is_empty());
    }
}
