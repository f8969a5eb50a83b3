// End-to-end sync through the in-memory server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use calcgrid_config::Settings;
use calcgrid_core::CellId;
use calcgrid_protocol::{DocumentEvent, LoadResponse, Snapshot, StructuralWrite, WriteAck, WriteBatch};
use calcgrid_sync::{Dispatcher, DocumentBackend, DocumentSession, MemoryServer, Notice, SyncError};

const MS: Duration = Duration::from_millis(1);

fn open(server: &MemoryServer, user: &str, t: Instant) -> DocumentSession {
    let mut settings = Settings::default();
    settings.server.user_id = Some(user.to_string());
    let mut session = DocumentSession::new(Dispatcher::inline(server.clone()), Some(server.subscribe()), &settings);
    session.open();
    session.tick(t);
    session
}

fn a1() -> CellId {
    CellId::new(0, 0)
}

#[test]
fn loser_of_concurrent_write_reloads_winner_state() {
    let t0 = Instant::now();
    let server = MemoryServer::new();
    let mut a = open(&server, "a", t0);
    let mut b = open(&server, "b", t0);
    assert_eq!((a.version(), b.version()), (1, 1));

    a.set_cell(t0, a1(), "hello");
    b.set_cell(t0, a1(), "world");

    // A flushes first: version 1 -> 2
    a.tick(t0 + 500 * MS);
    assert_eq!(server.version(), 2);

    // B still believes it is at version 1
    b.tick(t0 + 500 * MS);
    assert_eq!(server.version(), 2, "stale write must not be accepted");

    // Conflict handled, reload requested, then hydrated
    b.tick(t0 + 501 * MS);
    b.tick(t0 + 502 * MS);

    let notices = b.take_notices();
    assert!(notices.contains(&Notice::Conflict { current_version: 2 }));
    assert!(notices.contains(&Notice::Reloaded { version: 2 }));
    assert_eq!(b.store().sheet().raw(a1()), "hello");
    assert_eq!(b.version(), 2);
    assert!(b.batcher().is_idle(), "rejected edit is not retried");

    a.tick(t0 + 503 * MS);
    assert_eq!(a.store().sheet().raw(a1()), "hello");
    assert_eq!(a.version(), 2);
    assert!(a.take_notices().is_empty());
}

#[test]
fn local_edit_after_ack_survives() {
    let t0 = Instant::now();
    let server = MemoryServer::new();
    let mut a = open(&server, "a", t0);

    a.set_cell(t0, a1(), "1");
    a.tick(t0 + 500 * MS);
    a.tick(t0 + 501 * MS);
    // Edit again after the ack; nothing replays version 2 over it
    a.set_cell(t0 + 502 * MS, a1(), "2");
    a.tick(t0 + 503 * MS);
    assert_eq!(a.store().sheet().raw(a1()), "2");
}

#[test]
fn worker_dispatcher_round_trip() {
    let server = MemoryServer::new();
    let mut settings = Settings::default();
    settings.server.user_id = Some("w".into());
    let mut session = DocumentSession::new(Dispatcher::spawn(server.clone()), Some(server.subscribe()), &settings);
    session.open();

    let start = Instant::now();
    while !session.is_loaded() {
        assert!(start.elapsed() < Duration::from_secs(5), "load never completed");
        session.tick(Instant::now());
        std::thread::sleep(Duration::from_millis(5));
    }

    let t = Instant::now();
    session.set_cell(t, CellId::new(3, 3), "=2*21");
    while server.version() < 2 || session.version() < 2 {
        assert!(start.elapsed() < Duration::from_secs(5), "write never acknowledged");
        session.tick(t + Duration::from_secs(1));
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(server.live().cells.get(&CellId::new(3, 3)).map(|c| c.value.as_str()), Some("=2*21"));
    assert_eq!(session.store().evaluate(CellId::new(3, 3)), "42");
}

/// Broadcasts the first cell write right away but holds its ack back.
struct SlowFirstAck {
    inner: MemoryServer,
    delayed: AtomicBool,
}

impl DocumentBackend for SlowFirstAck {
    fn load(&self) -> Result<LoadResponse, SyncError> {
        self.inner.load()
    }

    fn write_cells(&self, batch: &WriteBatch) -> Result<WriteAck, SyncError> {
        let ack = self.inner.write_cells(batch);
        if !self.delayed.swap(true, Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(300));
        }
        ack
    }

    fn write_structural(&self, write: &StructuralWrite) -> Result<WriteAck, SyncError> {
        self.inner.write_structural(write)
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), SyncError> {
        self.inner.save_snapshot(snapshot)
    }

    fn publish_cursor(&self, event: &DocumentEvent) -> Result<(), SyncError> {
        self.inner.publish_cursor(event)
    }
}

#[test]
fn own_echo_before_ack_keeps_newer_local_edit() {
    let server = MemoryServer::new();
    let backend = SlowFirstAck { inner: server.clone(), delayed: AtomicBool::new(false) };
    let mut settings = Settings::default();
    settings.server.user_id = Some("w".into());
    let mut session = DocumentSession::new(Dispatcher::spawn(backend), Some(server.subscribe()), &settings);
    session.open();

    let start = Instant::now();
    while !session.is_loaded() {
        assert!(start.elapsed() < Duration::from_secs(5), "load never completed");
        session.tick(Instant::now());
        std::thread::sleep(Duration::from_millis(5));
    }

    let t = Instant::now();
    session.set_cell(t, a1(), "a");
    session.tick(t + Duration::from_secs(1));
    while server.version() < 2 {
        assert!(start.elapsed() < Duration::from_secs(5), "first write never reached the server");
        std::thread::sleep(Duration::from_millis(5));
    }

    // The echo of "a" is queued while its ack is still held back
    let t = Instant::now();
    session.set_cell(t, a1(), "b");
    session.tick(t);
    assert_eq!(session.store().sheet().raw(a1()), "b");

    while server.version() < 3 || session.version() < 3 || !session.batcher().is_idle() {
        assert!(start.elapsed() < Duration::from_secs(5), "second write never acknowledged");
        session.tick(t + Duration::from_secs(1));
        std::thread::sleep(Duration::from_millis(5));
    }
    let server_value = server.live().cells.get(&a1()).map(|c| c.value.clone());
    assert_eq!(server_value.as_deref(), Some("b"));
    assert_eq!(session.store().sheet().raw(a1()), "b");
}
