//! `serve-demo`: two clients sharing one in-memory document.
//!
//! Both clients edit the same cell at the same version. The first flush wins;
//! the second gets a version conflict, drops its edit and reloads. The run is
//! driven by a synthetic clock, so the outcome is the same every time.

use std::time::{Duration, Instant};

use calcgrid_config::Settings;
use calcgrid_core::CellId;
use calcgrid_sync::{Dispatcher, DocumentSession, MemoryServer, Notice};

use crate::exit_codes::{EXIT_SYNC_DIVERGED, EXIT_SYNC_LOAD};
use crate::CliError;

const STEP: Duration = Duration::from_millis(1);

pub struct DemoOptions {
    pub cell: CellId,
    pub first: String,
    pub second: String,
}

struct Client {
    label: &'static str,
    session: DocumentSession,
}

impl Client {
    fn open(server: &MemoryServer, settings: &Settings, label: &'static str, now: Instant) -> Result<Self, CliError> {
        let mut settings = settings.clone();
        settings.server.user_id = Some(label.to_string());
        let mut session = DocumentSession::new(Dispatcher::inline(server.clone()), Some(server.subscribe()), &settings);
        session.open();
        session.tick(now);

        let mut client = Client { label, session };
        client.report();
        if !client.session.is_loaded() {
            return Err(CliError::new(EXIT_SYNC_LOAD, format!("{} could not load the document", label)));
        }
        println!("[{:<5}] opened at version {}", label, client.session.version());
        Ok(client)
    }

    fn tick(&mut self, now: Instant) {
        self.session.tick(now);
        self.report();
    }

    fn report(&mut self) {
        for notice in self.session.take_notices() {
            println!("[{:<5}] {}", self.label, describe(&notice));
        }
    }

    fn value(&self, cell: CellId) -> String {
        self.session.store().display_value(cell)
    }
}

fn describe(notice: &Notice) -> String {
    match notice {
        Notice::Conflict { current_version } => {
            format!("conflict: server is at version {}, local edits dropped", current_version)
        }
        Notice::Reloaded { version } => format!("reloaded at version {}", version),
        Notice::NetworkFailure { error, retry_in: Some(delay) } => {
            format!("network failure ({}), retrying in {:?}", error, delay)
        }
        Notice::NetworkFailure { error, retry_in: None } => format!("network failure ({}), giving up", error),
        Notice::WriteRejected(reason) => format!("write rejected: {}", reason),
        Notice::LoadFailed(reason) => format!("load failed: {}", reason),
        Notice::SaveFailed(reason) => format!("autosave failed: {}", reason),
    }
}

pub fn run(settings: &Settings, options: &DemoOptions) -> Result<(), CliError> {
    let server = MemoryServer::new();
    let t0 = Instant::now();
    let debounce = settings.sync.flush_debounce();
    let cell = options.cell;

    let mut alice = Client::open(&server, settings, "alice", t0)?;
    let mut bob = Client::open(&server, settings, "bob", t0)?;

    alice.session.set_cell(t0, cell, &options.first);
    println!("[alice] set {} = {:?}", cell, options.first);
    bob.session.set_cell(t0, cell, &options.second);
    println!("[bob  ] set {} = {:?}", cell, options.second);

    let mut now = t0 + debounce;
    alice.tick(now);
    println!("[alice] flushed, server at version {}", server.version());

    // Bob's batch still carries the version it loaded
    bob.tick(now);
    for _ in 0..2 {
        now += STEP;
        bob.tick(now);
    }

    now += STEP;
    alice.session.move_cursor(now, cell);
    alice.tick(now);
    bob.tick(now);
    for peer in bob.session.peers() {
        println!("[bob  ] sees {} at {} ({})", peer.user_id, peer.cell, peer.color);
    }

    let server_value = server
        .live()
        .cells
        .get(&cell)
        .map(|c| c.value.clone())
        .unwrap_or_default();
    println!(
        "{}: alice={:?} bob={:?} server={:?} (version {})",
        cell,
        alice.value(cell),
        bob.value(cell),
        server_value,
        server.version()
    );

    if alice.value(cell) != bob.value(cell) || alice.session.version() != bob.session.version() {
        return Err(CliError::new(EXIT_SYNC_DIVERGED, "clients did not converge"));
    }
    Ok(())
}
