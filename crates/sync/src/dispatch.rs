//! Runs backend requests either inline or on a worker thread.
//!
//! The session never blocks on the network: it submits [`Request`]s and picks
//! up [`Completion`]s on its next tick. The worker variant owns the backend on
//! its own thread and talks to it over `std::sync::mpsc` channels; requests are
//! executed one at a time in submission order.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use calcgrid_protocol::{DocumentEvent, LoadResponse, Snapshot, StructuralWrite, WriteAck, WriteBatch};

use crate::backend::DocumentBackend;
use crate::error::SyncError;

#[derive(Debug, Clone)]
pub enum Request {
    Load,
    WriteCells(WriteBatch),
    WriteStructural(StructuralWrite),
    /// `serialized` is handed back on completion for change detection
    SaveSnapshot { snapshot: Snapshot, serialized: String },
    PublishCursor(DocumentEvent),
}

#[derive(Debug)]
pub enum Completion {
    Loaded(Result<LoadResponse, SyncError>),
    CellsWritten { batch: WriteBatch, result: Result<WriteAck, SyncError> },
    StructuralWritten { write: StructuralWrite, result: Result<WriteAck, SyncError> },
    SnapshotSaved { serialized: String, result: Result<(), SyncError> },
    CursorPublished(Result<(), SyncError>),
}

fn execute(backend: &dyn DocumentBackend, request: Request) -> Completion {
    match request {
        Request::Load => Completion::Loaded(backend.load()),
        Request::WriteCells(batch) => {
            let result = backend.write_cells(&batch);
            Completion::CellsWritten { batch, result }
        }
        Request::WriteStructural(write) => {
            let result = backend.write_structural(&write);
            Completion::StructuralWritten { write, result }
        }
        Request::SaveSnapshot { snapshot, serialized } => {
            let result = backend.save_snapshot(&snapshot);
            Completion::SnapshotSaved { serialized, result }
        }
        Request::PublishCursor(event) => Completion::CursorPublished(backend.publish_cursor(&event)),
    }
}

pub struct Worker {
    tx: Option<Sender<Request>>,
    rx: Receiver<Completion>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub enum Dispatcher {
    /// Executes on submit; completions wait for the next drain
    Inline {
        backend: Box<dyn DocumentBackend>,
        done: VecDeque<Completion>,
    },
    Worker(Worker),
}

impl Dispatcher {
    pub fn inline(backend: impl DocumentBackend + 'static) -> Self {
        Dispatcher::Inline { backend: Box::new(backend), done: VecDeque::new() }
    }

    /// Move the backend onto a dedicated thread.
    pub fn spawn(backend: impl DocumentBackend + 'static) -> Self {
        let (req_tx, req_rx) = mpsc::channel::<Request>();
        let (done_tx, done_rx) = mpsc::channel::<Completion>();
        let handle = thread::Builder::new()
            .name("calcgrid-sync".into())
            .spawn(move || {
                for request in req_rx {
                    if done_tx.send(execute(&backend, request)).is_err() {
                        break;
                    }
                }
            });

        match handle {
            Ok(handle) => Dispatcher::Worker(Worker { tx: Some(req_tx), rx: done_rx, handle: Some(handle) }),
            Err(e) => {
                // The backend moved into the failed closure; nothing left to run on
                log::warn!("failed to spawn sync worker: {}", e);
                Dispatcher::Worker(Worker { tx: None, rx: done_rx, handle: None })
            }
        }
    }

    pub fn submit(&mut self, request: Request) {
        match self {
            Dispatcher::Inline { backend, done } => done.push_back(execute(backend.as_ref(), request)),
            Dispatcher::Worker(worker) => {
                let sent = worker.tx.as_ref().map(|tx| tx.send(request).is_ok()).unwrap_or(false);
                if !sent {
                    log::warn!("sync worker is gone; request dropped");
                }
            }
        }
    }

    /// Completions available now, without blocking.
    pub fn drain(&mut self) -> Vec<Completion> {
        match self {
            Dispatcher::Inline { done, .. } => done.drain(..).collect(),
            Dispatcher::Worker(worker) => {
                let mut out = Vec::new();
                loop {
                    match worker.rx.try_recv() {
                        Ok(c) => out.push(c),
                        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                    }
                }
                out
            }
        }
    }

    /// Block up to `timeout` for the first completion, then drain the rest.
    pub fn wait(&mut self, timeout: Duration) -> Vec<Completion> {
        let first = match self {
            Dispatcher::Inline { .. } => None,
            Dispatcher::Worker(worker) => match worker.rx.recv_timeout(timeout) {
                Ok(c) => Some(c),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
        };
        let mut out: Vec<Completion> = first.into_iter().collect();
        out.extend(self.drain());
        out
    }
}
