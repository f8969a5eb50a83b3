//! Keeps a [`GridStore`](calcgrid_engine::GridStore) in step with the shared
//! document.
//!
//! Local edits are debounced into version-stamped writes
//! ([`batcher`]); remote events are applied only when strictly newer than the
//! local version ([`collab`]); full snapshots are saved on a separate debounce
//! ([`autosave`]). [`DocumentSession`] wires these together and is driven by
//! an explicit clock through [`DocumentSession::tick`].

pub mod autosave;
pub mod backend;
pub mod batcher;
pub mod collab;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod memory;
pub mod presence;
pub mod schedule;
pub mod session;

pub use backend::DocumentBackend;
pub use dispatch::Dispatcher;
pub use error::SyncError;
pub use http::HttpBackend;
pub use memory::MemoryServer;
pub use schedule::ScheduledTask;
pub use session::{DocumentSession, Notice};
