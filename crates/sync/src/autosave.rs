//! Snapshot autosave on its own debounce.
//!
//! Saves are full replaces without a version check. A save is skipped when its
//! serialization matches the last one the server accepted.

use std::time::{Duration, Instant};

use calcgrid_engine::GridStore;
use calcgrid_protocol::Snapshot;

use crate::schedule::ScheduledTask;

#[derive(Debug)]
pub struct Autosave {
    timer: ScheduledTask,
    delay: Duration,
    last_saved: Option<String>,
}

impl Autosave {
    pub fn new(delay: Duration) -> Self {
        Self { timer: ScheduledTask::new(), delay, last_saved: None }
    }

    /// Something changed; restart the debounce.
    pub fn touch(&mut self, now: Instant) {
        self.timer.schedule(now, self.delay);
    }

    pub fn cancel(&mut self) {
        self.timer.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Snapshot to save, with its serialization, once the debounce has fired.
    pub fn poll(&mut self, now: Instant, store: &GridStore) -> Option<(Snapshot, String)> {
        if !self.timer.fire_if_due(now) {
            return None;
        }
        let snapshot = Snapshot::from_grid(&store.snapshot());
        let serialized = match serde_json::to_string(&snapshot) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("autosave: failed to serialize snapshot: {}", e);
                return None;
            }
        };
        if self.last_saved.as_deref() == Some(serialized.as_str()) {
            log::debug!("autosave: unchanged, skipped");
            return None;
        }
        Some((snapshot, serialized))
    }

    /// The server accepted `serialized`.
    pub fn on_saved(&mut self, serialized: String) {
        self.last_saved = Some(serialized);
    }

    /// Treat the store's current state as already saved (after a load).
    pub fn mark_saved(&mut self, store: &GridStore) {
        self.last_saved = serde_json::to_string(&Snapshot::from_grid(&store.snapshot())).ok();
        self.timer.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calcgrid_core::CellId;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_debounced_save() {
        let t0 = Instant::now();
        let mut store = GridStore::new(10, 5, 10);
        let mut autosave = Autosave::new(800 * MS);

        store.update_cell(CellId::new(0, 0), "x", None);
        autosave.touch(t0);
        assert!(autosave.poll(t0 + 799 * MS, &store).is_none());

        let (snapshot, serialized) = autosave.poll(t0 + 800 * MS, &store).unwrap();
        assert_eq!(snapshot.cells.len(), 1);
        assert!(serialized.contains("\"A1\""));
    }

    #[test]
    fn test_skips_identical_state() {
        let t0 = Instant::now();
        let mut store = GridStore::new(10, 5, 10);
        let mut autosave = Autosave::new(800 * MS);
        store.update_cell(CellId::new(0, 0), "x", None);

        autosave.touch(t0);
        let (_, serialized) = autosave.poll(t0 + 800 * MS, &store).unwrap();
        autosave.on_saved(serialized);

        autosave.touch(t0 + 900 * MS);
        assert!(autosave.poll(t0 + 2_000 * MS, &store).is_none());

        store.update_cell(CellId::new(0, 0), "y", None);
        autosave.touch(t0 + 2_000 * MS);
        assert!(autosave.poll(t0 + 3_000 * MS, &store).is_some());
    }

    #[test]
    fn test_unsaved_state_is_retried() {
        let t0 = Instant::now();
        let mut store = GridStore::new(10, 5, 10);
        let mut autosave = Autosave::new(800 * MS);
        store.update_cell(CellId::new(0, 0), "x", None);

        autosave.touch(t0);
        assert!(autosave.poll(t0 + 800 * MS, &store).is_some());
        // No on_saved: the next touch saves again
        autosave.touch(t0 + 900 * MS);
        assert!(autosave.poll(t0 + 1_700 * MS, &store).is_some());
    }

    #[test]
    fn test_mark_saved_after_load() {
        let t0 = Instant::now();
        let store = GridStore::new(10, 5, 10);
        let mut autosave = Autosave::new(800 * MS);
        autosave.mark_saved(&store);
        autosave.touch(t0);
        assert!(autosave.poll(t0 + 800 * MS, &store).is_none());
    }
}
