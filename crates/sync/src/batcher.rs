//! Debounced, version-stamped write pipeline.
//!
//! Local cell edits accumulate in a pending map (last write per coordinate
//! wins) and are flushed as one [`WriteBatch`] once the debounce timer fires.
//! Structural changes queue in FIFO order and go out without debounce. Only
//! one write is in flight at a time; everything else waits behind it.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use calcgrid_config::{RetrySettings, SyncSettings};
use calcgrid_core::CellId;
use calcgrid_engine::Cell;
use calcgrid_protocol::{CellUpdate, StructuralChange, StructuralWrite, Version, WriteBatch};

use crate::schedule::ScheduledTask;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts,
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), or `None` once exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

/// A write ready to hand to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Cells(WriteBatch),
    Structural(StructuralWrite),
}

#[derive(Debug, Clone)]
enum InFlight {
    Cells(Vec<CellUpdate>),
    Structural(StructuralChange),
}

/// What happened after a failed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Scheduled(Duration),
    /// Waiting for the next local edit
    Exhausted,
}

#[derive(Debug)]
pub struct ChangeBatcher {
    pending: BTreeMap<CellId, Cell>,
    structural: VecDeque<StructuralChange>,
    in_flight: Option<InFlight>,
    debounce: ScheduledTask,
    debounce_delay: Duration,
    /// Debounce fired; pending cells go out as soon as nothing is in flight
    flush_ready: bool,
    retry: ScheduledTask,
    policy: RetryPolicy,
    attempts: u32,
    stalled: bool,
    origin: Option<String>,
}

impl ChangeBatcher {
    pub fn new(debounce: Duration, policy: RetryPolicy) -> Self {
        Self {
            pending: BTreeMap::new(),
            structural: VecDeque::new(),
            in_flight: None,
            debounce: ScheduledTask::new(),
            debounce_delay: debounce,
            flush_ready: false,
            retry: ScheduledTask::new(),
            policy,
            attempts: 0,
            stalled: false,
            origin: None,
        }
    }

    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(settings.flush_debounce(), RetryPolicy::from(&settings.retry))
    }

    /// Writer id stamped on outgoing writes.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn queued_structural(&self) -> usize {
        self.structural.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Nothing pending, queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.structural.is_empty() && self.in_flight.is_none()
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Earliest instant at which [`poll`](Self::poll) may produce a write.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.debounce.deadline(), self.retry.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Queue a cell edit and restart the debounce.
    pub fn record_cell(&mut self, id: CellId, cell: Cell, now: Instant) {
        self.pending.insert(id, cell);
        self.debounce.schedule(now, self.debounce_delay);
        self.resume();
    }

    pub fn record_structural(&mut self, change: StructuralChange) {
        // A newer change to the same column/row/name supersedes a queued one
        self.structural.retain(|queued| !same_target(queued, &change));
        self.structural.push_back(change);
        self.resume();
    }

    fn resume(&mut self) {
        if self.stalled {
            self.stalled = false;
            self.attempts = 0;
            // Cells held back by the stall have already waited out their debounce
            if !self.pending.is_empty() {
                self.flush_ready = true;
            }
        }
    }

    /// Next write to send, stamped with `version`.
    pub fn poll(&mut self, now: Instant, version: Version) -> Option<Outgoing> {
        if self.debounce.fire_if_due(now) {
            self.flush_ready = true;
        }
        if self.in_flight.is_some() || self.stalled {
            return None;
        }
        if self.retry.is_pending() {
            if !self.retry.fire_if_due(now) {
                return None;
            }
            self.flush_ready = true;
        }

        if let Some(change) = self.structural.pop_front() {
            self.in_flight = Some(InFlight::Structural(change.clone()));
            return Some(Outgoing::Structural(StructuralWrite { change, version, origin: self.origin.clone() }));
        }

        if self.flush_ready && !self.pending.is_empty() {
            self.flush_ready = false;
            let cells: Vec<CellUpdate> = std::mem::take(&mut self.pending)
                .into_iter()
                .map(|(id, cell)| CellUpdate::new(id, cell))
                .collect();
            self.in_flight = Some(InFlight::Cells(cells.clone()));
            return Some(Outgoing::Cells(WriteBatch { cells, version, origin: self.origin.clone() }));
        }

        None
    }

    /// The in-flight write was accepted.
    pub fn on_ack(&mut self) {
        self.in_flight = None;
        self.attempts = 0;
    }

    /// Stale version: nothing is merged. Everything pending, queued or in
    /// flight is dropped; the caller reloads.
    pub fn on_conflict(&mut self) {
        let dropped = self.pending.len() + self.structural.len() + usize::from(self.in_flight.is_some());
        if dropped > 0 {
            log::debug!("dropping {} unsent change(s) after conflict", dropped);
        }
        self.pending.clear();
        self.structural.clear();
        self.in_flight = None;
        self.debounce.cancel();
        self.retry.cancel();
        self.flush_ready = false;
        self.attempts = 0;
        self.stalled = false;
    }

    /// The in-flight write failed in transit. Its cells go back to the pending
    /// map without overriding edits made since.
    pub fn on_failure(&mut self, now: Instant) -> RetryOutcome {
        match self.in_flight.take() {
            Some(InFlight::Cells(cells)) => {
                for update in cells {
                    let cell = update.cell();
                    self.pending.entry(update.coord).or_insert(cell);
                }
            }
            Some(InFlight::Structural(change)) => {
                if !self.structural.iter().any(|queued| same_target(queued, &change)) {
                    self.structural.push_front(change);
                }
            }
            None => {}
        }

        self.attempts += 1;
        match self.policy.delay(self.attempts) {
            Some(delay) => {
                self.retry.schedule(now, delay);
                RetryOutcome::Scheduled(delay)
            }
            None => {
                self.stalled = true;
                self.retry.cancel();
                RetryOutcome::Exhausted
            }
        }
    }
}

fn same_target(a: &StructuralChange, b: &StructuralChange) -> bool {
    match (a, b) {
        (StructuralChange::ColumnWidth { column: x, .. }, StructuralChange::ColumnWidth { column: y, .. }) => x == y,
        (StructuralChange::RowHeight { row: x, .. }, StructuralChange::RowHeight { row: y, .. }) => x == y,
        (StructuralChange::Rename { .. }, StructuralChange::Rename { .. }) => true,
        _ => false,
    }
}
