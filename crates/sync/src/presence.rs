//! Ephemeral cursor presence of other users.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use calcgrid_core::CellId;

use crate::schedule::ScheduledTask;

const PALETTE: &[&str] = &[
    "#e6194b", "#3cb44b", "#4363d8", "#f58231", "#911eb4", "#42d4f4", "#f032e6", "#9a6324",
];

/// Stable display color for a user id.
pub fn color_for(user_id: &str) -> &'static str {
    let sum = user_id.bytes().fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    PALETTE[sum % PALETTE.len()]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCursor {
    pub user_id: String,
    pub cell: CellId,
    pub color: String,
    pub seen: Instant,
}

#[derive(Debug)]
pub struct Presence {
    own_id: String,
    peers: HashMap<String, PeerCursor>,
    ttl: Duration,
    sweep: ScheduledTask,
    sweep_every: Duration,
}

impl Presence {
    pub fn new(own_id: impl Into<String>, ttl: Duration, sweep_every: Duration) -> Self {
        Self {
            own_id: own_id.into(),
            peers: HashMap::new(),
            ttl,
            sweep: ScheduledTask::new(),
            sweep_every,
        }
    }

    /// Record a peer's cursor. Our own echoes are ignored.
    pub fn update(&mut self, user_id: &str, cell: CellId, color: &str, now: Instant) -> bool {
        if user_id == self.own_id {
            return false;
        }
        self.peers.insert(
            user_id.to_string(),
            PeerCursor { user_id: user_id.to_string(), cell, color: color.to_string(), seen: now },
        );
        if !self.sweep.is_pending() {
            self.sweep.schedule(now, self.sweep_every);
        }
        true
    }

    /// Drop entries not refreshed within the TTL. Returns how many went.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.peers.len();
        let ttl = self.ttl;
        self.peers.retain(|_, p| now.saturating_duration_since(p.seen) <= ttl);
        before - self.peers.len()
    }

    /// Periodic sweep; reschedules itself while peers remain.
    pub fn poll(&mut self, now: Instant) -> usize {
        if !self.sweep.fire_if_due(now) {
            return 0;
        }
        let removed = self.prune(now);
        if !self.peers.is_empty() {
            self.sweep.schedule(now, self.sweep_every);
        }
        removed
    }

    /// Peers ordered by user id.
    pub fn peers(&self) -> Vec<&PeerCursor> {
        let mut peers: Vec<&PeerCursor> = self.peers.values().collect();
        peers.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        peers
    }

    pub fn peer(&self, user_id: &str) -> Option<&PeerCursor> {
        self.peers.get(user_id)
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.sweep.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    fn presence() -> Presence {
        Presence::new("me", 10 * SEC, SEC)
    }

    #[test]
    fn test_own_cursor_ignored() {
        let mut p = presence();
        assert!(!p.update("me", CellId::new(0, 0), "#000", Instant::now()));
        assert!(p.peers().is_empty());
    }

    #[test]
    fn test_latest_position_wins() {
        let t0 = Instant::now();
        let mut p = presence();
        p.update("bob", CellId::new(0, 0), "#111", t0);
        p.update("bob", CellId::new(3, 2), "#111", t0 + SEC);
        assert_eq!(p.peer("bob").map(|c| c.cell), Some(CellId::new(3, 2)));
        assert_eq!(p.peers().len(), 1);
    }

    #[test]
    fn test_sweep_prunes_stale() {
        let t0 = Instant::now();
        let mut p = presence();
        p.update("bob", CellId::new(0, 0), "#111", t0);
        p.update("carol", CellId::new(1, 1), "#222", t0 + 5 * SEC);

        assert_eq!(p.poll(t0 + SEC), 0);
        assert_eq!(p.poll(t0 + 11 * SEC), 1);
        let ids: Vec<&str> = p.peers().iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(ids, vec!["carol"]);
        assert_eq!(p.poll(t0 + 16 * SEC), 1);
        assert!(p.peers().is_empty());
    }

    #[test]
    fn test_color_is_stable() {
        assert_eq!(color_for("alice"), color_for("alice"));
        assert!(color_for("alice").starts_with('#'));
    }
}
