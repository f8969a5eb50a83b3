/// Undo/redo history of whole-grid snapshots

use calcgrid_core::Selection;

use crate::sheet::{Sheet, SortConfig};

pub const DEFAULT_CAPACITY: usize = 50;

/// Everything undo restores: cells and structure, selection, last sort.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub sheet: Sheet,
    pub selection: Selection,
    pub sort_config: Option<SortConfig>,
}

/// Linear history with a cursor.
///
/// `entries[..cursor]` are states to undo into (oldest first). When the
/// cursor is not at the tail, `entries[cursor]` is the current state and
/// everything after it can be redone.
#[derive(Debug)]
pub struct History {
    entries: Vec<HistoryEntry>,
    cursor: usize,
    max_entries: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl History {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            max_entries: max_entries.max(1),
        }
    }

    /// Record the state as it was before a mutation. Drops any redo history.
    pub fn save(&mut self, pre_state: HistoryEntry) {
        self.entries.truncate(self.cursor);
        self.entries.push(pre_state);

        // Limit history size
        if self.entries.len() > self.max_entries {
            self.entries.remove(0);
        }
        self.cursor = self.entries.len();
    }

    /// Step back. `current` is kept as the redo target when undoing from the tail.
    pub fn undo(&mut self, current: HistoryEntry) -> Option<HistoryEntry> {
        if self.cursor == 0 {
            return None;
        }
        if self.cursor == self.entries.len() {
            self.entries.push(current);
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).cloned()
    }

    pub fn redo(&mut self) -> Option<HistoryEntry> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor).cloned()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    /// Number of steps that can be undone.
    pub fn undo_depth(&self) -> usize {
        self.cursor
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calcgrid_core::CellId;

    fn state(value: &str) -> HistoryEntry {
        let mut sheet = Sheet::new(5, 5);
        sheet.set_value(CellId::new(0, 0), value, None);
        HistoryEntry { sheet, selection: Selection::default(), sort_config: None }
    }

    fn value(entry: &HistoryEntry) -> &str {
        entry.sheet.raw(CellId::new(0, 0))
    }

    #[test]
    fn test_undo_at_start_is_noop() {
        let mut history = History::default();
        assert!(history.undo(state("x")).is_none());
        assert!(!history.can_undo());
    }

    #[test]
    fn test_redo_at_tail_is_noop() {
        let mut history = History::default();
        history.save(state(""));
        assert!(history.redo().is_none());
    }

    #[test]
    fn test_undo_redo_walk() {
        let mut history = History::default();
        history.save(state("")); // before "a"
        history.save(state("a")); // before "b"

        let back = history.undo(state("b")).unwrap();
        assert_eq!(value(&back), "a");
        let back = history.undo(state("a")).unwrap();
        assert_eq!(value(&back), "");
        assert!(history.undo(state("")).is_none());

        assert_eq!(value(&history.redo().unwrap()), "a");
        assert_eq!(value(&history.redo().unwrap()), "b");
        assert!(history.redo().is_none());
    }

    #[test]
    fn test_new_edit_truncates_redo() {
        let mut history = History::default();
        history.save(state(""));
        history.save(state("a"));
        history.undo(state("b"));
        assert!(history.can_redo());

        history.save(state("a")); // edit after undo
        assert!(!history.can_redo());
        assert!(history.redo().is_none());
        assert_eq!(history.undo_depth(), 2);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = History::new(3);
        for i in 0..5 {
            history.save(state(&i.to_string()));
        }
        assert_eq!(history.undo_depth(), 3);
        let mut last = None;
        while let Some(entry) = history.undo(state("current")) {
            last = Some(value(&entry).to_string());
        }
        assert_eq!(last.as_deref(), Some("2"));
    }
}
