//! Cell-reference injection while a formula is being typed.
//!
//! Clicking a cell while editing a formula appends that cell's coordinate to
//! the formula text. The editor hands a [`ReferenceSink`] to the store's
//! `pick_reference`, so the two sides never share global state.

use calcgrid_core::{CellId, Range};

/// Receiver for references picked from the grid.
pub trait ReferenceSink {
    /// Whether the sink currently accepts references (e.g. the draft starts with `=`).
    fn accepts_reference(&self) -> bool;

    /// Append a reference in A1 form (`B2` or `A1:C3`).
    fn append_reference(&mut self, reference: &str);
}

/// Text of a formula being edited, plus the last reference it received so a
/// drag can widen that reference into a range instead of appending another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormulaDraft {
    text: String,
    last_ref: Option<(usize, CellId)>,
}

impl FormulaDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), last_ref: None }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Type a character; any typing ends range widening.
    pub fn push_str(&mut self, s: &str) {
        self.text.push_str(s);
        self.last_ref = None;
    }

    /// Replace the last picked reference with the range from its anchor to `to`.
    /// Returns false when there is no reference to widen.
    pub fn extend_reference(&mut self, to: CellId) -> bool {
        let Some((start, anchor)) = self.last_ref else {
            return false;
        };
        self.text.truncate(start);
        let range = Range::from_corners(anchor, to);
        self.text.push_str(&range.to_string());
        true
    }

    fn needs_separator(&self) -> bool {
        // After a reference or a literal, a bare append would glue two operands together
        match self.text.chars().last() {
            Some(c) => c.is_ascii_alphanumeric() || c == ')' || c == '"',
            None => false,
        }
    }
}

impl ReferenceSink for FormulaDraft {
    fn accepts_reference(&self) -> bool {
        self.text.starts_with('=')
    }

    fn append_reference(&mut self, reference: &str) {
        if self.needs_separator() {
            self.text.push('+');
        }
        let start = self.text.len();
        self.text.push_str(reference);
        self.last_ref = CellId::parse(reference).map(|id| (start, id));
    }
}
