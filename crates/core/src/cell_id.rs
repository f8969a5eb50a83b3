//! Cell coordinates.
//!
//! A `CellId` addresses one cell of the grid. On the wire and in snapshots it
//! is the familiar `B12` form (column letters + 1-based row number); in memory
//! it is a pair of 0-based indices so structural edits can do arithmetic on it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Address of a single cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellId {
    /// Row index (0-based, so row "1" is 0)
    pub row: usize,
    /// Column index (0-based, so column "A" is 0)
    pub col: usize,
}

impl CellId {
    #[inline]
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Parse a coordinate such as `A1`, `aa10` or `$B$2`. `$` markers are ignored.
    pub fn parse(s: &str) -> Option<Self> {
        let cleaned: String = s.trim().chars().filter(|c| *c != '$').collect();
        let split = cleaned.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = cleaned.split_at(split);
        let col = letters_to_col(letters)?;
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let row: usize = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(Self { row: row - 1, col })
    }

    /// Column label of this cell (`A`, `B`, ..., `AA`).
    pub fn column_label(&self) -> String {
        col_to_letters(self.col)
    }

    /// 1-based row number, as shown in the row header.
    pub fn row_number(&self) -> usize {
        self.row + 1
    }

    /// Shift by a signed offset. Returns `None` if the result would be negative.
    pub fn offset(&self, d_row: isize, d_col: isize) -> Option<Self> {
        let row = self.row.checked_add_signed(d_row)?;
        let col = self.col.checked_add_signed(d_col)?;
        Some(Self { row, col })
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_to_letters(self.col), self.row + 1)
    }
}

/// Error returned when a coordinate string is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCellId(pub String);

impl fmt::Display for InvalidCellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cell coordinate: {:?}", self.0)
    }
}

impl std::error::Error for InvalidCellId {}

impl FromStr for CellId {
    type Err = InvalidCellId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| InvalidCellId(s.to_string()))
    }
}

impl TryFrom<String> for CellId {
    type Error = InvalidCellId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CellId> for String {
    fn from(id: CellId) -> Self {
        id.to_string()
    }
}

/// Convert 0-based column index to letter(s): 0=A, 1=B, ..., 25=Z, 26=AA, etc.
pub fn col_to_letters(col: usize) -> String {
    let mut result = String::new();
    let mut n = col;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

/// Convert column letters (case-insensitive) to a 0-based index.
pub fn letters_to_col(letters: &str) -> Option<usize> {
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let col = letters.to_ascii_uppercase().bytes().try_fold(0usize, |acc, b| {
        acc.checked_mul(26)?.checked_add((b - b'A' + 1) as usize)
    })?;
    Some(col - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_col_to_letters() {
        assert_eq!(col_to_letters(0), "A");
        assert_eq!(col_to_letters(1), "B");
        assert_eq!(col_to_letters(25), "Z");
        assert_eq!(col_to_letters(26), "AA");
        assert_eq!(col_to_letters(27), "AB");
        assert_eq!(col_to_letters(701), "ZZ");
        assert_eq!(col_to_letters(702), "AAA");
    }

    #[test]
    fn test_letters_to_col() {
        assert_eq!(letters_to_col("A"), Some(0));
        assert_eq!(letters_to_col("z"), Some(25));
        assert_eq!(letters_to_col("AA"), Some(26));
        assert_eq!(letters_to_col("ZZ"), Some(701));
        assert_eq!(letters_to_col(""), None);
        assert_eq!(letters_to_col("A1"), None);
    }

    #[test]
    fn test_parse_and_display() {
        let id = CellId::parse("B12").unwrap();
        assert_eq!(id, CellId::new(11, 1));
        assert_eq!(id.to_string(), "B12");
        assert_eq!(CellId::parse("$aa$10"), Some(CellId::new(9, 26)));
        assert_eq!(CellId::parse("A0"), None);
        assert_eq!(CellId::parse("12"), None);
        assert_eq!(CellId::parse("A1B"), None);
    }

    #[test]
    fn test_offset() {
        let a1 = CellId::new(0, 0);
        assert_eq!(a1.offset(3, 3), Some(CellId::new(3, 3)));
        assert_eq!(a1.offset(-1, 0), None);
    }

    #[test]
    fn test_serde_as_string() {
        let id = CellId::new(3, 4);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"E4\"");
        let back: CellId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<CellId>("\"nope\"").is_err());
    }

    #[test]
    fn test_ordering_is_row_major() {
        let mut ids = vec![CellId::new(1, 0), CellId::new(0, 5), CellId::new(0, 1)];
        ids.sort();
        assert_eq!(ids, vec![CellId::new(0, 1), CellId::new(0, 5), CellId::new(1, 0)]);
    }
}
