pub mod cell;
pub mod clipboard;
pub mod formula;
pub mod grid;
pub mod history;
pub mod sheet;

pub use cell::{format_display, Alignment, Cell, CellFormat, DisplayFormat, FormatPatch};
pub use clipboard::Clipboard;
pub use grid::{ChangeSet, GridSnapshot, GridStore};
pub use history::{History, HistoryEntry};
pub use sheet::{CellMap, Sheet, SortConfig, SortDirection};
