pub mod cell_id;
pub mod selection;

pub use cell_id::{col_to_letters, letters_to_col, CellId, InvalidCellId};
pub use selection::{Range, Selection};
