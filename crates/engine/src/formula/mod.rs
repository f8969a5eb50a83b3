// Formula parsing and evaluation

pub mod parser;
pub mod eval;
pub mod refs;

pub use eval::{evaluate, evaluate_cell, CellLookup, EvalResult};
pub use refs::{FormulaDraft, ReferenceSink};
