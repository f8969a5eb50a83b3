//! CLI Exit Code Registry
//!
//! Single source of truth for `calcgrid` exit codes. Scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain     | Description                              |
//! |---------|------------|------------------------------------------|
//! | 0       | Universal  | Success                                  |
//! | 1       | Universal  | General error (unspecified)              |
//! | 2       | Universal  | CLI usage error (bad args, bad reference) |
//! | 3-9     | io         | Reading and writing grid files           |
//! | 10-19   | eval       | Formula evaluation                       |
//! | 20-29   | sync       | Document sync (serve-demo)               |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Update the table above
//! 3. Wire it into `CliError`

// =============================================================================
// Universal (0-2)
// =============================================================================

pub const EXIT_SUCCESS: u8 = 0;

/// Avoid; prefer a specific code.
pub const EXIT_ERROR: u8 = 1;

/// Bad arguments: unknown format, invalid cell reference or column label.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// IO (3-9)
// =============================================================================

/// File could not be opened, read or written.
pub const EXIT_IO: u8 = 3;

/// Input was read but is not valid CSV/TSV/JSON.
pub const EXIT_PARSE: u8 = 4;

/// No importer/exporter for the requested format.
pub const EXIT_FORMAT: u8 = 5;

// =============================================================================
// Eval (10-19)
// =============================================================================

/// Formula evaluated to an error marker (`#VALUE!`, `#DIV/0!`, ...).
/// The marker itself is still printed on stdout.
pub const EXIT_EVAL: u8 = 10;

/// Formula references itself.
pub const EXIT_EVAL_CIRCULAR: u8 = 11;

// =============================================================================
// Sync (20-29)
// =============================================================================

/// The demo run did not converge on the expected document state.
pub const EXIT_SYNC_DIVERGED: u8 = 20;

/// A session failed to load the document.
pub const EXIT_SYNC_LOAD: u8 = 21;
