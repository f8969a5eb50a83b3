// Reading and writing grid files for the one-shot commands

use std::io::{self, Write};
use std::path::Path;

use calcgrid_engine::{GridSnapshot, GridStore};
use calcgrid_io::csv::ExportValues;
use calcgrid_io::{Format, IoError};
use calcgrid_protocol::Snapshot;

use crate::CliError;

/// Resolve the format of `path`, preferring an explicit override.
pub fn resolve_format(path: &Path, explicit: Option<Format>) -> Result<Format, CliError> {
    explicit.or_else(|| Format::from_path(path)).ok_or_else(|| {
        CliError::format(format!("cannot infer format of {}", path.display()))
            .with_hint("pass the format explicitly (csv, tsv or json)")
    })
}

pub fn read_grid(path: &Path, format: Format) -> Result<GridSnapshot, CliError> {
    let snapshot = match format {
        Format::Csv => calcgrid_io::csv::import(path),
        Format::Tsv => calcgrid_io::csv::import_tsv(path),
        Format::Json => calcgrid_io::json::import(path),
    };
    snapshot.map_err(CliError::from)
}

/// `(rows, cols)` spanned by non-empty cells.
pub fn data_bounds(snapshot: &GridSnapshot) -> (usize, usize) {
    snapshot.cells.keys().fold((0, 0), |(rows, cols), id| (rows.max(id.row + 1), cols.max(id.col + 1)))
}

/// Write the store to `path`, or to stdout when `path` is `None`.
pub fn write_grid(store: &GridStore, path: Option<&Path>, format: Format, values: ExportValues) -> Result<(), CliError> {
    match path {
        Some(path) => {
            let result = match format {
                Format::Csv => calcgrid_io::csv::export(store.sheet(), path, values),
                Format::Tsv => calcgrid_io::csv::export_tsv(store.sheet(), path, values),
                Format::Json => calcgrid_io::json::export(store, path),
            };
            result.map_err(CliError::from)
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            match format {
                Format::Csv => calcgrid_io::csv::write_delimited(store.sheet(), &mut handle, b',', values)?,
                Format::Tsv => calcgrid_io::csv::write_delimited(store.sheet(), &mut handle, b'\t', values)?,
                Format::Json => {
                    let snapshot = Snapshot::from_grid(&store.snapshot());
                    let json = serde_json::to_string_pretty(&snapshot)
                        .map_err(|e| CliError::from(IoError::Json(e)))?;
                    writeln!(handle, "{}", json).map_err(|e| CliError::io(e.to_string()))?;
                }
            }
            Ok(())
        }
    }
}
