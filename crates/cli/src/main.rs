// calcgrid CLI - headless spreadsheet operations

mod demo;
mod exit_codes;
mod grid_file;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use calcgrid_config::Settings;
use calcgrid_core::{letters_to_col, CellId};
use calcgrid_engine::{Cell, GridSnapshot, GridStore, SortDirection};
use calcgrid_io::csv::ExportValues;
use calcgrid_io::{Format, IoError};

use exit_codes::{
    EXIT_EVAL, EXIT_EVAL_CIRCULAR, EXIT_FORMAT, EXIT_IO, EXIT_PARSE, EXIT_SUCCESS, EXIT_USAGE,
};

#[derive(Parser)]
#[command(name = "calcgrid")]
#[command(about = "Collaborative spreadsheet engine (CLI mode, headless)")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a formula against a grid file
    #[command(after_help = "\
Examples:
  calcgrid calc '=SUM(B1:B10)' --input sales.csv
  calcgrid calc 'A1*2' --input grid.json
  calcgrid calc '=1+2'")]
    Calc {
        /// Formula to evaluate (leading = is optional)
        formula: String,

        /// Grid to evaluate against; an empty grid when omitted
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,

        /// Input format (default: from the file extension)
        #[arg(long, short = 'f')]
        from: Option<FileFormat>,
    },

    /// Convert a grid between CSV, TSV and snapshot JSON
    #[command(after_help = "\
Examples:
  calcgrid convert data.csv -t json -o data.json
  calcgrid convert grid.json -t csv --values display
  calcgrid convert data.csv -o data.tsv")]
    Convert {
        input: PathBuf,

        /// Input format (default: from the file extension)
        #[arg(long, short = 'f')]
        from: Option<FileFormat>,

        /// Output format (default: from --output's extension)
        #[arg(long, short = 't')]
        to: Option<FileFormat>,

        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Cell values written to CSV/TSV
        #[arg(long, value_enum, default_value = "raw")]
        values: ValuesArg,
    },

    /// Sort rows by one column
    #[command(after_help = "\
Examples:
  calcgrid sort scores.csv --column B --desc
  calcgrid sort people.csv --column A --headers -o sorted.csv")]
    Sort {
        input: PathBuf,

        /// Column label to sort by (A, B, ..., AA)
        #[arg(long, short = 'c')]
        column: String,

        /// Descending order (default ascending)
        #[arg(long)]
        desc: bool,

        /// Keep the first row in place
        #[arg(long)]
        headers: bool,

        /// Input format (default: from the file extension)
        #[arg(long, short = 'f')]
        from: Option<FileFormat>,

        /// Output file (default: stdout, same format as the input)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Replay a concurrent edit between two in-memory clients
    #[command(name = "serve-demo")]
    ServeDemo {
        /// Cell both clients edit
        #[arg(long, default_value = "A1")]
        cell: String,

        /// Value written by the client that flushes first
        #[arg(long, default_value = "hello")]
        first: String,

        /// Value written by the client that loses the race
        #[arg(long, default_value = "world")]
        second: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FileFormat {
    Csv,
    Tsv,
    Json,
}

impl From<FileFormat> for Format {
    fn from(f: FileFormat) -> Self {
        match f {
            FileFormat::Csv => Format::Csv,
            FileFormat::Tsv => Format::Tsv,
            FileFormat::Json => Format::Json,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ValuesArg {
    /// Formulas as typed
    Raw,
    /// Evaluated, formatted values
    Display,
}

impl From<ValuesArg> for ExportValues {
    fn from(v: ValuesArg) -> Self {
        match v {
            ValuesArg::Raw => ExportValues::Raw,
            ValuesArg::Display => ExportValues::Display,
        }
    }
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:   calcgrid-engine ", env!("CARGO_PKG_VERSION"),
        "\ntarget:   ", env!("TARGET"),
        "\nprotocol: 1",
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Calc { formula, input, from } => cmd_calc(formula, input, from),
        Commands::Convert { input, from, to, output, values } => cmd_convert(input, from, to, output, values),
        Commands::Sort { input, column, desc, headers, from, output } => {
            cmd_sort(input, column, desc, headers, from, output)
        }
        Commands::ServeDemo { cell, first, second } => cmd_serve_demo(cell, first, second),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn args(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(EXIT_IO, msg)
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::new(EXIT_FORMAT, msg)
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<IoError> for CliError {
    fn from(err: IoError) -> Self {
        let code = match &err {
            IoError::File { .. } => EXIT_IO,
            IoError::Csv(_) | IoError::Json(_) => EXIT_PARSE,
            IoError::UnsupportedFormat(_) => EXIT_FORMAT,
        };
        Self::new(code, err.to_string())
    }
}

fn parse_column(label: &str) -> Result<usize, CliError> {
    letters_to_col(&label.trim().to_ascii_uppercase())
        .ok_or_else(|| CliError::args(format!("invalid column label: {}", label)))
}

// ============================================================================
// calc
// ============================================================================

fn cmd_calc(formula: String, input: Option<PathBuf>, from: Option<FileFormat>) -> Result<(), CliError> {
    let mut snapshot = match &input {
        Some(path) => {
            let format = grid_file::resolve_format(path, from.map(Format::from))?;
            grid_file::read_grid(path, format)?
        }
        None => GridSnapshot::default(),
    };

    // The formula goes in column A of the first row below the data
    let (data_rows, data_cols) = grid_file::data_bounds(&snapshot);
    let target = CellId::new(data_rows, 0);
    snapshot.rows = Some(snapshot.rows.unwrap_or(0).max(data_rows + 1));
    snapshot.cols = Some(snapshot.cols.unwrap_or(0).max(data_cols.max(1)));

    let mut store = GridStore::default();
    store.hydrate(snapshot);

    let formula = if formula.starts_with('=') { formula } else { format!("={}", formula) };
    store.update_cell(target, &formula, None);
    let result = store.display_value(target);
    println!("{}", result);

    if result.starts_with('#') {
        let (code, hint) = match result.as_str() {
            "#CIRCULAR" => (EXIT_EVAL_CIRCULAR, "the formula refers back to itself"),
            "#DIV/0!" => (EXIT_EVAL, "division by zero in your formula"),
            "#VALUE!" => (EXIT_EVAL, "a referenced cell does not hold the expected kind of value"),
            "#NAME?" => (EXIT_EVAL, "unrecognized function name"),
            _ => (EXIT_EVAL, "check your formula syntax and cell references"),
        };
        return Err(CliError::new(code, format!("formula returned {}", result)).with_hint(hint));
    }
    Ok(())
}

// ============================================================================
// convert
// ============================================================================

fn cmd_convert(
    input: PathBuf,
    from: Option<FileFormat>,
    to: Option<FileFormat>,
    output: Option<PathBuf>,
    values: ValuesArg,
) -> Result<(), CliError> {
    let in_format = grid_file::resolve_format(&input, from.map(Format::from))?;
    let out_format = match (to, &output) {
        (Some(to), _) => Format::from(to),
        (None, Some(path)) => grid_file::resolve_format(path, None)?,
        (None, None) => {
            return Err(CliError::args("no output format").with_hint("pass --to or an --output file with an extension"))
        }
    };

    let snapshot = grid_file::read_grid(&input, in_format)?;
    let mut store = GridStore::default();
    store.hydrate(snapshot);

    grid_file::write_grid(&store, output.as_deref(), out_format, values.into())
}

// ============================================================================
// sort
// ============================================================================

fn cmd_sort(
    input: PathBuf,
    column: String,
    desc: bool,
    headers: bool,
    from: Option<FileFormat>,
    output: Option<PathBuf>,
) -> Result<(), CliError> {
    let col = parse_column(&column)?;
    let format = grid_file::resolve_format(&input, from.map(Format::from))?;
    let mut snapshot = grid_file::read_grid(&input, format)?;

    let (data_rows, data_cols) = grid_file::data_bounds(&snapshot);
    if data_rows > 0 && col >= data_cols {
        return Err(CliError::args(format!("column {} is outside the data ({} columns)", column, data_cols)));
    }

    // Lift the header row out so it does not take part in the sort
    let header = if headers { split_header(&mut snapshot) } else { Vec::new() };

    let data_rows = grid_file::data_bounds(&snapshot).0;
    snapshot.rows = Some(data_rows.max(1));
    let mut store = GridStore::default();
    store.hydrate(snapshot);

    let direction = if desc { SortDirection::Desc } else { SortDirection::Asc };
    store.sort_by_column(col, direction);

    if headers {
        let mut sorted = store.snapshot();
        let body = std::mem::take(&mut sorted.cells);
        sorted.cells = body.into_iter().map(|(id, cell)| (CellId::new(id.row + 1, id.col), cell)).collect();
        sorted.cells.extend(header);
        sorted.rows = sorted.rows.map(|r| r + 1);
        store.hydrate(sorted);
    }

    grid_file::write_grid(&store, output.as_deref(), format, ExportValues::Raw)
}

/// Remove row 0 from `snapshot` and shift the remaining rows up by one.
fn split_header(snapshot: &mut GridSnapshot) -> Vec<(CellId, Cell)> {
    let cells = std::mem::take(&mut snapshot.cells);
    let mut header = Vec::new();
    for (id, cell) in cells {
        if id.row == 0 {
            header.push((id, cell));
        } else {
            snapshot.cells.insert(CellId::new(id.row - 1, id.col), cell);
        }
    }
    header
}

// ============================================================================
// serve-demo
// ============================================================================

fn cmd_serve_demo(cell: String, first: String, second: String) -> Result<(), CliError> {
    let cell = CellId::parse(&cell.to_ascii_uppercase())
        .ok_or_else(|| CliError::args(format!("invalid cell reference: {}", cell)))?;
    let settings = Settings::load();
    let options = demo::DemoOptions { cell, first, second };
    demo::run(&settings, &options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_column() {
        assert_eq!(parse_column("A").unwrap(), 0);
        assert_eq!(parse_column("b").unwrap(), 1);
        assert_eq!(parse_column("AA").unwrap(), 26);
        assert_eq!(parse_column("1").unwrap_err().code, EXIT_USAGE);
    }

    #[test]
    fn test_split_header_shifts_rows() {
        let mut snapshot = GridSnapshot::default();
        snapshot.cells.insert(CellId::new(0, 0), Cell::new("name"));
        snapshot.cells.insert(CellId::new(1, 0), Cell::new("bob"));
        snapshot.cells.insert(CellId::new(2, 1), Cell::new("3"));

        let header = split_header(&mut snapshot);
        assert_eq!(header, vec![(CellId::new(0, 0), Cell::new("name"))]);
        assert_eq!(snapshot.cells.get(&CellId::new(0, 0)), Some(&Cell::new("bob")));
        assert_eq!(snapshot.cells.get(&CellId::new(1, 1)), Some(&Cell::new("3")));
    }

    #[test]
    fn test_io_error_codes() {
        let err = CliError::from(IoError::UnsupportedFormat("xlsx".into()));
        assert_eq!(err.code, EXIT_FORMAT);
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = CliError::from(IoError::File { path: "x.csv".into(), source: missing });
        assert_eq!(err.code, EXIT_IO);
    }
}
