// CSV/TSV import/export

use std::io::Read;
use std::path::Path;

use calcgrid_core::CellId;
use calcgrid_engine::{Cell, CellMap, GridSnapshot, Sheet};

use crate::error::IoError;

/// What to write for each cell on export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportValues {
    /// Raw input, formulas included
    #[default]
    Raw,
    /// Evaluated and formatted values
    Display,
}

/// Import with the delimiter sniffed from the content.
pub fn import(path: &Path) -> Result<GridSnapshot, IoError> {
    let content = read_file_as_utf8(path)?;
    let delimiter = sniff_delimiter(&content);
    import_from_str(&content, delimiter)
}

pub fn import_tsv(path: &Path) -> Result<GridSnapshot, IoError> {
    let content = read_file_as_utf8(path)?;
    import_from_str(&content, b'\t')
}

pub fn import_with_delimiter(path: &Path, delimiter: u8) -> Result<GridSnapshot, IoError> {
    let content = read_file_as_utf8(path)?;
    import_from_str(&content, delimiter)
}

/// Detect the most likely field delimiter by checking consistency across the first few lines.
///
/// For each candidate (tab, semicolon, comma, pipe), count fields per line. The delimiter
/// that produces the most consistent field count (>1 field) wins.
pub fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines.iter().map(|line| field_count(line, delim)).collect();

        let target = counts.first().copied().unwrap_or(0);
        if target <= 1 {
            continue;
        }

        // More columns breaks ties
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

fn field_count(line: &str, delimiter: u8) -> usize {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes())
        .records()
        .next()
        .and_then(|r| r.ok())
        .map(|r| r.len())
        .unwrap_or(1)
}

/// Read file and convert to UTF-8, falling back to Windows-1252 (Excel exports).
pub fn read_file_as_utf8(path: &Path) -> Result<String, IoError> {
    let mut file = std::fs::File::open(path).map_err(|e| IoError::file(path, e))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| IoError::file(path, e))?;
    Ok(decode(bytes))
}

fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(s),
        Err(e) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(e.as_bytes());
            decoded.into_owned()
        }
    }
}

/// Parse delimited text into a snapshot. Fields are trimmed; every non-empty
/// field is stored verbatim, so only fields that start with `=` become formulas.
/// Dimensions are left unset; hydration sizes the grid to fit.
pub fn import_from_str(content: &str, delimiter: u8) -> Result<GridSnapshot, IoError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut cells = CellMap::new();
    for (row, result) in reader.records().enumerate() {
        let record = result?;
        for (col, field) in record.iter().enumerate() {
            let value = field.trim();
            if !value.is_empty() {
                cells.insert(CellId::new(row, col), Cell::new(value));
            }
        }
    }

    Ok(GridSnapshot { cells, ..GridSnapshot::default() })
}

pub fn export(sheet: &Sheet, path: &Path, values: ExportValues) -> Result<(), IoError> {
    export_with_delimiter(sheet, path, b',', values)
}

pub fn export_tsv(sheet: &Sheet, path: &Path, values: ExportValues) -> Result<(), IoError> {
    export_with_delimiter(sheet, path, b'\t', values)
}

fn export_with_delimiter(sheet: &Sheet, path: &Path, delimiter: u8, values: ExportValues) -> Result<(), IoError> {
    let file = std::fs::File::create(path).map_err(|e| IoError::file(path, e))?;
    write_delimited(sheet, file, delimiter, values)
}

/// Write row-major records up to the last non-empty row. Trailing empty
/// fields are omitted, so rows may differ in width.
pub fn write_delimited<W: std::io::Write>(
    sheet: &Sheet,
    out: W,
    delimiter: u8,
    values: ExportValues,
) -> Result<(), IoError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_writer(out);

    let last_row = sheet.cells().keys().map(|id| id.row).max();
    if let Some(last_row) = last_row {
        for row in 0..=last_row {
            let mut record: Vec<String> = (0..sheet.cols())
                .map(|col| {
                    let id = CellId::new(row, col);
                    match values {
                        ExportValues::Raw => sheet.raw(id).trim().to_string(),
                        ExportValues::Display if sheet.cell(id).is_some() => sheet.display(id).trim().to_string(),
                        ExportValues::Display => String::new(),
                    }
                })
                .collect();
            let width = record.iter().rposition(|v| !v.is_empty()).map_or(0, |i| i + 1);
            record.truncate(width);
            if record.is_empty() {
                // Readers skip blank lines; a lone empty field keeps the row
                writer.write_record([""])?;
            } else {
                writer.write_record(&record)?;
            }
        }
    }

    writer.flush().map_err(|e| IoError::Csv(e.into()))?;
    Ok(())
}
