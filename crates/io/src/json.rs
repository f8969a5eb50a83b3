// Snapshot JSON files

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use calcgrid_engine::{GridSnapshot, GridStore};
use calcgrid_protocol::Snapshot;

use crate::error::IoError;

/// Write the store's persisted state in the same shape autosave sends.
pub fn export(store: &GridStore, path: &Path) -> Result<(), IoError> {
    save_snapshot(&Snapshot::from_grid(&store.snapshot()), path)
}

pub fn import(path: &Path) -> Result<GridSnapshot, IoError> {
    Ok(load_snapshot(path)?.into_grid())
}

pub fn save_snapshot(snapshot: &Snapshot, path: &Path) -> Result<(), IoError> {
    let file = File::create(path).map_err(|e| IoError::file(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, snapshot)?;
    writer.flush().map_err(|e| IoError::file(path, e))?;
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<Snapshot, IoError> {
    let file = File::open(path).map_err(|e| IoError::file(path, e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use calcgrid_core::CellId;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_snapshot_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");

        let mut store = GridStore::new(10, 5, 50);
        store.update_cell(CellId::new(0, 0), "Name", None);
        store.update_cell(CellId::new(1, 1), "=A1&\"!\"", None);
        store.resize_column(1, 140);
        store.resize_row(2, 40);
        store.select_cell(CellId::new(1, 1));

        export(&store, &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"B2\""));
        assert!(content.contains("\"B\": 140"));

        let grid = import(&path).unwrap();
        assert_eq!(grid, store.snapshot());
    }

    #[test]
    fn test_import_missing_file() {
        let dir = tempdir().unwrap();
        let err = import(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, IoError::File { .. }));
    }

    #[test]
    fn test_import_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{\"cells\": [").unwrap();
        assert!(matches!(import(&path).unwrap_err(), IoError::Json(_)));
    }
}
