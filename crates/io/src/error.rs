use std::path::PathBuf;

use thiserror::Error;

/// Errors from reading or writing grid files.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to access {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
}

impl IoError {
    pub(crate) fn file(path: &std::path::Path, source: std::io::Error) -> Self {
        IoError::File { path: path.to_path_buf(), source }
    }
}
