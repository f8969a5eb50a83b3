//! Document server HTTP client.
//!
//! Blocking reqwest client (no Tokio runtime required); run it behind a
//! worker [`Dispatcher`](crate::Dispatcher) to keep the grid thread free.
//!
//! Endpoints, relative to `{base_url}/documents/{id}`:
//! - `GET` load
//! - `POST /cells` cell batch (409 on stale version)
//! - `POST /structure` column width, row height, rename (409 on stale version)
//! - `PUT /snapshot` full state
//! - `POST /cursor` presence

use std::time::Duration;

use calcgrid_config::ServerSettings;
use calcgrid_protocol::{
    ConflictBody, DocumentEvent, LoadResponse, Snapshot, StructuralWrite, WriteAck, WriteBatch,
};
use reqwest::blocking::{RequestBuilder, Response};
use reqwest::StatusCode;

use crate::backend::DocumentBackend;
use crate::error::SyncError;

/// HTTP backend bound to one document.
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::blocking::Client,
    doc_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: &str, document_id: &str, token: Option<String>, timeout: Duration) -> Result<Self, SyncError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(format!("calcgrid/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        Ok(Self {
            http,
            doc_url: format!("{}/documents/{}", base_url.trim_end_matches('/'), document_id),
            token,
        })
    }

    /// Build from settings; `None` when no server is configured.
    pub fn from_settings(settings: &ServerSettings, document_id: &str) -> Option<Result<Self, SyncError>> {
        let base = settings.base_url.as_deref()?;
        Some(Self::new(base, document_id, settings.token.clone(), settings.timeout()))
    }

    pub fn document_url(&self) -> &str {
        &self.doc_url
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send(&self, req: RequestBuilder) -> Result<Response, SyncError> {
        let req = match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let response = req.send().map_err(|e| SyncError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            let body = response.text().unwrap_or_default();
            let conflict: ConflictBody =
                serde_json::from_str(&body).map_err(|e| SyncError::Parse(format!("conflict body: {}", e)))?;
            return Err(SyncError::Conflict { current: conflict.current_version });
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SyncError::Http { status: status.as_u16(), body });
        }

        Ok(response)
    }

    fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, SyncError> {
        response.json::<T>().map_err(|e| SyncError::Parse(e.to_string()))
    }
}

impl DocumentBackend for HttpBackend {
    fn load(&self) -> Result<LoadResponse, SyncError> {
        let resp = self.send(self.http.get(&self.doc_url))?;
        Self::json(resp)
    }

    fn write_cells(&self, batch: &WriteBatch) -> Result<WriteAck, SyncError> {
        let url = format!("{}/cells", self.doc_url);
        let resp = self.send(self.http.post(&url).json(batch))?;
        Self::json(resp)
    }

    fn write_structural(&self, write: &StructuralWrite) -> Result<WriteAck, SyncError> {
        let url = format!("{}/structure", self.doc_url);
        let resp = self.send(self.http.post(&url).json(write))?;
        Self::json(resp)
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), SyncError> {
        let url = format!("{}/snapshot", self.doc_url);
        self.send(self.http.put(&url).json(snapshot))?;
        Ok(())
    }

    fn publish_cursor(&self, event: &DocumentEvent) -> Result<(), SyncError> {
        let url = format!("{}/cursor", self.doc_url);
        self.send(self.http.post(&url).json(event))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calcgrid_core::CellId;
    use calcgrid_engine::Cell;
    use calcgrid_protocol::CellUpdate;
    use httpmock::prelude::*;
    use serde_json::json;

    fn backend(server: &MockServer) -> HttpBackend {
        HttpBackend::new(&server.base_url(), "doc-1", Some("tok".into()), Duration::from_secs(5)).unwrap()
    }

    fn batch(version: u64) -> WriteBatch {
        WriteBatch {
            cells: vec![CellUpdate::new(CellId::new(0, 0), Cell::new("hello"))],
            version,
            origin: None,
        }
    }

    #[test]
    fn test_write_cells_ack() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/documents/doc-1/cells")
                .header("authorization", "Bearer tok");
            then.status(200).json_body(json!({"version": 2}));
        });

        let ack = backend(&server).write_cells(&batch(1)).unwrap();
        mock.assert();
        assert_eq!(ack.version, 2);
    }

    #[test]
    fn test_write_conflict() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/documents/doc-1/cells");
            then.status(409).json_body(json!({"current_version": 5}));
        });

        let err = backend(&server).write_cells(&batch(1)).unwrap_err();
        assert!(matches!(err, SyncError::Conflict { current: 5 }));
    }

    #[test]
    fn test_server_error_is_http() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT).path("/documents/doc-1/snapshot");
            then.status(503).body("busy");
        });

        let err = backend(&server).save_snapshot(&Snapshot::default()).unwrap_err();
        match err {
            SyncError::Http { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_load() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/documents/doc-1");
            then.status(200).json_body(json!({
                "snapshot": {"cells": {"B2": {"value": "=1+1"}}, "column_widths": {"B": 120}},
                "version": 9,
                "name": "Budget"
            }));
        });

        let loaded = backend(&server).load().unwrap();
        assert_eq!(loaded.version, 9);
        assert_eq!(loaded.name, "Budget");
        assert_eq!(loaded.snapshot.cells.get(&CellId::new(1, 1)).map(|c| c.value.as_str()), Some("=1+1"));
        assert_eq!(loaded.snapshot.column_widths.get("B"), Some(&120));
    }

    #[test]
    fn test_unreachable_is_network() {
        let backend = HttpBackend::new("http://127.0.0.1:9", "doc", None, Duration::from_millis(200)).unwrap();
        assert!(matches!(backend.load().unwrap_err(), SyncError::Network(_)));
    }

    #[test]
    fn test_url_trims_slash() {
        let backend = HttpBackend::new("https://calc.example.com/api/", "d", None, Duration::from_secs(1)).unwrap();
        assert_eq!(backend.document_url(), "https://calc.example.com/api/documents/d");
    }
}
