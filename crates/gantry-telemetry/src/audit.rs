//! Payload audit log.
//!
//! Each audited call appends one JSON object per line: request and response
//! payloads, status code, and correlation IDs. Payloads that are valid JSON
//! are embedded as JSON, valid UTF-8 as a string, anything else as base64.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use base64::Engine;
use chrono::{DateTime, Utc};
use gantry_config::AccessLogSection;
use gantry_core::Code;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the call completed.
    pub timestamp: DateTime<Utc>,
    /// Full method name.
    pub method: String,
    /// Request ID.
    pub request_id: String,
    /// Trace ID, when the call was traced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Caller (`log_id`).
    pub caller: String,
    /// Status code.
    pub code: Code,
    /// Wall time spent in the call.
    pub duration_ms: f64,
    /// Rendered request payload.
    pub request: Value,
    /// Rendered response payload.
    pub response: Value,
}

/// Append-only JSON-lines audit file.
#[derive(Clone)]
pub struct AuditSink {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    file: Mutex<File>,
    max_payload_bytes: Option<usize>,
    written: AtomicU64,
}

impl AuditSink {
    /// Opens (creating if needed) the file named by `[log.access]`.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::Audit` if the file cannot be opened.
    pub fn open(section: &AccessLogSection) -> TelemetryResult<Self> {
        let path = section.path.clone();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| TelemetryError::Audit {
                path: path.display().to_string(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "audit log opened");
        Ok(Self {
            inner: Arc::new(Inner {
                path,
                file: Mutex::new(file),
                max_payload_bytes: section.max_payload_bytes,
                written: AtomicU64::new(0),
            }),
        })
    }

    /// Audit file path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Number of records written through this sink.
    pub fn records_written(&self) -> u64 {
        self.inner.written.load(Ordering::Relaxed)
    }

    /// Renders a payload for an [`AuditEntry`], honouring `max_payload_bytes`.
    pub fn render_payload(&self, payload: &[u8]) -> Value {
        match self.inner.max_payload_bytes {
            Some(max) if payload.len() > max => json!({
                "truncated": true,
                "size": payload.len(),
                "head": String::from_utf8_lossy(&payload[..max]),
            }),
            _ => render_payload(payload),
        }
    }

    /// Appends one record.
    pub fn record(&self, entry: &AuditEntry) -> TelemetryResult<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.inner
            .file
            .lock()
            .write_all(&line)
            .map_err(|source| self.io_error(source))?;
        self.inner.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flushes written records to disk.
    pub fn flush(&self) -> TelemetryResult<()> {
        let mut file = self.inner.file.lock();
        file.flush().map_err(|source| self.io_error(source))?;
        file.sync_data().map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> TelemetryError {
        TelemetryError::Audit {
            path: self.inner.path.display().to_string(),
            source,
        }
    }
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("path", &self.inner.path)
            .field("records_written", &self.records_written())
            .finish()
    }
}

fn render_payload(payload: &[u8]) -> Value {
    if payload.is_empty() {
        return Value::Null;
    }
    if let Ok(value) = serde_json::from_slice::<Value>(payload) {
        return value;
    }
    match std::str::from_utf8(payload) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => json!({
            "base64": base64::engine::general_purpose::STANDARD.encode(payload),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(dir: &tempfile::TempDir) -> AccessLogSection {
        AccessLogSection {
            path: dir.path().join("access.log"),
            methods: None,
            max_payload_bytes: None,
        }
    }

    fn entry(sink: &AuditSink, request: &[u8], response: &[u8]) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            method: "/helloworld.Greeter/SayHello".into(),
            request_id: "r-1".into(),
            trace_id: None,
            caller: "anonymous".into(),
            code: Code::Ok,
            duration_ms: 1.5,
            request: sink.render_payload(request),
            response: sink.render_payload(response),
        }
    }

    #[test]
    fn test_records_are_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AuditSink::open(&section(&dir)).unwrap();

        sink.record(&entry(&sink, br#"{"name":"ada"}"#, b"hello ada")).unwrap();
        sink.record(&entry(&sink, b"", b"")).unwrap();
        sink.flush().unwrap();

        let contents = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["request"]["name"], "ada");
        assert_eq!(lines[0]["response"], "hello ada");
        assert_eq!(lines[0]["code"], "OK");
        assert!(lines[0].get("trace_id").is_none());
        assert!(lines[1]["request"].is_null());
        assert_eq!(sink.records_written(), 2);
    }

    #[test]
    fn test_binary_payload_is_base64() {
        assert_eq!(render_payload(&[0xff, 0x00]), json!({"base64": "/wA="}));
    }

    #[test]
    fn test_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let mut section = section(&dir);
        section.max_payload_bytes = Some(4);
        let sink = AuditSink::open(&section).unwrap();

        let rendered = sink.render_payload(b"abcdefgh");
        assert_eq!(rendered["truncated"], true);
        assert_eq!(rendered["size"], 8);
        assert_eq!(rendered["head"], "abcd");
    }

    #[test]
    fn test_open_fails_for_missing_directory() {
        let section = AccessLogSection {
            path: PathBuf::from("/nonexistent-dir/for/sure/access.log"),
            methods: None,
            max_payload_bytes: None,
        };
        assert!(matches!(AuditSink::open(&section), Err(TelemetryError::Audit { .. })));
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let section = section(&dir);
        std::fs::write(&section.path, "{\"existing\":true}\n").unwrap();

        let sink = AuditSink::open(&section).unwrap();
        sink.record(&entry(&sink, b"{}", b"{}")).unwrap();

        let contents = std::fs::read_to_string(&section.path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
