//! Structured per-call records.
//!
//! A [`Logger`] is a cheap, cloneable value. The pipeline receives one
//! explicitly instead of reaching for a global. Every record is emitted as a
//! `tracing` event and handed to each attached [`RecordSink`].

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::field::display;
use tracing::Level;

use crate::logging::fields;

macro_rules! emit {
    ($level:expr, $name:expr, $record:expr, $extra:expr) => {
        tracing::event!(
            $level,
            logger = $name,
            request_id = text($record, fields::REQUEST_ID),
            trace_id = text($record, fields::TRACE_ID),
            span_id = text($record, fields::SPAN_ID),
            rpc.service = text($record, fields::RPC_SERVICE),
            rpc.method = text($record, fields::RPC_METHOD),
            rpc.code = text($record, fields::RPC_CODE),
            duration_ms = number($record, fields::DURATION_MS),
            caller = text($record, fields::CALLER),
            error = text($record, fields::ERROR),
            rejected_by = text($record, fields::REJECTED_BY),
            sql.source = text($record, fields::SQL_SOURCE),
            sql.statement = text($record, fields::SQL_STATEMENT),
            sql.values = $record.field(fields::SQL_VALUES).map(display),
            sql.duration_ms = number($record, fields::SQL_DURATION_MS),
            sql.rows_affected = $record.field(fields::SQL_ROWS_AFFECTED).and_then(serde_json::Value::as_u64),
            db.message = text($record, fields::DB_MESSAGE),
            extra = $extra.as_ref().map(display),
            "{}",
            $record.message
        )
    };
}

/// One structured log record.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredRecord {
    /// Severity.
    pub level: Level,
    /// Human-readable message.
    pub message: String,
    /// Structured fields.
    pub fields: Map<String, Value>,
}

impl StructuredRecord {
    /// Creates a record without fields.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Adds a field when `value` is present.
    #[must_use]
    pub fn with_optional_field(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.with_field(key, value),
            None => self,
        }
    }

    /// Looks up a field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Receives every record a [`Logger`] emits.
pub trait RecordSink: Send + Sync {
    /// Handles one record.
    fn write(&self, logger: &str, record: &StructuredRecord);
}

/// A named structured logger.
#[derive(Clone)]
pub struct Logger {
    name: Arc<str>,
    sinks: Vec<Arc<dyn RecordSink>>,
}

impl Logger {
    /// Creates a logger that only forwards to `tracing`.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            sinks: Vec::new(),
        }
    }

    /// Attaches an additional sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Logger name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emits a record.
    ///
    /// Known fields become individual `tracing` fields. Anything else is
    /// rendered as one JSON object under `extra`.
    pub fn log(&self, record: &StructuredRecord) {
        let name = &*self.name;
        let extra = extra_fields(record);
        match record.level {
            Level::ERROR => emit!(Level::ERROR, name, record, extra),
            Level::WARN => emit!(Level::WARN, name, record, extra),
            Level::INFO => emit!(Level::INFO, name, record, extra),
            Level::DEBUG => emit!(Level::DEBUG, name, record, extra),
            _ => emit!(Level::TRACE, name, record, extra),
        }
        for sink in &self.sinks {
            sink.write(name, record);
        }
    }
}

const KNOWN_FIELDS: &[&str] = &[
    fields::REQUEST_ID,
    fields::TRACE_ID,
    fields::SPAN_ID,
    fields::RPC_SERVICE,
    fields::RPC_METHOD,
    fields::RPC_CODE,
    fields::DURATION_MS,
    fields::CALLER,
    fields::ERROR,
    fields::REJECTED_BY,
    fields::SQL_SOURCE,
    fields::SQL_STATEMENT,
    fields::SQL_VALUES,
    fields::SQL_DURATION_MS,
    fields::SQL_ROWS_AFFECTED,
    fields::DB_MESSAGE,
];

fn text<'a>(record: &'a StructuredRecord, key: &str) -> Option<&'a str> {
    record.field(key).and_then(Value::as_str)
}

fn number(record: &StructuredRecord, key: &str) -> Option<f64> {
    record.field(key).and_then(Value::as_f64)
}

fn extra_fields(record: &StructuredRecord) -> Option<Value> {
    let rest: Map<String, Value> = record
        .fields
        .iter()
        .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    (!rest.is_empty()).then_some(Value::Object(rest))
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// A sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<StructuredRecord>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records written so far.
    pub fn records(&self) -> Vec<StructuredRecord> {
        self.records.lock().clone()
    }

    /// Records whose message equals `message`.
    pub fn find(&self, message: &str) -> Vec<StructuredRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.message == message)
            .cloned()
            .collect()
    }

    /// Number of records written.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing was written.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordSink for MemorySink {
    fn write(&self, _logger: &str, record: &StructuredRecord) {
        self.records.lock().push(record.clone());
    }
}
