//! Database log translation.
//!
//! The database layer reports raw [`DbLogEntry`] events. A [`LogTranslator`]
//! turns each one into a [`StructuredRecord`], and a [`DbLogAdapter`] pairs a
//! translator with a [`Logger`] so it can be installed as the database's
//! [`DbLogSink`].

use crate::logger::{Logger, StructuredRecord};
use crate::logging::fields;
use gantry_core::{DbLogEntry, DbLogSink};
use serde_json::Value;
use std::sync::Arc;
use tracing::Level;

/// Converts raw database log events into structured records.
pub trait LogTranslator: Send + Sync {
    /// Translates one event.
    fn translate(&self, entry: &DbLogEntry) -> StructuredRecord;
}

/// Default translator.
///
/// Statements become `sql` records at info level carrying source, duration,
/// statement, bound values and affected rows. Free-form messages become
/// `db` records at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlLogTranslator;

impl LogTranslator for SqlLogTranslator {
    fn translate(&self, entry: &DbLogEntry) -> StructuredRecord {
        match &entry.statement {
            Some(statement) => StructuredRecord::new(Level::INFO, "sql")
                .with_field(fields::SQL_SOURCE, entry.source.as_str())
                .with_field(fields::SQL_STATEMENT, statement.as_str())
                .with_field(fields::SQL_VALUES, Value::Array(entry.values.clone()))
                .with_optional_field(
                    fields::SQL_DURATION_MS,
                    entry.duration.map(|d| d.as_micros() as f64 / 1000.0),
                )
                .with_optional_field(fields::SQL_ROWS_AFFECTED, entry.rows_affected),
            None => StructuredRecord::new(Level::WARN, "db")
                .with_field(fields::SQL_SOURCE, entry.source.as_str())
                .with_field(fields::DB_MESSAGE, entry.message.clone().unwrap_or_default()),
        }
    }
}

/// A [`DbLogSink`] that translates and forwards to a [`Logger`].
#[derive(Clone)]
pub struct DbLogAdapter {
    logger: Logger,
    translator: Arc<dyn LogTranslator>,
}

impl DbLogAdapter {
    /// Pairs `logger` with `translator`.
    pub fn new(logger: Logger, translator: Arc<dyn LogTranslator>) -> Self {
        Self { logger, translator }
    }
}

impl DbLogSink for DbLogAdapter {
    fn log(&self, entry: DbLogEntry) {
        self.logger.log(&self.translator.translate(&entry));
    }
}
