//! Database collaborator seam.
//!
//! Gantry does not ship a driver. It only needs to open a connection from the
//! `db.default` section, switch statement logging, install a structured log
//! sink, and close the connection on shutdown. Anything implementing
//! [`Database`] can be plugged in through a [`DatabaseConnector`].

use crate::handler::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared database handle.
pub type DatabaseHandle = Arc<dyn Database>;

/// Error reported by a database collaborator.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DatabaseError(pub String);

/// One raw log event produced by the database layer.
#[derive(Debug, Clone, PartialEq)]
pub struct DbLogEntry {
    /// Source location that issued the statement (`file:line`).
    pub source: String,
    /// Executed statement, when the event is a statement.
    pub statement: Option<String>,
    /// Bound parameter values.
    pub values: Vec<Value>,
    /// Execution time.
    pub duration: Option<Duration>,
    /// Rows affected.
    pub rows_affected: Option<u64>,
    /// Free-form message for non-statement events.
    pub message: Option<String>,
}

impl DbLogEntry {
    /// Creates a statement event.
    pub fn statement(source: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            statement: Some(statement.into()),
            values: Vec::new(),
            duration: None,
            rows_affected: None,
            message: None,
        }
    }

    /// Creates a free-form message event.
    pub fn message(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            statement: None,
            values: Vec::new(),
            duration: None,
            rows_affected: None,
            message: Some(message.into()),
        }
    }

    /// Sets the bound values.
    #[must_use]
    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = values;
        self
    }

    /// Sets the execution time.
    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Sets the affected row count.
    #[must_use]
    pub const fn with_rows_affected(mut self, rows: u64) -> Self {
        self.rows_affected = Some(rows);
        self
    }
}

/// Receives raw database log events.
pub trait DbLogSink: Send + Sync {
    /// Records one event.
    fn log(&self, entry: DbLogEntry);
}

/// An open database connection.
pub trait Database: Send + Sync + 'static {
    /// Closes the connection.
    fn close(&self) -> BoxFuture<'_, Result<(), DatabaseError>>;

    /// Switches verbose statement logging on or off.
    fn set_statement_logging(&self, enabled: bool);

    /// Installs the sink that receives structured log events.
    fn set_log_sink(&self, sink: Arc<dyn DbLogSink>);
}

/// Opens a [`Database`] from the `db.default` connection map.
pub trait DatabaseConnector: Send + Sync + 'static {
    /// Opens a connection.
    fn connect<'a>(
        &'a self,
        settings: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<DatabaseHandle, DatabaseError>>;
}

/// A process-local database used by the demo binary and by tests.
///
/// It stores nothing. Every [`execute`](InMemoryDatabase::execute) is reported
/// to the installed sink, which makes the logging path observable.
#[derive(Default)]
pub struct InMemoryDatabase {
    statement_logging: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    sink: Mutex<Option<Arc<dyn DbLogSink>>>,
}

impl InMemoryDatabase {
    /// Creates an open database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `statement` to the installed sink.
    pub fn execute(
        &self,
        source: &str,
        statement: &str,
        values: Vec<Value>,
    ) -> Result<u64, DatabaseError> {
        if self.is_closed() {
            return Err(DatabaseError("database is closed".to_string()));
        }
        if self.statement_logging() {
            tracing::debug!(source, statement, "statement");
        }
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.log(
                DbLogEntry::statement(source, statement)
                    .with_values(values)
                    .with_duration(Duration::ZERO)
                    .with_rows_affected(0),
            );
        }
        Ok(0)
    }

    /// Whether verbose statement logging is on.
    pub fn statement_logging(&self) -> bool {
        self.statement_logging.load(Ordering::SeqCst)
    }

    /// Whether a log sink has been installed.
    pub fn has_log_sink(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Whether [`close`](Database::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// How many times [`close`](Database::close) has been called.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Database for InMemoryDatabase {
    fn close(&self) -> BoxFuture<'_, Result<(), DatabaseError>> {
        Box::pin(async move {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            if self.closed.swap(true, Ordering::SeqCst) {
                return Err(DatabaseError("database already closed".to_string()));
            }
            Ok(())
        })
    }

    fn set_statement_logging(&self, enabled: bool) {
        self.statement_logging.store(enabled, Ordering::SeqCst);
    }

    fn set_log_sink(&self, sink: Arc<dyn DbLogSink>) {
        *self.sink.lock() = Some(sink);
    }
}

/// Connector for [`InMemoryDatabase`].
///
/// Accepts any map whose `dialect` is `memory`. Every connection it opens is
/// kept so callers can inspect it afterwards.
#[derive(Default)]
pub struct InMemoryConnector {
    opened: Mutex<Vec<Arc<InMemoryDatabase>>>,
}

impl InMemoryConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections opened so far.
    pub fn opened(&self) -> Vec<Arc<InMemoryDatabase>> {
        self.opened.lock().clone()
    }
}

impl DatabaseConnector for InMemoryConnector {
    fn connect<'a>(
        &'a self,
        settings: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<DatabaseHandle, DatabaseError>> {
        Box::pin(async move {
            match settings.get("dialect").and_then(Value::as_str) {
                Some("memory") => {
                    let db = Arc::new(InMemoryDatabase::new());
                    self.opened.lock().push(Arc::clone(&db));
                    Ok(db as DatabaseHandle)
                }
                Some(other) => Err(DatabaseError(format!("unsupported dialect '{other}'"))),
                None => Err(DatabaseError("missing 'dialect'".to_string())),
            }
        })
    }
}
