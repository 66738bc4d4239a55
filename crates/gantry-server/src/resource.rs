//! Resource handles and the release stack.
//!
//! Every long-lived dependency the service owns (database connection,
//! tracing client, audit sink) is wrapped in a [`ResourceHandle`] as soon as
//! it is acquired and pushed onto a [`ResourceStack`]. Releasing the stack
//! tears handles down in reverse acquisition order. A release failure is
//! logged and never propagated.
//!
//! Acquisition order is fixed: database (when `db` is configured), tracer
//! (always), audit sink (when `log.access` is configured).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use gantry_config::{AccessLogSection, Configuration, ServiceSettings, TracingSection};
use gantry_core::{
    BootstrapError, BootstrapResult, BoxFuture, DatabaseConnector, DatabaseHandle, ResourceKind,
};
use gantry_telemetry::{AuditSink, TracerClient, TracerFactory};

/// Connection map key holding the default database settings.
pub const DEFAULT_DATABASE: &str = "db.default";

/// Something the coordinator must release on shutdown.
pub trait Releasable: Send + Sync {
    /// Releases the underlying resource.
    fn release(&self) -> BoxFuture<'_, Result<(), String>>;
}

impl Releasable for DatabaseHandle {
    fn release(&self) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move { self.close().await.map_err(|e| e.to_string()) })
    }
}

impl Releasable for TracerClient {
    fn release(&self) -> BoxFuture<'_, Result<(), String>> {
        let client = self.clone();
        Box::pin(async move {
            // flushing the batch exporter blocks
            tokio::task::spawn_blocking(move || client.shutdown())
                .await
                .map_err(|e| e.to_string())?
                .map_err(|e| e.to_string())
        })
    }
}

impl Releasable for AuditSink {
    fn release(&self) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move { self.flush().map_err(|e| e.to_string()) })
    }
}

/// One acquired resource with a uniform, idempotent release.
pub struct ResourceHandle {
    kind: ResourceKind,
    resource: Box<dyn Releasable>,
    released: AtomicBool,
}

impl ResourceHandle {
    /// Wraps an acquired resource.
    pub fn new(kind: ResourceKind, resource: impl Releasable + 'static) -> Self {
        Self {
            kind,
            resource: Box::new(resource),
            released: AtomicBool::new(false),
        }
    }

    /// Resource kind.
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Whether [`release`](Self::release) already ran.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Releases the resource once. Later calls do nothing.
    ///
    /// Returns `true` when this call performed the release. Errors from the
    /// resource are logged, not returned.
    pub async fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        match self.resource.release().await {
            Ok(()) => tracing::debug!(kind = %self.kind, "resource released"),
            Err(message) => {
                tracing::warn!(kind = %self.kind, error = %message, "resource release failed");
            }
        }
        true
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("kind", &self.kind)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

/// Handles in acquisition order.
#[derive(Debug, Default)]
pub struct ResourceStack {
    handles: Vec<ResourceHandle>,
}

impl ResourceStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly acquired handle.
    pub fn push(&mut self, handle: ResourceHandle) {
        tracing::debug!(kind = %handle.kind(), "resource acquired");
        self.handles.push(handle);
    }

    /// Kinds held, in acquisition order.
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.handles.iter().map(ResourceHandle::kind).collect()
    }

    /// Number of handles held.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Releases every handle, last acquired first, and empties the stack.
    ///
    /// Returns the kinds released, in release order.
    pub async fn release_all(&mut self) -> Vec<ResourceKind> {
        let mut released = Vec::with_capacity(self.handles.len());
        while let Some(handle) = self.handles.pop() {
            if handle.release().await {
                released.push(handle.kind());
            }
        }
        released
    }
}

/// Everything acquired before the pipeline is composed.
pub struct AcquiredResources {
    /// Database connection, when `db` is configured.
    pub database: Option<DatabaseHandle>,
    /// Tracing client; local when tracing is not configured.
    pub tracer: TracerClient,
    /// Payload audit sink, when `log.access` is configured.
    pub audit_sink: Option<AuditSink>,
    /// Release stack covering all of the above.
    pub stack: ResourceStack,
}

impl fmt::Debug for AcquiredResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquiredResources")
            .field("database", &self.database.is_some())
            .field("tracer", &self.tracer)
            .field("audit_sink", &self.audit_sink)
            .field("stack", &self.stack)
            .finish()
    }
}

/// Acquires the configured resources in order.
///
/// # Errors
///
/// Returns `AcquisitionFailed` for a resource that could not be opened, or a
/// stage `Configuration` error for a malformed section. Whatever was acquired
/// before the failure is released first.
pub async fn acquire(
    config: &Configuration,
    settings: &ServiceSettings,
    connector: Option<&dyn DatabaseConnector>,
    tracer_factory: &dyn TracerFactory,
) -> BootstrapResult<AcquiredResources> {
    let mut stack = ResourceStack::new();

    let database = if config.is_set("db") {
        match open_database(config, settings, connector).await {
            Ok(db) => {
                stack.push(ResourceHandle::new(ResourceKind::Database, DatabaseHandle::clone(&db)));
                Some(db)
            }
            Err(e) => return Err(unwind(stack, e).await),
        }
    } else {
        None
    };

    let tracer = match create_tracer(config, settings, tracer_factory) {
        Ok(tracer) => {
            stack.push(ResourceHandle::new(ResourceKind::Tracer, tracer.clone()));
            tracer
        }
        Err(e) => return Err(unwind(stack, e).await),
    };

    let audit_sink = match open_audit_sink(config) {
        Ok(Some(sink)) => {
            stack.push(ResourceHandle::new(ResourceKind::Logger, sink.clone()));
            Some(sink)
        }
        Ok(None) => None,
        Err(e) => return Err(unwind(stack, e).await),
    };

    Ok(AcquiredResources {
        database,
        tracer,
        audit_sink,
        stack,
    })
}

async fn unwind(mut stack: ResourceStack, err: BootstrapError) -> BootstrapError {
    let released = stack.release_all().await;
    tracing::debug!(?released, "released resources after failed acquisition");
    err
}

async fn open_database(
    config: &Configuration,
    settings: &ServiceSettings,
    connector: Option<&dyn DatabaseConnector>,
) -> BootstrapResult<DatabaseHandle> {
    let Some(connection) = config.table(DEFAULT_DATABASE) else {
        return Err(BootstrapError::acquisition(
            ResourceKind::Database,
            format!("'{DEFAULT_DATABASE}' is not configured"),
        ));
    };
    let Some(connector) = connector else {
        return Err(BootstrapError::acquisition(
            ResourceKind::Database,
            "no database connector supplied",
        ));
    };

    let db = connector
        .connect(connection)
        .await
        .map_err(|e| BootstrapError::acquisition(ResourceKind::Database, e.to_string()))?;
    if settings.debug {
        db.set_statement_logging(true);
    }
    Ok(db)
}

fn create_tracer(
    config: &Configuration,
    settings: &ServiceSettings,
    factory: &dyn TracerFactory,
) -> BootstrapResult<TracerClient> {
    let section = config
        .section::<TracingSection>()
        .map_err(|e| BootstrapError::stage("tracing", e.to_string()))?;
    factory
        .create(section.as_ref(), &settings.appname)
        .map_err(|e| BootstrapError::acquisition(ResourceKind::Tracer, e.to_string()))
}

fn open_audit_sink(config: &Configuration) -> BootstrapResult<Option<AuditSink>> {
    let Some(section) = config
        .section::<AccessLogSection>()
        .map_err(|e| BootstrapError::stage("payload_audit", e.to_string()))?
    else {
        return Ok(None);
    };
    AuditSink::open(&section)
        .map(Some)
        .map_err(|e| BootstrapError::acquisition(ResourceKind::Logger, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::InMemoryConnector;
    use gantry_telemetry::{OtlpTracerFactory, TelemetryError, TelemetryResult};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl Releasable for Recording {
        fn release(&self) -> BoxFuture<'_, Result<(), String>> {
            Box::pin(async move {
                self.log.lock().push(self.name);
                if self.fail {
                    Err(format!("{} refused to close", self.name))
                } else {
                    Ok(())
                }
            })
        }
    }

    struct FailingTracer;

    impl TracerFactory for FailingTracer {
        fn create(&self, _: Option<&TracingSection>, _: &str) -> TelemetryResult<TracerClient> {
            Err(TelemetryError::TracingInit("collector unreachable".into()))
        }
    }

    fn config(doc: &str) -> (Configuration, ServiceSettings) {
        let config = Configuration::from_toml(doc).unwrap();
        let settings = config.settings().unwrap();
        (config, settings)
    }

    const WITH_DB: &str = r#"
appname = "svc"
listen = ":0"

[db.default]
dialect = "memory"
"#;

    #[tokio::test]
    async fn test_stack_releases_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ResourceStack::new();
        for (kind, name) in [
            (ResourceKind::Database, "db"),
            (ResourceKind::Tracer, "tracer"),
            (ResourceKind::Logger, "audit"),
        ] {
            stack.push(ResourceHandle::new(
                kind,
                Recording {
                    name,
                    log: Arc::clone(&log),
                    fail: false,
                },
            ));
        }

        let released = stack.release_all().await;
        assert_eq!(
            released,
            vec![ResourceKind::Logger, ResourceKind::Tracer, ResourceKind::Database]
        );
        assert_eq!(*log.lock(), vec!["audit", "tracer", "db"]);
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_swallows_errors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = ResourceHandle::new(
            ResourceKind::Database,
            Recording {
                name: "db",
                log: Arc::clone(&log),
                fail: true,
            },
        );

        assert!(handle.release().await);
        assert!(!handle.release().await);
        assert!(handle.is_released());
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_db_section_acquires_no_database() {
        let (config, settings) = config("appname = \"svc\"\nlisten = \":0\"\n");
        let connector = InMemoryConnector::new();

        let mut acquired = acquire(&config, &settings, Some(&connector), &OtlpTracerFactory)
            .await
            .unwrap();

        assert!(acquired.database.is_none());
        assert!(acquired.audit_sink.is_none());
        assert!(connector.opened().is_empty());
        assert_eq!(acquired.stack.kinds(), vec![ResourceKind::Tracer]);
        assert_eq!(acquired.stack.release_all().await, vec![ResourceKind::Tracer]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_debug_enables_statement_logging() {
        let doc = WITH_DB.replace("listen = \":0\"", "listen = \":0\"\ndebug = true");
        let (config, settings) = config(&doc);
        let connector = InMemoryConnector::new();

        let mut acquired = acquire(&config, &settings, Some(&connector), &OtlpTracerFactory)
            .await
            .unwrap();

        assert!(connector.opened()[0].statement_logging());
        acquired.stack.release_all().await;
        assert!(connector.opened()[0].is_closed());
    }

    #[tokio::test]
    async fn test_tracer_failure_releases_database_once() {
        let (config, settings) = config(WITH_DB);
        let connector = InMemoryConnector::new();

        let err = acquire(&config, &settings, Some(&connector), &FailingTracer)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BootstrapError::AcquisitionFailed {
                kind: ResourceKind::Tracer,
                ..
            }
        ));
        let db = &connector.opened()[0];
        assert!(db.is_closed());
        assert_eq!(db.close_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unopenable_audit_file_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing").join("access.log");
        let doc = format!("{WITH_DB}\n[log.access]\npath = {:?}\n", missing.display().to_string());
        let (config, settings) = config(&doc);
        let connector = InMemoryConnector::new();

        let err = acquire(&config, &settings, Some(&connector), &OtlpTracerFactory)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BootstrapError::AcquisitionFailed {
                kind: ResourceKind::Logger,
                ..
            }
        ));
        assert_eq!(connector.opened()[0].close_calls(), 1);
    }

    #[tokio::test]
    async fn test_db_without_connector_fails() {
        let (config, settings) = config(WITH_DB);
        let err = acquire(&config, &settings, None, &OtlpTracerFactory)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::AcquisitionFailed {
                kind: ResourceKind::Database,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_access_log_names_stage() {
        let (config, settings) =
            config("appname = \"svc\"\nlisten = \":0\"\n\n[log.access]\nbogus = 1\n");
        let err = acquire(&config, &settings, None, &OtlpTracerFactory)
            .await
            .unwrap_err();
        assert_eq!(err.failed_stage(), Some("payload_audit"));
    }
}
