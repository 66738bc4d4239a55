//! The lifecycle coordinator.
//!
//! [`Bootstrap`] sequences startup and [`RunningService`] owns everything a
//! started service holds until it is shut down.
//!
//! ```text
//! Init ─► ResourcesAcquired ─► PipelineBuilt ─► Listening ─► Registered
//!   │              │                 │              │            │
//!   └──────────────┴─────────────────┴──► Failed    └──► ShuttingDown ─► Stopped
//! ```
//!
//! Every step that fails releases what earlier steps acquired, last acquired
//! first, before the error is returned. Discovery registration runs in the
//! background and its failure only leaves the service in `Listening`.
//!
//! # Example
//!
//! ```rust,no_run
//! use gantry_config::ConfigLoader;
//! use gantry_core::{Call, FnHandler};
//! use gantry_server::{wait_for_os_signal, Bootstrap};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().with_file("greeter.toml")?.load()?;
//! let handler = FnHandler::new(|_ctx, call: Call| async move { Ok(call.into_payload()) });
//!
//! let report = Bootstrap::new(config, handler)
//!     .run(wait_for_os_signal())
//!     .await?;
//! println!("released {:?}", report.released());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gantry_config::Configuration;
use gantry_core::{
    BootstrapError, BootstrapResult, DatabaseConnector, NoopRegistry, Registry,
    RegistrationRecord, ResourceKind, RpcHandler,
};
use gantry_middleware::{compose, AuditDecider, Dependencies};
use gantry_telemetry::{LogTranslator, Logger, OtlpTracerFactory, TracerFactory};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::resource::{self, ResourceStack};
use crate::server::ServiceInstance;
use crate::shutdown::ShutdownSignal;

/// How long shutdown waits for a registration request still in flight.
pub const REGISTRATION_GRACE: Duration = Duration::from_secs(2);

/// Where a service is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Nothing acquired yet.
    Init,
    /// Database, tracer and audit sink are held.
    ResourcesAcquired,
    /// The interceptor pipeline is composed.
    PipelineBuilt,
    /// The listener is accepting calls.
    Listening,
    /// Published to the discovery directory.
    Registered,
    /// Draining in-flight calls and releasing resources.
    ShuttingDown,
    /// Fully shut down.
    Stopped,
    /// Startup or serving failed. Absorbing.
    Failed,
}

impl LifecycleState {
    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::ResourcesAcquired => "resources_acquired",
            Self::PipelineBuilt => "pipeline_built",
            Self::Listening => "listening",
            Self::Registered => "registered",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Whether the service accepts calls in this state.
    #[must_use]
    pub const fn is_serving(&self) -> bool {
        matches!(self, Self::Listening | Self::Registered)
    }

    /// Whether no further transition can happen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What shutdown released, in release order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    released: Vec<ResourceKind>,
}

impl ShutdownReport {
    /// Kinds released, last acquired first.
    #[must_use]
    pub fn released(&self) -> &[ResourceKind] {
        &self.released
    }
}

/// Starts a service from a configuration and a handler.
pub struct Bootstrap {
    config: Configuration,
    handler: Box<dyn RpcHandler>,
    connector: Option<Arc<dyn DatabaseConnector>>,
    tracer_factory: Arc<dyn TracerFactory>,
    registry: Arc<dyn Registry>,
    logger: Option<Logger>,
    audit_decider: Option<Arc<dyn AuditDecider>>,
    log_translator: Option<Arc<dyn LogTranslator>>,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl Bootstrap {
    /// Creates a coordinator in the `Init` state.
    pub fn new(config: Configuration, handler: impl RpcHandler) -> Self {
        let (state, _) = watch::channel(LifecycleState::Init);
        Self {
            config,
            handler: Box::new(handler),
            connector: None,
            tracer_factory: Arc::new(OtlpTracerFactory),
            registry: Arc::new(NoopRegistry),
            logger: None,
            audit_decider: None,
            log_translator: None,
            state: Arc::new(state),
        }
    }

    /// Opens the database when `db` is configured.
    #[must_use]
    pub fn database_connector(mut self, connector: Arc<dyn DatabaseConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Builds the tracing client. Defaults to [`OtlpTracerFactory`].
    #[must_use]
    pub fn tracer_factory(mut self, factory: Arc<dyn TracerFactory>) -> Self {
        self.tracer_factory = factory;
        self
    }

    /// Discovery directory. Defaults to [`NoopRegistry`].
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = registry;
        self
    }

    /// Logger for per-call records. Defaults to one named after `appname`.
    #[must_use]
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Decides which calls the payload audit stage records.
    #[must_use]
    pub fn audit_decider(mut self, decider: Arc<dyn AuditDecider>) -> Self {
        self.audit_decider = Some(decider);
        self
    }

    /// Translates database log events into structured records.
    #[must_use]
    pub fn log_translator(mut self, translator: Arc<dyn LogTranslator>) -> Self {
        self.log_translator = Some(translator);
        self
    }

    /// Observes state transitions from now on.
    pub fn state_watch(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Runs startup up to `Listening` and returns the running service.
    ///
    /// # Errors
    ///
    /// Returns the first fatal startup error. Resources acquired before it
    /// have been released and the state is `Failed`.
    pub async fn start(self) -> BootstrapResult<RunningService> {
        let state = Arc::clone(&self.state);
        match self.start_inner().await {
            Ok(running) => Ok(running),
            Err(e) => {
                state.send_replace(LifecycleState::Failed);
                tracing::error!(error = %e, "service failed to start");
                Err(e)
            }
        }
    }

    /// Starts, serves until `signal` completes, then shuts down.
    ///
    /// A listener failure also ends the run.
    ///
    /// # Errors
    ///
    /// Returns a startup error, or the server error that ended the run.
    pub async fn run<F>(self, signal: F) -> BootstrapResult<ShutdownReport>
    where
        F: Future<Output = ()> + Send,
    {
        let running = self.start().await?;
        let stopped = running.shutdown_signal();
        tokio::select! {
            () = signal => tracing::info!("shutdown signal received"),
            () = stopped.recv() => {}
        }
        running.shutdown().await
    }

    async fn start_inner(self) -> BootstrapResult<RunningService> {
        let Self {
            config,
            mut handler,
            connector,
            tracer_factory,
            registry,
            logger,
            audit_decider,
            log_translator,
            state,
        } = self;

        let settings = config.settings()?;
        let server_config = ServerConfig::from_settings(&settings);

        let resource::AcquiredResources {
            database,
            tracer,
            audit_sink,
            stack: mut resources,
        } = resource::acquire(
            &config,
            &settings,
            connector.as_deref(),
            tracer_factory.as_ref(),
        )
        .await?;
        state.send_replace(LifecycleState::ResourcesAcquired);

        if let Some(db) = &database {
            handler.attach_database(Arc::clone(db));
        }
        let handler: Arc<dyn RpcHandler> = Arc::from(handler);

        let logger = logger.unwrap_or_else(|| Logger::new(settings.appname.as_str()));
        let mut deps = Dependencies::new(&settings.appname, tracer, logger);
        if let Some(db) = database {
            deps = deps.with_database(db);
        }
        if let Some(sink) = audit_sink {
            deps = deps.with_audit_sink(sink);
        }
        if let Some(decider) = audit_decider {
            deps = deps.with_audit_decider(decider);
        }
        if let Some(translator) = log_translator {
            deps = deps.with_log_translator(translator);
        }

        let composed = match compose(&config, &deps) {
            Ok(composed) => composed,
            Err(e) => {
                resources.release_all().await;
                return Err(e);
            }
        };
        state.send_replace(LifecycleState::PipelineBuilt);

        let instance = match ServiceInstance::assemble(composed, handler, &server_config).await {
            Ok(instance) => instance,
            Err(e) => {
                resources.release_all().await;
                return Err(e.into());
            }
        };

        let local_addr = instance.local_addr();
        let stages = instance.stage_names().to_vec();
        let shutdown = ShutdownSignal::new();
        let serve = tokio::spawn(instance.run(shutdown.clone()));
        state.send_replace(LifecycleState::Listening);

        tracing::info!(
            service = %settings.appname,
            %local_addr,
            ?stages,
            "service listening"
        );

        let record = RegistrationRecord {
            name: settings.appname.clone(),
            address: settings
                .registry_listen
                .clone()
                .unwrap_or_else(|| local_addr.to_string()),
            endpoint: registry.endpoint(),
        };
        let registration = tokio::spawn(register(
            Arc::clone(&registry),
            record.clone(),
            Arc::clone(&state),
        ));

        Ok(RunningService {
            record,
            local_addr,
            stages,
            state,
            shutdown,
            serve,
            registration,
            registry,
            resources,
        })
    }
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("state", &*self.state.borrow())
            .field("database_connector", &self.connector.is_some())
            .field("registry", &self.registry.endpoint())
            .finish_non_exhaustive()
    }
}

async fn register(
    registry: Arc<dyn Registry>,
    record: RegistrationRecord,
    state: Arc<watch::Sender<LifecycleState>>,
) {
    match registry.register(&record).await {
        Ok(()) => {
            let promoted = state.send_if_modified(|current| {
                if *current == LifecycleState::Listening {
                    *current = LifecycleState::Registered;
                    true
                } else {
                    false
                }
            });
            if promoted {
                tracing::info!(
                    name = %record.name,
                    address = %record.address,
                    endpoint = %record.endpoint,
                    "registered with discovery"
                );
            }
        }
        Err(e) => {
            let err = BootstrapError::registration(record.name.as_str(), e.to_string());
            tracing::warn!(error = %err, "serving without discovery registration");
        }
    }
}

/// A started service.
///
/// Call [`shutdown`](Self::shutdown) to stop it. Dropping it without
/// shutting down leaves the server task running and resources unreleased.
pub struct RunningService {
    record: RegistrationRecord,
    local_addr: SocketAddr,
    stages: Vec<&'static str>,
    state: Arc<watch::Sender<LifecycleState>>,
    shutdown: ShutdownSignal,
    serve: JoinHandle<Result<(), ServerError>>,
    registration: JoinHandle<()>,
    registry: Arc<dyn Registry>,
    resources: ResourceStack,
}

impl RunningService {
    /// The bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Observes state transitions.
    pub fn state_watch(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// The signal that stops the server. Triggering it alone does not
    /// release resources; use [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Names of the composed stages, outermost first.
    #[must_use]
    pub fn stage_names(&self) -> &[&'static str] {
        &self.stages
    }

    /// The record published to discovery.
    #[must_use]
    pub const fn registration(&self) -> &RegistrationRecord {
        &self.record
    }

    /// Kinds of resources held, in acquisition order.
    #[must_use]
    pub fn resources(&self) -> Vec<ResourceKind> {
        self.resources.kinds()
    }

    /// Stops accepting, drains in-flight calls for the grace period,
    /// withdraws registration and releases every resource in reverse
    /// acquisition order.
    ///
    /// A registration request still in flight gets [`REGISTRATION_GRACE`]
    /// to settle. If it does not, it is cancelled and the record is
    /// withdrawn anyway, since the directory may already hold it.
    ///
    /// # Errors
    ///
    /// Returns `BootstrapError::Server` when the listener had failed while
    /// serving. Resources are released either way.
    pub async fn shutdown(self) -> BootstrapResult<ShutdownReport> {
        let Self {
            record,
            state,
            shutdown,
            serve,
            mut registration,
            registry,
            mut resources,
            ..
        } = self;

        let unsettled = tokio::time::timeout(REGISTRATION_GRACE, &mut registration)
            .await
            .is_err();
        if unsettled {
            registration.abort();
            tracing::warn!(
                name = %record.name,
                grace = ?REGISTRATION_GRACE,
                "registration still pending at shutdown, withdrawing anyway"
            );
        }
        let registered = unsettled || *state.borrow() == LifecycleState::Registered;

        state.send_replace(LifecycleState::ShuttingDown);
        tracing::info!(service = %record.name, "shutting down");
        shutdown.trigger();

        let served = match serve.await {
            Ok(result) => result.map_err(BootstrapError::from),
            Err(e) => Err(ServerError::Task(e.to_string()).into()),
        };

        if registered {
            if let Err(e) = registry.deregister(&record.name).await {
                tracing::warn!(name = %record.name, error = %e, "failed to withdraw registration");
            }
        }

        let released = resources.release_all().await;

        match served {
            Ok(()) => {
                state.send_replace(LifecycleState::Stopped);
                tracing::info!(service = %record.name, ?released, "service stopped");
                Ok(ShutdownReport { released })
            }
            Err(e) => {
                state.send_replace(LifecycleState::Failed);
                tracing::error!(
                    service = %record.name,
                    error = %e,
                    "service stopped after failure"
                );
                Err(e)
            }
        }
    }
}

impl fmt::Debug for RunningService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningService")
            .field("name", &self.record.name)
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}
