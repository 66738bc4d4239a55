//! The stage catalog.
//!
//! Every stage a service can run is listed here once, with its rank, the
//! predicate that decides whether the configuration asks for it, and the
//! builder that turns configuration plus acquired resources into a
//! [`PipelineUnit`].
//!
//! | Rank | Stage | Applies when |
//! |------|-------|--------------|
//! | 0 | `tracing` | always |
//! | 1 | `logging` | always |
//! | 2 | `payload_audit` | `log.access` is set |
//! | 3 | `metrics` | `metrics` is set |
//! | 4 | `keepalive` | `keepalive` is set |
//! | 5 | `auth` | `auth` is set |
//!
//! Lower ranks are outer layers of the onion.

use crate::compose::Dependencies;
use crate::pipeline::BoxedMiddleware;
use crate::stages;
use gantry_config::Configuration;
use metrics_exporter_prometheus::PrometheusHandle;
use std::fmt;
use std::time::Duration;

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Server span per call
    Tracing = 0,
    /// Structured record per call
    Logging = 1,
    /// Request/response payloads to the audit file
    PayloadAudit = 2,
    /// Prometheus counters and latency
    Metrics = 3,
    /// Connection keep-alive policy
    KeepAlive = 4,
    /// Bearer credential check
    Auth = 5,
}

impl Stage {
    /// Position in the onion. Lower is outer.
    #[must_use]
    pub const fn rank(self) -> u8 {
        self as u8
    }

    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tracing => "tracing",
            Self::Logging => "logging",
            Self::PayloadAudit => "payload_audit",
            Self::Metrics => "metrics",
            Self::KeepAlive => "keepalive",
            Self::Auth => "auth",
        }
    }

    /// Returns all stages in rank order.
    #[must_use]
    pub const fn all() -> [Stage; 6] {
        [
            Self::Tracing,
            Self::Logging,
            Self::PayloadAudit,
            Self::Metrics,
            Self::KeepAlive,
            Self::Auth,
        ]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection-level settings produced by transport stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Keep connections open between calls.
    pub keep_alive: bool,
    /// Close a connection idle for this long.
    pub idle_timeout: Option<Duration>,
    /// Gracefully close a connection once it is this old.
    pub max_connection_age: Option<Duration>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            keep_alive: true,
            idle_timeout: None,
            max_connection_age: None,
        }
    }
}

/// What a stage contributes to the server.
pub enum PipelineUnit {
    /// Wraps every call.
    Interceptor(BoxedMiddleware),
    /// Wraps every call and exposes a scrape endpoint.
    Metered {
        /// The interceptor.
        interceptor: BoxedMiddleware,
        /// Renders the recorded metrics.
        scrape: PrometheusHandle,
    },
    /// Applies to connections rather than calls.
    Transport(TransportOptions),
}

impl fmt::Debug for PipelineUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interceptor(mw) => f.debug_tuple("Interceptor").field(&mw.name()).finish(),
            Self::Metered { interceptor, .. } => {
                f.debug_tuple("Metered").field(&interceptor.name()).finish()
            }
            Self::Transport(options) => f.debug_tuple("Transport").field(options).finish(),
        }
    }
}

/// Decides whether a stage is wanted.
pub type AppliesFn = fn(&Configuration) -> bool;

/// Builds a stage's unit. Errors are a human-readable reason.
pub type BuildFn = fn(&Configuration, &Dependencies) -> Result<PipelineUnit, String>;

/// One catalog entry.
#[derive(Clone, Copy)]
pub struct StageDescriptor {
    /// The stage.
    pub stage: Stage,
    /// Whether the configuration asks for the stage.
    pub applies: AppliesFn,
    /// Builds the stage.
    pub build: BuildFn,
}

impl StageDescriptor {
    /// Stage name.
    pub const fn name(&self) -> &'static str {
        self.stage.name()
    }

    /// Stage rank.
    pub const fn rank(&self) -> u8 {
        self.stage.rank()
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

fn always(_config: &Configuration) -> bool {
    true
}

fn audit_applies(config: &Configuration) -> bool {
    config.is_set("log.access")
}

fn metrics_applies(config: &Configuration) -> bool {
    config.is_set("metrics")
}

fn keepalive_applies(config: &Configuration) -> bool {
    config.is_set("keepalive")
}

fn auth_applies(config: &Configuration) -> bool {
    config.is_set("auth")
}

/// The catalog, in rank order.
pub static CATALOG: [StageDescriptor; 6] = [
    StageDescriptor {
        stage: Stage::Tracing,
        applies: always,
        build: stages::tracing::build,
    },
    StageDescriptor {
        stage: Stage::Logging,
        applies: always,
        build: stages::logging::build,
    },
    StageDescriptor {
        stage: Stage::PayloadAudit,
        applies: audit_applies,
        build: stages::audit::build,
    },
    StageDescriptor {
        stage: Stage::Metrics,
        applies: metrics_applies,
        build: stages::metrics::build,
    },
    StageDescriptor {
        stage: Stage::KeepAlive,
        applies: keepalive_applies,
        build: stages::keepalive::build,
    },
    StageDescriptor {
        stage: Stage::Auth,
        applies: auth_applies,
        build: stages::auth::build,
    },
];
