//! Typed configuration sections.
//!
//! Each optional pipeline stage and each optional resource reads its own
//! section. Sections reject unknown keys so that a typo surfaces as a startup
//! error instead of a silently skipped feature.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A typed section at a fixed path.
pub trait Section: DeserializeOwned {
    /// Dotted path of the section.
    const PATH: &'static str;

    /// Checks invariants serde cannot express.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// `[metrics]`: request counters and latency histograms.
///
/// ```toml
/// [metrics]
/// namespace = "greeter"
/// buckets = [0.005, 0.05, 0.5, 5.0]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Prefix for every metric name.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Latency histogram buckets in seconds. Summaries are rendered when unset.
    #[serde(default)]
    pub buckets: Option<Vec<f64>>,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            buckets: None,
        }
    }
}

impl Section for MetricsSection {
    const PATH: &'static str = "metrics";

    fn validate(&self) -> Result<(), String> {
        if self.namespace.is_empty()
            || !self
                .namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(format!("invalid namespace '{}'", self.namespace));
        }
        if let Some(buckets) = &self.buckets {
            if buckets.is_empty() {
                return Err("buckets must not be empty".to_string());
            }
            if buckets.windows(2).any(|w| w[0] >= w[1]) {
                return Err("buckets must be strictly ascending".to_string());
            }
        }
        Ok(())
    }
}

fn default_namespace() -> String {
    "gantry".to_string()
}

/// `[keepalive]`: connection keep-alive policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct KeepAliveSection {
    /// Keep idle connections open between calls.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Close a connection that has been idle this long.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// Gracefully close a connection once it reaches this age.
    #[serde(default)]
    pub max_connection_age_secs: Option<u64>,
}

impl Default for KeepAliveSection {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_timeout_secs: None,
            max_connection_age_secs: None,
        }
    }
}

impl Section for KeepAliveSection {
    const PATH: &'static str = "keepalive";

    fn validate(&self) -> Result<(), String> {
        if self.idle_timeout_secs == Some(0) {
            return Err("idle_timeout_secs must be greater than zero".to_string());
        }
        if self.max_connection_age_secs == Some(0) {
            return Err("max_connection_age_secs must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// `[auth]`: static bearer credentials.
///
/// ```toml
/// [auth]
/// exempt_methods = ["/grpc.health.v1.Health/Check"]
///
/// [[auth.credentials]]
/// token = "s3cr3t"
/// subject = "billing"
/// roles = ["reader"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthSection {
    /// Metadata key carrying the credential.
    #[serde(default = "default_auth_header")]
    pub header: String,

    /// Credential scheme expected before the token.
    #[serde(default = "default_auth_scheme")]
    pub scheme: String,

    /// Accepted credentials.
    #[serde(default)]
    pub credentials: Vec<Credential>,

    /// Methods callable without credentials.
    #[serde(default)]
    pub exempt_methods: Vec<String>,
}

impl Section for AuthSection {
    const PATH: &'static str = "auth";

    fn validate(&self) -> Result<(), String> {
        if self.credentials.is_empty() {
            return Err("at least one credential is required".to_string());
        }
        if let Some(c) = self.credentials.iter().find(|c| c.token.is_empty()) {
            return Err(format!("credential for '{}' has an empty token", c.subject));
        }
        if http_header_name_is_invalid(&self.header) {
            return Err(format!("invalid header name '{}'", self.header));
        }
        Ok(())
    }
}

fn http_header_name_is_invalid(name: &str) -> bool {
    name.is_empty()
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn default_auth_header() -> String {
    "authorization".to_string()
}

fn default_auth_scheme() -> String {
    "Bearer".to_string()
}

/// One accepted credential.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Credential {
    /// The secret presented by the caller.
    pub token: String,
    /// Subject the credential was issued to.
    pub subject: String,
    /// Roles granted to the subject.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("subject", &self.subject)
            .field("roles", &self.roles)
            .finish()
    }
}

/// `[log.access]`: payload audit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AccessLogSection {
    /// File the audit records are appended to.
    pub path: PathBuf,

    /// Only these methods are audited. Every method is audited when unset.
    #[serde(default)]
    pub methods: Option<Vec<String>>,

    /// Payloads longer than this are truncated in the record.
    #[serde(default)]
    pub max_payload_bytes: Option<usize>,
}

impl Section for AccessLogSection {
    const PATH: &'static str = "log.access";

    fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("path must not be empty".to_string());
        }
        Ok(())
    }
}

/// `[tracing]`: the tracing client.
///
/// When the section is absent the tracer is a no-op that still assigns trace
/// and span IDs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TracingSection {
    /// Export spans.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// OTLP collector endpoint (e.g., `http://localhost:4317`).
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Sampling ratio (0.0 to 1.0).
    #[serde(default = "default_sample_ratio")]
    pub sample_ratio: f64,

    /// Deployment environment attached to every span.
    #[serde(default)]
    pub environment: Option<String>,
}

impl Default for TracingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: None,
            sample_ratio: default_sample_ratio(),
            environment: None,
        }
    }
}

impl Section for TracingSection {
    const PATH: &'static str = "tracing";

    fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.sample_ratio) {
            return Err(format!(
                "sample_ratio must be between 0.0 and 1.0, got {}",
                self.sample_ratio
            ));
        }
        Ok(())
    }
}

fn default_sample_ratio() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}
