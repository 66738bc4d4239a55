//! The configuration document.

use crate::error::ConfigError;
use crate::schema::Section;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::Duration;

const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// An immutable, hierarchical configuration document.
///
/// Values are addressed by dotted paths (`log.access`, `db.default`). A path
/// whose value is absent or `null` is *not set*; pipeline stages treat that
/// as "skip", never as an error.
///
/// # Example
///
/// ```
/// use gantry_config::Configuration;
///
/// let config = Configuration::from_toml(r#"
///     appname = "greeter"
///     listen = ":9090"
///
///     [log.access]
///     path = "/var/log/greeter/access.log"
/// "#).unwrap();
///
/// assert!(config.is_set("log.access"));
/// assert!(!config.is_set("db"));
/// assert_eq!(config.get_str("log.access.path"), Some("/var/log/greeter/access.log"));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Configuration {
    root: Map<String, Value>,
}

impl Configuration {
    /// An empty document.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wraps a JSON value. The root must be an object.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            _ => Err(ConfigError::NotATable),
        }
    }

    /// Parses a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Self::from_value(toml::from_str(content)?)
    }

    /// Parses a JSON document.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Self::from_value(serde_json::from_str(content)?)
    }

    /// The whole document.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    /// Looks up a dotted path.
    ///
    /// Exact key matches win; otherwise keys are compared ignoring ASCII case.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = lookup(&self.root, first)?;
        for segment in segments {
            current = lookup(current.as_object()?, segment)?;
        }
        Some(current)
    }

    /// Whether `path` holds a non-null value.
    #[must_use]
    pub fn is_set(&self, path: &str) -> bool {
        self.get(path).is_some_and(|v| !v.is_null())
    }

    /// String value at `path`.
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Table at `path`.
    #[must_use]
    pub fn table(&self, path: &str) -> Option<&Map<String, Value>> {
        self.get(path).and_then(Value::as_object)
    }

    /// Boolean value at `path`; strings like `"true"` are accepted.
    pub fn get_bool(&self, path: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => parse_bool(s)
                .map(Some)
                .ok_or_else(|| ConfigError::invalid_value(path, "expected boolean")),
            Some(_) => Err(ConfigError::invalid_value(path, "expected boolean")),
        }
    }

    /// Unsigned integer value at `path`.
    pub fn get_u64(&self, path: &str) -> Result<Option<u64>, ConfigError> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| ConfigError::invalid_value(path, "expected non-negative integer")),
            Some(Value::String(s)) => s
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::invalid_value(path, "expected non-negative integer")),
            Some(_) => Err(ConfigError::invalid_value(path, "expected non-negative integer")),
        }
    }

    /// Decodes the value at `path` into `T`.
    ///
    /// Returns `Ok(None)` when the path is not set.
    pub fn decode<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ConfigError> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|e| ConfigError::invalid_section(path, e.to_string())),
        }
    }

    /// Decodes and validates a typed section.
    pub fn section<T: Section>(&self) -> Result<Option<T>, ConfigError> {
        let Some(section) = self.decode::<T>(T::PATH)? else {
            return Ok(None);
        };
        section
            .validate()
            .map_err(|message| ConfigError::invalid_section(T::PATH, message))?;
        Ok(Some(section))
    }

    /// Reads the top-level service settings.
    pub fn settings(&self) -> Result<ServiceSettings, ConfigError> {
        let appname = self.required_str("appname")?;
        let listen = self.required_str("listen")?;
        let debug = self.get_bool("debug")?.unwrap_or(false);
        let registry_listen = match self.get("registryListen") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(ConfigError::invalid_value("registryListen", "expected string")),
        };
        let shutdown_timeout = Duration::from_secs(
            self.get_u64("shutdownTimeout")?
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        );
        let request_timeout = Duration::from_secs(
            self.get_u64("requestTimeout")?
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        );
        if request_timeout.is_zero() {
            return Err(ConfigError::invalid_value("requestTimeout", "must be greater than zero"));
        }

        Ok(ServiceSettings {
            appname,
            listen,
            debug,
            registry_listen,
            shutdown_timeout,
            request_timeout,
        })
    }

    /// Sets `value` at the path given by `segments`, creating tables on the way.
    ///
    /// Segments are matched case-insensitively against existing keys so that
    /// upper-case environment names can address camelCase keys.
    pub(crate) fn set_path(
        &mut self,
        segments: &[String],
        value: Value,
    ) -> Result<(), ConfigError> {
        let Some((last, parents)) = segments.split_last() else {
            return Ok(());
        };
        let mut table = &mut self.root;
        for (depth, segment) in parents.iter().enumerate() {
            let key = resolve_key(table, segment);
            let entry = table
                .entry(key)
                .or_insert_with(|| Value::Object(Map::new()));
            if entry.is_null() {
                *entry = Value::Object(Map::new());
            }
            table = entry.as_object_mut().ok_or_else(|| {
                ConfigError::invalid_value(segments[..=depth].join("."), "not a table")
            })?;
        }
        let key = resolve_key(table, last);
        table.insert(key, value);
        Ok(())
    }

    /// Value currently stored at `segments`, resolved like [`set_path`](Self::set_path).
    pub(crate) fn get_path(&self, segments: &[String]) -> Option<&Value> {
        let (first, rest) = segments.split_first()?;
        let mut current = lookup(&self.root, first)?;
        for segment in rest {
            current = lookup(current.as_object()?, segment)?;
        }
        Some(current)
    }

    /// Deep-merges `other` into this document; `other` wins on conflicts.
    pub(crate) fn merge(&mut self, other: Map<String, Value>) {
        merge_tables(&mut self.root, other);
    }

    fn required_str(&self, path: &str) -> Result<String, ConfigError> {
        match self.get(path) {
            None | Some(Value::Null) => Err(ConfigError::missing_field(path)),
            Some(Value::String(s)) if s.trim().is_empty() => Err(ConfigError::missing_field(path)),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(ConfigError::invalid_value(path, "expected string")),
        }
    }
}

fn lookup<'a>(table: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    table.get(key).or_else(|| {
        table
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn resolve_key(table: &Map<String, Value>, segment: &str) -> String {
    table
        .keys()
        .find(|k| k.eq_ignore_ascii_case(segment))
        .cloned()
        .unwrap_or_else(|| segment.to_ascii_lowercase())
}

fn merge_tables(base: &mut Map<String, Value>, other: Map<String, Value>) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Parse a boolean from a string.
pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Top-level service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Application name; used as the tracing service name and log name.
    pub appname: String,
    /// Listen address (`:9090`, `127.0.0.1:9090`).
    pub listen: String,
    /// Development mode.
    pub debug: bool,
    /// Address advertised to the discovery directory, when it differs from
    /// the bound address.
    pub registry_listen: Option<String>,
    /// Grace period for draining in-flight calls on shutdown.
    pub shutdown_timeout: Duration,
    /// Upper bound on a single call.
    pub request_timeout: Duration,
}
