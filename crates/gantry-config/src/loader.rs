//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for building a [`Configuration`]
//! from multiple sources: defaults, files, and environment variables.

use std::env;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::config::parse_bool;
use crate::{ConfigError, Configuration};

/// Configuration loader with layered approach.
///
/// Layers are applied in order, with later layers overriding earlier ones:
/// 1. Defaults (`debug = false`)
/// 2. Configuration files (TOML or JSON), deep-merged
/// 3. Environment variables (`PREFIX__SECTION__KEY`)
///
/// # Example
///
/// ```no_run
/// use gantry_config::ConfigLoader;
///
/// # fn main() -> Result<(), gantry_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("greeter.toml")?
///     .with_env_prefix("GANTRY")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: Configuration,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new, empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the document with default values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        let mut defaults = Map::new();
        defaults.insert("debug".to_string(), Value::Bool(false));
        let mut config = Configuration::empty();
        config.merge(defaults);
        config.merge(self.config.as_map().clone());
        self.config = config;
        self
    }

    /// Merge a configuration file. The format follows the extension.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file does not exist, cannot be read, or
    /// does not parse.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        let layer = Self::parse_file(&content, path)?;
        self.config.merge(layer);

        Ok(self)
    }

    /// Merge a configuration file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merge configuration from a string.
    ///
    /// # Example
    ///
    /// ```
    /// use gantry_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(r#"appname = "greeter""#, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.get_str("appname"), Some("greeter"));
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let layer = parse_document(content, &format.to_lowercase())?;
        self.config.merge(layer);
        Ok(self)
    }

    /// Merge an already-parsed JSON value.
    pub fn with_value(mut self, value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(layer) => {
                self.config.merge(layer);
                Ok(self)
            }
            _ => Err(ConfigError::NotATable),
        }
    }

    /// Set environment variable prefix for overrides.
    ///
    /// With prefix `GANTRY`:
    /// - `GANTRY__LISTEN=:9191`
    /// - `GANTRY__LOG__ACCESS__PATH=/var/log/access.log`
    /// - `GANTRY__REGISTRYLISTEN=10.0.0.5:9090` (matches `registryListen`)
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if one exists.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(ConfigError::env_parse_error(".env", e.to_string())),
        }
    }

    /// Apply overrides from explicit `(name, value)` pairs, as if they came
    /// from the environment.
    pub fn with_overrides<I, K, V>(mut self, prefix: &str, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let prefix = prefix.to_uppercase();
        for (key, value) in vars {
            if key.as_ref().starts_with(&prefix) {
                self.apply_env_var(key.as_ref(), value.as_ref(), &prefix)?;
            }
        }
        Ok(self)
    }

    /// Finalize and return the document.
    ///
    /// Applies environment variable overrides when a prefix was set.
    pub fn load(mut self) -> Result<Configuration, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: Vec<(String, String)> = env::vars().collect();
            self = self.with_overrides(&prefix, vars)?;
        }
        Ok(self.config)
    }

    fn parse_file(content: &str, path: &Path) -> Result<Map<String, Value>, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some(format @ ("toml" | "json")) => parse_document(content, format),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;

        let segments: Vec<String> = key_without_prefix
            .split("__")
            .map(str::to_string)
            .collect();
        if segments.iter().any(String::is_empty) {
            return Err(ConfigError::env_parse_error(key, "empty path segment"));
        }

        let parsed = match self.config.get_path(&segments) {
            Some(existing) => coerce_like(existing, value)
                .ok_or_else(|| ConfigError::env_parse_error(key, expected_kind(existing)))?,
            None => infer_value(value),
        };
        self.config.set_path(&segments, parsed)
    }
}

fn parse_document(content: &str, format: &str) -> Result<Map<String, Value>, ConfigError> {
    let value: Value = match format {
        "toml" => toml::from_str(content)?,
        "json" => serde_json::from_str(content)?,
        other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
    };
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ConfigError::NotATable),
    }
}

// Keep the type of a value the document already has.
fn coerce_like(existing: &Value, raw: &str) -> Option<Value> {
    match existing {
        Value::String(_) | Value::Null => Some(Value::String(raw.to_string())),
        Value::Bool(_) => parse_bool(raw).map(Value::Bool),
        Value::Number(_) => raw
            .parse::<i64>()
            .map(Value::from)
            .ok()
            .or_else(|| raw.parse::<f64>().ok().map(Value::from)),
        Value::Array(_) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_array),
        Value::Object(_) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_object),
    }
}

fn expected_kind(existing: &Value) -> &'static str {
    match existing {
        Value::Bool(_) => "expected boolean",
        Value::Number(_) => "expected number",
        Value::Array(_) => "expected JSON array",
        Value::Object(_) => "expected JSON object",
        Value::String(_) | Value::Null => "expected string",
    }
}

fn infer_value(raw: &str) -> Value {
    if let Some(b) = parse_bool_strict(raw) {
        return Value::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(raw.to_string())
}

// "1"/"0" stay numbers when nothing says the key is a boolean.
fn parse_bool_strict(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_loader_new_is_empty() {
        let config = ConfigLoader::new().load().unwrap();
        assert!(config.as_map().is_empty());
    }

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().with_defaults().load().unwrap();
        assert_eq!(config.get_bool("debug").unwrap(), Some(false));
    }

    #[test]
    fn test_defaults_do_not_override_earlier_layers() {
        let config = ConfigLoader::new()
            .with_string("debug = true", "toml")
            .unwrap()
            .with_defaults()
            .load()
            .unwrap();
        assert_eq!(config.get_bool("debug").unwrap(), Some(true));
    }

    #[test]
    fn test_loader_with_string_toml() {
        let toml = r#"
            appname = "greeter"
            listen = ":9090"

            [db.default]
            dialect = "memory"
        "#;

        let config = ConfigLoader::new()
            .with_string(toml, "toml")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.get_str("appname"), Some("greeter"));
        assert_eq!(config.get_str("db.default.dialect"), Some("memory"));
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"appname": "greeter", "log": {"access": {"path": "/tmp/a.log"}}}"#;

        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();

        assert!(config.is_set("log.access"));
    }

    #[test]
    fn test_loader_rejects_unknown_format() {
        let err = ConfigLoader::new().with_string("a: 1", "yaml").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_loader_with_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "appname = \"from-file\"\nlisten = \":7000\"").unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.settings().unwrap().appname, "from-file");
    }

    #[test]
    fn test_loader_with_file_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = ConfigLoader::new().with_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/greeter.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/greeter.toml")
            .unwrap()
            .load()
            .unwrap();
        assert!(config.as_map().is_empty());
    }

    #[test]
    fn test_later_layers_win() {
        let config = ConfigLoader::new()
            .with_string(r#"listen = ":1""#, "toml")
            .unwrap()
            .with_string(r#"{"listen": ":2"}"#, "json")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.get_str("listen"), Some(":2"));
    }

    #[test]
    fn test_apply_env_var_top_level() {
        let mut loader = ConfigLoader::new()
            .with_string(r#"listen = ":9090""#, "toml")
            .unwrap();
        loader.apply_env_var("TEST__LISTEN", ":9191", "TEST").unwrap();
        assert_eq!(loader.config.get_str("listen"), Some(":9191"));
    }

    #[test]
    fn test_apply_env_var_camel_case_key() {
        let mut loader = ConfigLoader::new()
            .with_string(r#"registryListen = "a:1""#, "toml")
            .unwrap();
        loader
            .apply_env_var("TEST__REGISTRYLISTEN", "b:2", "TEST")
            .unwrap();
        assert_eq!(loader.config.get_str("registryListen"), Some("b:2"));
    }

    #[test]
    fn test_apply_env_var_nested_section() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__LOG__ACCESS__PATH", "/tmp/access.log", "TEST")
            .unwrap();
        assert!(loader.config.is_set("log.access"));
        assert_eq!(loader.config.get_str("log.access.path"), Some("/tmp/access.log"));
    }

    #[test]
    fn test_apply_env_var_keeps_existing_type() {
        let mut loader = ConfigLoader::new().with_defaults();
        loader.apply_env_var("TEST__DEBUG", "on", "TEST").unwrap();
        assert_eq!(loader.config.get_bool("debug").unwrap(), Some(true));

        let err = loader.apply_env_var("TEST__DEBUG", "maybe", "TEST").unwrap_err();
        assert!(matches!(err, ConfigError::EnvParseError { .. }));
    }

    #[test]
    fn test_apply_env_var_string_stays_string() {
        let mut loader = ConfigLoader::new()
            .with_string(r#"appname = "x""#, "toml")
            .unwrap();
        loader.apply_env_var("TEST__APPNAME", "123", "TEST").unwrap();
        assert_eq!(loader.config.get_str("appname"), Some("123"));
    }

    #[test]
    fn test_apply_env_var_inferred_types() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__SHUTDOWNTIMEOUT", "5", "TEST").unwrap();
        loader.apply_env_var("TEST__METRICS__ENABLED", "true", "TEST").unwrap();
        assert_eq!(loader.config.get_u64("shutdowntimeout").unwrap(), Some(5));
        assert_eq!(loader.config.get_bool("metrics.enabled").unwrap(), Some(true));
    }

    #[test]
    fn test_apply_env_var_invalid_key() {
        let mut loader = ConfigLoader::new();
        assert!(loader.apply_env_var("TESTLISTEN", "x", "TEST").is_err());
        assert!(loader.apply_env_var("TEST__A____B", "x", "TEST").is_err());
    }

    #[test]
    fn test_with_overrides_filters_prefix() {
        let config = ConfigLoader::new()
            .with_overrides(
                "gantry",
                [("GANTRY__APPNAME", "svc"), ("OTHER__LISTEN", ":1")],
            )
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.get_str("appname"), Some("svc"));
        assert!(!config.is_set("listen"));
    }
}
