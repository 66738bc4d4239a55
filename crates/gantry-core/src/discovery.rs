//! Discovery directory seam.
//!
//! Once the listener is live the lifecycle coordinator publishes a
//! [`RegistrationRecord`] through a [`Registry`]. Registration is best-effort:
//! a failing registry never stops the service.

use crate::handler::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Error reported by a discovery directory.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct RegistryError(pub String);

/// What gets published for a running service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// Service name in the directory.
    pub name: String,
    /// Address other services should dial.
    pub address: String,
    /// Directory endpoint the record was published to.
    pub endpoint: String,
}

/// A discovery directory.
pub trait Registry: Send + Sync + 'static {
    /// Directory endpoint, for the registration record and for logs.
    fn endpoint(&self) -> String;

    /// Publishes `record`.
    fn register<'a>(
        &'a self,
        record: &'a RegistrationRecord,
    ) -> BoxFuture<'a, Result<(), RegistryError>>;

    /// Withdraws the record published under `name`.
    fn deregister<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), RegistryError>>;
}

/// A registry that accepts everything and remembers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistry;

impl Registry for NoopRegistry {
    fn endpoint(&self) -> String {
        "noop".to_string()
    }

    fn register<'a>(
        &'a self,
        _record: &'a RegistrationRecord,
    ) -> BoxFuture<'a, Result<(), RegistryError>> {
        Box::pin(async { Ok(()) })
    }

    fn deregister<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<(), RegistryError>> {
        Box::pin(async { Ok(()) })
    }
}

/// An in-process registry.
///
/// Useful for tests and for single-process deployments; can be switched into
/// a failing mode to exercise the best-effort paths.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    records: Mutex<BTreeMap<String, RegistrationRecord>>,
    unavailable: AtomicBool,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that rejects every request.
    #[must_use]
    pub fn unavailable() -> Self {
        let registry = Self::default();
        registry.set_unavailable(true);
        registry
    }

    /// Toggles failing mode.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Looks up a published record.
    pub fn lookup(&self, name: &str) -> Option<RegistrationRecord> {
        self.records.lock().get(name).cloned()
    }

    /// Number of published records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing is published.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn check(&self) -> Result<(), RegistryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RegistryError("directory unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Registry for MemoryRegistry {
    fn endpoint(&self) -> String {
        "memory".to_string()
    }

    fn register<'a>(
        &'a self,
        record: &'a RegistrationRecord,
    ) -> BoxFuture<'a, Result<(), RegistryError>> {
        Box::pin(async move {
            self.check()?;
            self.records.lock().insert(record.name.clone(), record.clone());
            Ok(())
        })
    }

    fn deregister<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), RegistryError>> {
        Box::pin(async move {
            self.check()?;
            self.records.lock().remove(name);
            Ok(())
        })
    }
}
