//! # Gantry Core
//!
//! Core types and traits shared by every Gantry crate.
//!
//! - [`Call`] / [`Reply`] - transport-neutral unary call and its reply
//! - [`Code`] - RPC status codes and their HTTP mapping
//! - [`RequestContext`] / [`RequestId`] - per-call context handed to handlers
//! - [`CallerIdentity`] - authenticated caller identity
//! - [`RpcHandler`] - the service implementation driven by the server
//! - [`Database`], [`DatabaseConnector`], [`Registry`] - collaborator seams
//! - [`BootstrapError`] / [`CallError`] - startup and per-call error taxonomy

#![doc(html_root_url = "https://docs.rs/gantry-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod call;
mod context;
pub mod database;
pub mod discovery;
mod error;
mod handler;
mod identity;
mod status;

pub use call::{Call, Reply};
pub use context::{RequestContext, RequestId};
pub use database::{
    Database, DatabaseConnector, DatabaseError, DatabaseHandle, DbLogEntry, DbLogSink,
    InMemoryConnector, InMemoryDatabase,
};
pub use discovery::{MemoryRegistry, NoopRegistry, Registry, RegistrationRecord, RegistryError};
pub use error::{BootstrapError, BootstrapResult, CallError, ResourceKind};
pub use handler::{BoxFuture, FnHandler, RpcHandler};
pub use identity::CallerIdentity;
pub use status::Code;
