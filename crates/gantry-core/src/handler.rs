//! The service implementation seam.

use crate::call::Call;
use crate::context::RequestContext;
use crate::database::DatabaseHandle;
use crate::error::CallError;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;

/// A boxed future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The service implementation driven by the server.
///
/// The lifecycle coordinator hands the handler its database (when one is
/// configured) through [`attach_database`](RpcHandler::attach_database)
/// before the first call is accepted. After that the handler is shared
/// across connections behind an `Arc`.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use gantry_core::{BoxFuture, Call, CallError, RequestContext, RpcHandler};
///
/// struct Echo;
///
/// impl RpcHandler for Echo {
///     fn call<'a>(
///         &'a self,
///         _ctx: &'a RequestContext,
///         call: Call,
///     ) -> BoxFuture<'a, Result<Bytes, CallError>> {
///         Box::pin(async move { Ok(call.into_payload()) })
///     }
/// }
/// ```
pub trait RpcHandler: Send + Sync + 'static {
    /// Handles one unary call.
    fn call<'a>(
        &'a self,
        ctx: &'a RequestContext,
        call: Call,
    ) -> BoxFuture<'a, Result<Bytes, CallError>>;

    /// Receives the database handle acquired during startup.
    fn attach_database(&mut self, _database: DatabaseHandle) {}
}

/// Adapts an async closure into an [`RpcHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(RequestContext, Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, CallError>> + Send + 'static,
{
    /// Wraps `f`.
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> RpcHandler for FnHandler<F>
where
    F: Fn(RequestContext, Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, CallError>> + Send + 'static,
{
    fn call<'a>(
        &'a self,
        ctx: &'a RequestContext,
        call: Call,
    ) -> BoxFuture<'a, Result<Bytes, CallError>> {
        Box::pin((self.f)(ctx.clone(), call))
    }
}
