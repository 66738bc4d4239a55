//! Core interceptor trait and types.
//!
//! This module defines the [`Middleware`] trait that every interceptor stage
//! implements. An interceptor sees the call on the way in, decides whether to
//! pass it on, and sees the reply on the way out.
//!
//! # Example
//!
//! ```ignore
//! use gantry_middleware::{BoxFuture, Middleware, MiddlewareContext, Next};
//! use gantry_core::{Call, Reply};
//!
//! struct Timing;
//!
//! impl Middleware for Timing {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut MiddlewareContext,
//!         call: Call,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, Reply> {
//!         Box::pin(async move {
//!             let reply = next.run(ctx, call).await;
//!             println!("{} took {:?}", ctx.method(), ctx.elapsed());
//!             reply
//!         })
//!     }
//! }
//! ```

use crate::context::MiddlewareContext;
use gantry_core::{Call, Reply};
use std::future::Future;

pub use gantry_core::BoxFuture;

/// The core interceptor trait.
///
/// # Invariants
///
/// - An interceptor calls `next.run()` at most once
/// - An interceptor that does not call `next.run()` short-circuits the call
///   and must return its own reply
pub trait Middleware: Send + Sync + 'static {
    /// Stage name, used in logs and in the composed stage list.
    fn name(&self) -> &'static str;

    /// Processes one call.
    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        call: Call,
        next: Next<'a>,
    ) -> BoxFuture<'a, Reply>;
}

/// Callback to invoke the next interceptor in the chain.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(Box<dyn FnOnce(&mut MiddlewareContext, Call) -> BoxFuture<'static, Reply> + Send + 'a>),
}

impl<'a> Next<'a> {
    pub(crate) fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    pub(crate) fn handler<F>(f: F) -> Self
    where
        F: FnOnce(&mut MiddlewareContext, Call) -> BoxFuture<'static, Reply> + Send + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(f)),
        }
    }

    /// Invokes the next interceptor, or the handler at the end of the chain.
    pub async fn run(self, ctx: &mut MiddlewareContext, call: Call) -> Reply {
        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(ctx, call, *next).await,
            NextInner::Handler(handler) => {
                ctx.admit();
                handler(ctx, call).await
            }
        }
    }
}

/// Wraps an async block producing a reply as a terminal handler future.
pub(crate) fn terminal<Fut>(fut: Fut) -> BoxFuture<'static, Reply>
where
    Fut: Future<Output = Reply> + Send + 'static,
{
    Box::pin(fut)
}
