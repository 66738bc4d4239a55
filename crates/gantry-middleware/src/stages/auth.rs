//! Authentication stage.
//!
//! Checks a static bearer credential in the call metadata. A valid token
//! sets the caller identity; anything else ends the call with
//! `UNAUTHENTICATED` before it reaches the handler, and marks the context so
//! outer stages can tell the call was rejected.
//!
//! ```text
//! authorization: Bearer <token>
//! ```

use crate::catalog::PipelineUnit;
use crate::compose::Dependencies;
use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use gantry_config::{AuthSection, Configuration};
use gantry_core::{Call, CallError, CallerIdentity, Reply};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Interceptor that authenticates callers.
pub struct AuthStage {
    header: String,
    scheme: String,
    credentials: HashMap<String, CallerIdentity>,
    exempt: HashSet<String>,
}

impl AuthStage {
    /// Creates the stage from the `[auth]` section.
    #[must_use]
    pub fn new(section: AuthSection) -> Self {
        let credentials = section
            .credentials
            .into_iter()
            .map(|c| (c.token, CallerIdentity::user(c.subject, c.roles)))
            .collect();
        Self {
            header: section.header.to_ascii_lowercase(),
            scheme: section.scheme,
            credentials,
            exempt: section.exempt_methods.into_iter().collect(),
        }
    }

    fn authenticate(&self, call: &Call) -> Result<CallerIdentity, CallError> {
        let value = call
            .header(&self.header)
            .ok_or_else(|| CallError::unauthenticated("missing credentials"))?;

        let (scheme, token) = value
            .split_once(' ')
            .ok_or_else(|| CallError::unauthenticated("malformed credentials"))?;
        if !scheme.eq_ignore_ascii_case(&self.scheme) {
            return Err(CallError::unauthenticated(format!(
                "unsupported credential scheme '{scheme}'"
            )));
        }

        self.credentials
            .get(token.trim())
            .cloned()
            .ok_or_else(|| CallError::unauthenticated("invalid credentials"))
    }
}

impl fmt::Debug for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthStage")
            .field("header", &self.header)
            .field("scheme", &self.scheme)
            .field("credentials", &self.credentials.len())
            .field("exempt", &self.exempt)
            .finish()
    }
}

pub(crate) fn build(config: &Configuration, _deps: &Dependencies) -> Result<PipelineUnit, String> {
    let section = config
        .section::<AuthSection>()
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "auth section is missing".to_string())?;
    Ok(PipelineUnit::Interceptor(Arc::new(AuthStage::new(section))))
}

impl Middleware for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        call: Call,
        next: Next<'a>,
    ) -> BoxFuture<'a, Reply> {
        Box::pin(async move {
            if self.exempt.contains(call.method()) {
                return next.run(ctx, call).await;
            }

            match self.authenticate(&call) {
                Ok(identity) => {
                    ctx.set_identity(identity);
                    next.run(ctx, call).await
                }
                Err(err) => {
                    tracing::debug!(
                        method = call.method(),
                        request_id = %ctx.request_id(),
                        reason = err.message(),
                        "call rejected"
                    );
                    ctx.mark_rejected(self.name());
                    err.into()
                }
            }
        })
    }
}
