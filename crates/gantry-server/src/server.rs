//! The server assembler.
//!
//! [`ServiceInstance::assemble`] binds the listener and fixes the composed
//! pipeline, the handler and the transport options into one runnable value.
//! Nothing is accepted until [`ServiceInstance::run`].
//!
//! # Wire format
//!
//! Each `POST /<package.Service>/<Method>` over HTTP/1.1 is one unary call.
//! The request body is the call payload and request headers become call
//! metadata. Replies carry:
//!
//! - the HTTP status mapped from the reply [`Code`]
//! - an `x-rpc-status` header with the code name
//! - the `x-request-id` the call ran under
//! - the reply payload, or a JSON error envelope for failed calls
//!
//! ```text
//! {"error":{"code":"UNAUTHENTICATED","message":"missing credentials","request_id":"..."}}
//! ```
//!
//! `GET /health` and (with metrics composed) `GET /metrics` are answered
//! outside the pipeline.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gantry_core::{Call, Code, Reply, RequestId, RpcHandler};
use gantry_middleware::context::REQUEST_ID_HEADER;
use gantry_middleware::{ComposedPipeline, MiddlewareContext, Pipeline, TransportOptions};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::{TcpListener, TcpStream};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Reply header carrying the status code name.
pub const RPC_STATUS_HEADER: &str = "x-rpc-status";

/// Response body type.
pub type ResponseBody = Full<Bytes>;

/// HTTP response produced for every request.
pub type HttpResponse = Response<ResponseBody>;

/// A bound, not yet serving, RPC server.
pub struct ServiceInstance {
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown_timeout: Duration,
    inner: Arc<Dispatcher>,
}

/// Per-request state shared by every connection.
struct Dispatcher {
    pipeline: Pipeline,
    handler: Arc<dyn RpcHandler>,
    transport: TransportOptions,
    scrape: Option<PrometheusHandle>,
    stages: Vec<&'static str>,
    request_timeout: Duration,
}

impl ServiceInstance {
    /// Binds the listener and fixes the pipeline and handler.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the address cannot be bound.
    pub async fn assemble(
        composed: ComposedPipeline,
        handler: Arc<dyn RpcHandler>,
        config: &ServerConfig,
    ) -> Result<Self, ServerError> {
        let address = config.bind_address();
        let listener = TcpListener::bind(address.as_str())
            .await
            .map_err(|source| ServerError::Bind {
                address: config.listen().to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            address: config.listen().to_string(),
            source,
        })?;

        let stages = composed.stage_names();
        let (pipeline, transport, scrape) = composed.into_parts();

        tracing::debug!(%local_addr, ?stages, "server assembled");

        Ok(Self {
            listener,
            local_addr,
            shutdown_timeout: config.shutdown_timeout(),
            inner: Arc::new(Dispatcher {
                pipeline,
                handler,
                transport,
                scrape,
                stages,
                request_timeout: config.request_timeout(),
            }),
        })
    }

    /// The bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Names of the composed stages, outermost first.
    #[must_use]
    pub fn stage_names(&self) -> &[&'static str] {
        &self.inner.stages
    }

    /// Connection settings in effect.
    #[must_use]
    pub fn transport(&self) -> TransportOptions {
        self.inner.transport
    }

    /// Serves until `shutdown` fires or the listener fails.
    ///
    /// On shutdown the listener is closed first, then open connections get
    /// the grace period to finish their in-flight calls.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Accept` when the listener fails. Open
    /// connections are still drained before returning.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let Self {
            listener,
            local_addr,
            shutdown_timeout,
            inner,
        } = self;
        let tracker = ConnectionTracker::new();

        tracing::info!(%local_addr, "accepting connections");

        let outcome = loop {
            tokio::select! {
                biased;

                () = shutdown.recv() => {
                    tracing::info!("shutdown requested, closing listener");
                    break Ok(());
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let token = tracker.acquire();
                        let inner = Arc::clone(&inner);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            serve_connection(inner, stream, remote_addr, shutdown).await;
                            drop(token);
                        });
                    }
                    Err(e) if is_connection_error(&e) => {
                        tracing::debug!(error = %e, "connection dropped before accept");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "listener failed");
                        shutdown.trigger();
                        break Err(ServerError::Accept(e));
                    }
                },
            }
        };

        drop(listener);

        let active = tracker.active_connections();
        if active > 0 {
            tracing::info!(active, grace = ?shutdown_timeout, "draining connections");
        }
        if tokio::time::timeout(shutdown_timeout, tracker.wait_for_drain())
            .await
            .is_err()
        {
            tracing::warn!(
                active = tracker.active_connections(),
                "grace period elapsed with connections still open"
            );
        }

        tracing::info!(%local_addr, "server stopped");
        outcome
    }
}

impl std::fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("local_addr", &self.local_addr)
            .field("stages", &self.inner.stages)
            .field("transport", &self.inner.transport)
            .finish_non_exhaustive()
    }
}

fn is_connection_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

async fn serve_connection(
    inner: Arc<Dispatcher>,
    stream: TcpStream,
    remote_addr: SocketAddr,
    shutdown: ShutdownSignal,
) {
    let transport = inner.transport;
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let inner = Arc::clone(&inner);
        async move { Ok::<_, Infallible>(inner.dispatch(req).await) }
    });

    let mut builder = http1::Builder::new();
    builder.keep_alive(transport.keep_alive).timer(TokioTimer::new());
    if let Some(idle) = transport.idle_timeout {
        builder.header_read_timeout(idle);
    }

    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let max_age = async move {
        match transport.max_connection_age {
            Some(age) => tokio::time::sleep(age).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(max_age);

    let mut closing = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(%remote_addr, error = %e, "connection closed with error");
                }
                break;
            }
            () = shutdown.recv(), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
            () = &mut max_age, if !closing => {
                tracing::debug!(%remote_addr, "connection reached max age");
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

impl Dispatcher {
    async fn dispatch(&self, req: Request<Incoming>) -> HttpResponse {
        let (parts, body) = req.into_parts();
        let path = parts.uri.path().to_string();

        match (&parts.method, path.as_str()) {
            (&Method::GET, "/health") => return self.health(),
            (&Method::GET, "/metrics") => return self.metrics(),
            _ => {}
        }

        let request_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(RequestId::parse)
            .unwrap_or_default();

        if parts.method != Method::POST || !is_rpc_path(&path) {
            let reply = Reply::error(
                Code::Unimplemented,
                format!("no method at {} {path}", parts.method),
            );
            return reply_response(reply, request_id);
        }

        let payload = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::debug!(error = %e, method = %path, "failed to read request body");
                let reply = Reply::error(Code::InvalidArgument, "failed to read request body");
                return reply_response(reply, request_id);
            }
        };

        let call = Call::new(path, payload).with_metadata(parts.headers);
        let mut ctx = MiddlewareContext::for_call(&call);
        let request_id = ctx.request_id();

        let reply = self
            .pipeline
            .invoke_with_deadline(&mut ctx, call, &self.handler, self.request_timeout)
            .await;

        reply_response(reply, request_id)
    }

    fn health(&self) -> HttpResponse {
        let body = serde_json::json!({
            "status": "serving",
            "stages": self.stages,
        });
        let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    fn metrics(&self) -> HttpResponse {
        let Some(scrape) = &self.scrape else {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::NOT_FOUND;
            return response;
        };
        let mut response = Response::new(Full::new(Bytes::from(scrape.render())));
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        );
        response
    }
}

/// Whether `path` names a unary method (`/package.Service/Method`).
fn is_rpc_path(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    match rest.split_once('/') {
        Some((service, method)) => {
            !service.is_empty() && !method.is_empty() && !method.contains('/')
        }
        None => false,
    }
}

/// Writes a reply to the wire.
pub fn reply_response(reply: Reply, request_id: RequestId) -> HttpResponse {
    let (code, message, metadata, payload) = reply.into_parts();

    let body = if code.is_ok() {
        payload
    } else {
        let envelope = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": message.unwrap_or_default(),
                "request_id": request_id.to_string(),
            }
        });
        Bytes::from(envelope.to_string())
    };

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = code.http_status();

    let headers = response.headers_mut();
    headers.extend(metadata);
    headers.insert(RPC_STATUS_HEADER, HeaderValue::from_static(code.as_str()));
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    let content_type = if code.is_ok() {
        "application/octet-stream"
    } else {
        "application/json"
    };
    if !code.is_ok() || !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    response
}
