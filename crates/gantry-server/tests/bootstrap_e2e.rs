//! End-to-end bootstrap tests.
//!
//! Each test starts a real service on an ephemeral port, talks to it over
//! HTTP and shuts it down, checking lifecycle states, released resources and
//! what the pipeline recorded along the way.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gantry_config::{Configuration, TracingSection};
use gantry_core::{
    BootstrapError, BoxFuture, Call, CallError, DatabaseHandle, InMemoryConnector, MemoryRegistry,
    RequestContext, ResourceKind, RpcHandler,
};
use gantry_middleware::stages::logging::CALL_RECORD_MESSAGE;
use gantry_server::{Bootstrap, LifecycleState, RunningService, RPC_STATUS_HEADER};
use gantry_telemetry::logging::fields;
use gantry_telemetry::{
    Logger, MemorySink, TelemetryError, TelemetryResult, TracerClient, TracerFactory,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

const METHOD: &str = "/helloworld.Greeter/SayHello";

#[derive(Default)]
struct Greeter {
    calls: Arc<AtomicUsize>,
    database: Option<DatabaseHandle>,
    delay: Option<Duration>,
    entered: Option<Arc<Notify>>,
}

impl RpcHandler for Greeter {
    fn call<'a>(
        &'a self,
        ctx: &'a RequestContext,
        call: Call,
    ) -> BoxFuture<'a, Result<Bytes, CallError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(entered) = &self.entered {
                entered.notify_one();
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let name = String::from_utf8_lossy(call.payload()).to_string();
            if name.is_empty() {
                return Err(CallError::invalid_argument("name is required"));
            }
            let suffix = if self.database.is_some() { " (db)" } else { "" };
            Ok(Bytes::from(format!(
                "hello {name} from {}{suffix}",
                ctx.identity().log_id()
            )))
        })
    }

    fn attach_database(&mut self, database: DatabaseHandle) {
        self.database = Some(database);
    }
}

struct FailingTracer;

impl TracerFactory for FailingTracer {
    fn create(&self, _: Option<&TracingSection>, _: &str) -> TelemetryResult<TracerClient> {
        Err(TelemetryError::TracingInit("collector unreachable".into()))
    }
}

fn config(value: Value) -> Configuration {
    Configuration::from_value(value).unwrap()
}

fn minimal() -> Value {
    json!({"appname": "x", "listen": "127.0.0.1:0", "shutdownTimeout": 5})
}

fn with_db() -> Value {
    let mut doc = minimal();
    doc["db"] = json!({"default": {"dialect": "memory"}});
    doc
}

async fn say_hello(running: &RunningService, name: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{}{METHOD}", running.local_addr()))
        .body(name.to_string())
        .send()
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_minimal_service_serves_traced_and_logged_calls() {
    let records = Arc::new(MemorySink::new());
    let running = Bootstrap::new(config(minimal()), Greeter::default())
        .logger(Logger::new("x").with_sink(records.clone()))
        .start()
        .await
        .unwrap();

    assert_eq!(running.stage_names(), &["tracing", "logging"]);
    assert!(running.state().is_serving());

    let response = say_hello(&running, "ada").await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()[RPC_STATUS_HEADER], "OK");
    let traceparent = response.headers()["traceparent"].to_str().unwrap().to_string();
    assert_eq!(response.text().await.unwrap(), "hello ada from anonymous");

    let logged = records.find(CALL_RECORD_MESSAGE);
    assert_eq!(logged.len(), 1);
    let trace_id = logged[0].field(fields::TRACE_ID).unwrap().as_str().unwrap();
    assert!(traceparent.contains(trace_id));
    assert_eq!(logged[0].field(fields::RPC_CODE).unwrap(), "OK");

    let report = running.shutdown().await.unwrap();
    assert_eq!(report.released(), &[ResourceKind::Tracer]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_without_db_no_database_is_opened_or_released() {
    let connector = Arc::new(InMemoryConnector::new());
    let running = Bootstrap::new(config(minimal()), Greeter::default())
        .database_connector(connector.clone())
        .start()
        .await
        .unwrap();

    assert_eq!(running.resources(), vec![ResourceKind::Tracer]);
    let report = running.shutdown().await.unwrap();

    assert!(connector.opened().is_empty());
    assert!(!report.released().contains(&ResourceKind::Database));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_access_log_audits_request_and_response() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("access.log");
    let mut doc = minimal();
    doc["log"] = json!({"access": {"path": path}});

    let running = Bootstrap::new(config(doc), Greeter::default())
        .start()
        .await
        .unwrap();
    assert_eq!(running.stage_names(), &["tracing", "logging", "payload_audit"]);

    let response = say_hello(&running, "ada").await;
    assert_eq!(response.status(), 200);

    let report = running.shutdown().await.unwrap();
    assert_eq!(report.released(), &[ResourceKind::Logger, ResourceKind::Tracer]);

    let lines: Vec<Value> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["method"], METHOD);
    assert_eq!(lines[0]["request"], "ada");
    assert_eq!(lines[0]["response"], "hello ada from anonymous");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_credential_never_reaches_handler() {
    let mut doc = minimal();
    doc["auth"] = json!({
        "credentials": [{"token": "s3cret", "subject": "billing", "roles": ["reader"]}],
    });
    let records = Arc::new(MemorySink::new());
    let greeter = Greeter::default();
    let calls = greeter.calls.clone();

    let running = Bootstrap::new(config(doc), greeter)
        .logger(Logger::new("x").with_sink(records.clone()))
        .start()
        .await
        .unwrap();
    assert_eq!(running.stage_names(), &["tracing", "logging", "auth"]);

    let client = reqwest::Client::new();
    let url = format!("http://{}{METHOD}", running.local_addr());

    let response = client
        .post(&url)
        .header("authorization", "Bearer wrong")
        .body("ada")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(response.headers()[RPC_STATUS_HEADER], "UNAUTHENTICATED");
    assert!(response.headers().contains_key("traceparent"));
    let envelope: Value = response.json().await.unwrap();
    assert_eq!(envelope["error"]["code"], "UNAUTHENTICATED");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let logged = records.find(CALL_RECORD_MESSAGE);
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].field(fields::RPC_CODE).unwrap(), "UNAUTHENTICATED");

    let response = client
        .post(&url)
        .header("authorization", "Bearer s3cret")
        .body("ada")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hello ada from user:billing");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    running.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_registration_failure_keeps_serving() {
    let registry = Arc::new(MemoryRegistry::unavailable());
    let running = Bootstrap::new(config(minimal()), Greeter::default())
        .registry(registry.clone())
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(running.state(), LifecycleState::Listening);

    let response = say_hello(&running, "ada").await;
    assert_eq!(response.status(), 200);

    running.shutdown().await.unwrap();
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_registration_is_published_and_withdrawn() {
    let registry = Arc::new(MemoryRegistry::new());
    let mut doc = minimal();
    doc["registryListen"] = json!("10.0.0.5:9090");

    let running = Bootstrap::new(config(doc), Greeter::default())
        .registry(registry.clone())
        .start()
        .await
        .unwrap();

    let mut states = running.state_watch();
    tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|s| *s == LifecycleState::Registered),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(registry.lookup("x").unwrap().address, "10.0.0.5:9090");

    running.shutdown().await.unwrap();
    assert!(registry.lookup("x").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_tracer_releases_database_once() {
    let connector = Arc::new(InMemoryConnector::new());
    let bootstrap = Bootstrap::new(config(with_db()), Greeter::default())
        .database_connector(connector.clone())
        .tracer_factory(Arc::new(FailingTracer));
    let states = bootstrap.state_watch();

    let err = bootstrap.start().await.unwrap_err();

    assert!(matches!(
        err,
        BootstrapError::AcquisitionFailed {
            kind: ResourceKind::Tracer,
            ..
        }
    ));
    assert_eq!(*states.borrow(), LifecycleState::Failed);
    let db = &connector.opened()[0];
    assert!(db.is_closed());
    assert_eq!(db.close_calls(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bind_failure_releases_everything() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut doc = with_db();
    doc["listen"] = json!(taken.local_addr().unwrap().to_string());
    let connector = Arc::new(InMemoryConnector::new());

    let err = Bootstrap::new(config(doc), Greeter::default())
        .database_connector(connector.clone())
        .start()
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::BindFailed { .. }));
    assert_eq!(connector.opened()[0].close_calls(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_stage_section_names_stage() {
    let mut doc = minimal();
    doc["auth"] = json!({"credentials": []});

    let err = Bootstrap::new(config(doc), Greeter::default())
        .start()
        .await
        .unwrap_err();
    assert_eq!(err.failed_stage(), Some("auth"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_metrics_endpoint_renders_call_counters() {
    let mut doc = minimal();
    doc["metrics"] = json!({"namespace": "greeter"});

    let running = Bootstrap::new(config(doc), Greeter::default())
        .start()
        .await
        .unwrap();
    assert_eq!(running.stage_names(), &["tracing", "logging", "metrics"]);

    assert_eq!(say_hello(&running, "ada").await.status(), 200);
    assert_eq!(say_hello(&running, "").await.status(), 400);

    let body = reqwest::get(format!("http://{}/metrics", running.local_addr()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("greeter_server_handled_total"));
    assert!(body.contains("code=\"INVALID_ARGUMENT\""));

    running.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_stops_accepting_then_drains_then_releases() {
    let connector = Arc::new(InMemoryConnector::new());
    let entered = Arc::new(Notify::new());
    let greeter = Greeter {
        delay: Some(Duration::from_millis(400)),
        entered: Some(entered.clone()),
        ..Greeter::default()
    };

    let running = Bootstrap::new(config(with_db()), greeter)
        .database_connector(connector.clone())
        .start()
        .await
        .unwrap();
    let addr = running.local_addr();
    assert_eq!(
        running.resources(),
        vec![ResourceKind::Database, ResourceKind::Tracer]
    );

    let in_flight = tokio::spawn(async move {
        reqwest::Client::new()
            .post(format!("http://{addr}{METHOD}"))
            .body("ada")
            .send()
            .await
            .unwrap()
    });
    entered.notified().await;

    let mut states = running.state_watch();
    let shutdown = tokio::spawn(running.shutdown());
    states
        .wait_for(|s| *s == LifecycleState::ShuttingDown)
        .await
        .unwrap();

    let mut refused = false;
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(addr).await.is_err() {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(refused, "listener should close before in-flight calls finish");
    assert!(!connector.opened()[0].is_closed());

    let response = in_flight.await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hello ada from anonymous (db)");

    let report = shutdown.await.unwrap().unwrap();
    assert_eq!(
        report.released(),
        &[ResourceKind::Tracer, ResourceKind::Database]
    );
    assert!(connector.opened()[0].is_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timed_out_call_is_traced_and_logged() {
    let mut doc = minimal();
    doc["requestTimeout"] = json!(1);
    let records = Arc::new(MemorySink::new());
    let greeter = Greeter {
        delay: Some(Duration::from_secs(3)),
        ..Greeter::default()
    };

    let running = Bootstrap::new(config(doc), greeter)
        .logger(Logger::new("x").with_sink(records.clone()))
        .start()
        .await
        .unwrap();

    let response = say_hello(&running, "ada").await;
    assert_eq!(response.status(), 504);
    assert_eq!(response.headers()[RPC_STATUS_HEADER], "DEADLINE_EXCEEDED");
    assert!(response.headers().contains_key("traceparent"));

    let logged = records.find(CALL_RECORD_MESSAGE);
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].field(fields::RPC_CODE).unwrap(), "DEADLINE_EXCEEDED");

    running.shutdown().await.unwrap();
}
