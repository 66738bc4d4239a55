//! srv-greeter - demo Gantry service.
//!
//! Answers `POST /helloworld.Greeter/SayHello` with a greeting for the JSON
//! `{"name": ...}` payload.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use gantry::prelude::*;
use gantry_core::InMemoryConnector;

const ENV_PREFIX: &str = "GANTRY";

/// Command-line arguments.
struct Args {
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("srv-greeter {}", env!("CARGO_PKG_VERSION"));
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(2);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"srv-greeter - Gantry demo service

USAGE:
    srv-greeter [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    GANTRY__APPNAME          Service name
    GANTRY__LISTEN           Listen address (e.g. :9090)
    GANTRY__DEBUG            Development mode
    GANTRY__<SECTION>__<KEY> Any other configuration key

EXAMPLES:
    srv-greeter --config greeter.toml
    GANTRY__APPNAME=greeter GANTRY__LISTEN=:9090 srv-greeter
"
    );
}

#[derive(Deserialize)]
struct HelloRequest {
    name: String,
}

#[derive(Serialize)]
struct HelloReply {
    message: String,
}

#[derive(Default)]
struct Greeter {
    database: Option<DatabaseHandle>,
}

impl RpcHandler for Greeter {
    fn call<'a>(
        &'a self,
        ctx: &'a RequestContext,
        call: Call,
    ) -> BoxFuture<'a, Result<Bytes, CallError>> {
        Box::pin(async move {
            if call.method_name() != "SayHello" {
                return Err(CallError::unimplemented(format!(
                    "unknown method {}",
                    call.method()
                )));
            }
            let request: HelloRequest = serde_json::from_slice(call.payload())
                .map_err(|e| CallError::invalid_argument(format!("malformed request: {e}")))?;
            if request.name.trim().is_empty() {
                return Err(CallError::invalid_argument("name is required"));
            }

            tracing::debug!(
                request_id = %ctx.request_id(),
                caller = %ctx.identity().log_id(),
                database = self.database.is_some(),
                "greeting"
            );

            let reply = HelloReply {
                message: format!("Hello, {}", request.name),
            };
            serde_json::to_vec(&reply)
                .map(Bytes::from)
                .map_err(|e| CallError::internal(e.to_string()))
        })
    }

    fn attach_database(&mut self, database: DatabaseHandle) {
        self.database = Some(database);
    }
}

fn load_config(args: &Args) -> anyhow::Result<Configuration> {
    let mut loader = ConfigLoader::new()
        .with_defaults()
        .with_dotenv()
        .context("failed to read .env")?;
    if let Some(path) = &args.config {
        loader = loader
            .with_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
    }
    loader
        .with_env_prefix(ENV_PREFIX)
        .load()
        .context("failed to load configuration")
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let settings = config.settings().context("invalid service settings")?;

    init_logging(&LogConfig::for_service(&settings.appname, settings.debug))
        .context("failed to initialise logging")?;
    info!(
        service = %settings.appname,
        listen = %settings.listen,
        version = env!("CARGO_PKG_VERSION"),
        "starting"
    );

    let report = Bootstrap::new(config, Greeter::default())
        .database_connector(Arc::new(InMemoryConnector::new()))
        .run(wait_for_os_signal())
        .await
        .context("service failed")?;

    info!(released = ?report.released(), "stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("srv-greeter: {e:#}");
            ExitCode::FAILURE
        }
    }
}
