use crate::config::{resolve_port, FixtureConfig, RouteSet, PORT_ENV};
use crate::error::FixtureError;
use crate::server::Server;
use clap::Parser;
use log::info;
use std::process::ExitCode;

mod config;
mod error;
mod request;
mod response;
mod routes;
mod server;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Minimal HTTP/1.1 fixture server for HTTP client tests"
)]
struct Args {
    /// Port to listen on (127.0.0.1). Falls back to ERKAO_HTTP_TEST_PORT.
    port: Option<String>,

    /// Serve `GET /json` and log startup diagnostics
    #[arg(long)]
    extended: bool,

    /// Log one line per request
    #[arg(long)]
    access_log: bool,

    /// Give up on a request whose head or body has not arrived within this
    /// duration, e.g. "5s". Waits forever by default.
    #[arg(long)]
    body_timeout: Option<humantime::Duration>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), FixtureError> {
    let routes = if args.extended {
        RouteSet::Extended
    } else {
        RouteSet::Base
    };
    if routes == RouteSet::Extended {
        info!(
            "Starting http-fixture with args: {:?}",
            std::env::args().collect::<Vec<_>>()
        );
        info!("Executable: {:?}", std::env::current_exe().ok());
    }

    let env_port = std::env::var(PORT_ENV).ok();
    let port = resolve_port(args.port.as_deref(), env_port.as_deref())?;

    let config = FixtureConfig {
        port,
        routes,
        access_log: args.access_log,
        body_timeout: args.body_timeout.map(Into::into),
    };

    let verbose = config.verbose();
    let server = Server::bind(config)?;
    if verbose {
        info!("Listening on {}", server.local_addr()?);
    }
    tokio::select! {
        res = server.run() => res,
        _ = terminated() => Ok(()),
    }
}

/// Resolves on SIGINT, or SIGTERM on unix, so the owning harness sees exit 0.
async fn terminated() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(not(feature = "trace"))]
fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

#[cfg(feature = "trace")]
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(std::io::stderr)
        .try_init();
}
