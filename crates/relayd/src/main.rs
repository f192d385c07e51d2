//! relayd - Relay daemon
//!
//! Connects to every capability server listed in the config file and serves
//! their merged catalog through one front.
//!
//! Usage:
//!   relayd [OPTIONS] [stdio|sse]
//!
//! Settings come from flags or the environment (`MCP_AUTH_TOKEN`, `HOST`,
//! `PORT`, `KEEP_SERVER_OPEN`, `MCP_CONFIG`). Logs go to stderr; stdout is
//! reserved for protocol frames in stdio mode.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relay_api::{serve_sse, serve_stdio, AppState, AuthGate, CloseAction, FrontMode, FrontSession};
use relay_backend::DefaultConnector;
use relay_core::{Secret, ServersConfig};
use relay_gateway::Gateway;

const DEFAULT_LOG_FILTER: &str = "relayd=info,relay_gateway=info,relay_backend=info,relay_api=info";

#[derive(Parser)]
#[command(name = "relayd")]
#[command(author, version, about = "Capability relay gateway")]
struct Cli {
    /// Shared secret callers must present as a bearer token
    #[arg(long, env = "MCP_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Interface the SSE front binds to
    #[arg(long, env = "HOST", default_value = "localhost")]
    host: String,

    /// Port the SSE front listens on
    #[arg(long, env = "PORT", default_value_t = 3006)]
    port: u16,

    /// Set to 1 to keep running after the stdio caller goes away
    #[arg(long, env = "KEEP_SERVER_OPEN", default_value = "0")]
    keep_server_open: String,

    /// Backend descriptor file (.json or .toml)
    #[arg(short, long, env = "MCP_CONFIG", default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Serve one caller over stdin/stdout
    Stdio,
    /// Serve many callers over HTTP server-sent events
    Sse,
}

impl Cli {
    fn mode(&self) -> Mode {
        self.mode.unwrap_or(Mode::Stdio)
    }

    fn keep_open(&self) -> bool {
        self.keep_server_open == "1"
    }

    fn secret(&self) -> Option<Secret> {
        self.auth_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(Secret::new)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mode = cli.mode();
    tracing::info!(mode = ?mode, "Starting relayd");

    let secret = cli.secret();
    match (mode, &secret) {
        (Mode::Stdio, None) => bail!("MCP_AUTH_TOKEN is not set; refusing to start"),
        (Mode::Sse, None) => {
            tracing::warn!("MCP_AUTH_TOKEN is not set; every SSE request will be rejected")
        }
        (_, Some(_)) => tracing::info!("Authentication enabled"),
    }

    let config = ServersConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    tracing::info!(
        path = %cli.config.display(),
        servers = config.servers.len(),
        "Loaded backend descriptors"
    );

    let gateway = Gateway::new(Arc::new(DefaultConnector::new()));
    gateway.start(&config.servers).await;

    let stop = shutdown_signal();

    let served = match mode {
        Mode::Stdio => run_stdio(&gateway, cli.keep_open(), stop).await,
        Mode::Sse => run_sse(&gateway, &cli, AuthGate::new(secret), stop).await,
    };

    gateway.shutdown().await;
    tracing::info!("relayd stopped");
    served
}

async fn run_stdio(gateway: &Gateway, keep_open: bool, stop: watch::Receiver<bool>) -> Result<()> {
    let session = Arc::new(
        FrontSession::new("stdio", FrontMode::Stdio, gateway.router().clone())
            .with_keep_open(keep_open),
    );

    let action = serve_stdio(
        session,
        tokio::io::stdin(),
        tokio::io::stdout(),
        stopped(stop.clone()),
    )
    .await;

    if action == CloseAction::KeepRunning {
        tracing::info!("stdio caller left; waiting for a signal to exit");
        stopped(stop).await;
    }
    Ok(())
}

async fn run_sse(
    gateway: &Gateway,
    cli: &Cli,
    auth: AuthGate,
    stop: watch::Receiver<bool>,
) -> Result<()> {
    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("SSE endpoint: http://{}/sse", addr);

    let state = AppState::new(gateway.router().clone());
    serve_sse(listener, state, auth, stopped(stop))
        .await
        .context("SSE front failed")
}

/// Flips to `true` on SIGINT (and SIGTERM on unix)
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        tracing::info!("Shutdown signal received");
        tx.send_replace(true);
    });

    rx
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
