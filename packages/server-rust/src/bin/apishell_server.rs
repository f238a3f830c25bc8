//! `apishell-server` binary: runs one of the example web API services.

use std::time::Duration;

use anyhow::Result;
use apishell_server::service::{AsyncWebApi, WebApi};
use apishell_server::ServerConfig;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Which service to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ServiceKind {
    /// Synchronous handlers and lifecycle.
    Normal,
    /// Mixed handlers with an asynchronous lifecycle.
    Async,
}

#[derive(Parser, Debug)]
#[command(name = "apishell-server", version)]
struct Args {
    /// Service to run.
    #[arg(value_enum)]
    service: ServiceKind,

    /// Address to bind.
    #[arg(long, env = "APISHELL_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "APISHELL_PORT", default_value_t = 12345)]
    port: u16,

    /// Worker threads serving requests.
    #[arg(long, env = "APISHELL_THREADS", default_value_t = 4)]
    threads: usize,

    /// Maximum number of requests processed concurrently.
    #[arg(long, env = "APISHELL_CONNECTION_LIMIT", default_value_t = 100)]
    connection_limit: usize,

    /// Per-request timeout in seconds.
    #[arg(long, env = "APISHELL_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Emit logs as JSON lines.
    #[arg(long, env = "APISHELL_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            threads: self.threads,
            connection_limit: self.connection_limit,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..ServerConfig::default()
        }
    }
}

/// Initialize tracing with `RUST_LOG` filtering, defaulting to `info`.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).compact().init();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = args.server_config();
    info!(
        service = ?args.service,
        address = %config.bind_address(),
        "starting apishell server v{}",
        env!("CARGO_PKG_VERSION")
    );

    match args.service {
        ServiceKind::Normal => WebApi::new(config)?.run_scoped(),
        ServiceKind::Async => AsyncWebApi::new(config)?.run_scoped(),
    }
}
