use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::http::HttpServer;
use gatekeeper::ratelimit::RegistryKind;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "gatekeeper")]
#[command(about = "HTTP greeting service with per-client rate limiting", version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Sustained rate in requests per second per client
    #[arg(long)]
    rate: Option<f64>,

    /// Burst capacity per client
    #[arg(long)]
    burst: Option<u32>,

    /// Client registry implementation
    #[arg(long, value_enum)]
    registry: Option<RegistryKind>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    /// Resolve the effective configuration: file first, then flag overrides.
    fn load_config(&self) -> anyhow::Result<GatekeeperConfig> {
        let mut config = match &self.config {
            Some(path) => GatekeeperConfig::from_file(path)?,
            None => GatekeeperConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.server.listen_addr = listen;
        }
        if let Some(rate) = self.rate {
            config.rate_limiting.rate = rate;
        }
        if let Some(burst) = self.burst {
            config.rate_limiting.burst = burst;
        }
        if let Some(registry) = self.registry {
            config.rate_limiting.registry = registry;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting Gatekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = cli.load_config()?;
    let limits = &config.rate_limiting;
    info!(
        listen_addr = %config.server.listen_addr,
        rate = limits.rate,
        burst = limits.burst,
        initial_fill = ?limits.initial_fill,
        registry = ?limits.registry,
        "Configuration loaded"
    );

    let registry = limits.registry.build(limits.settings());
    let server = HttpServer::new(config.server.listen_addr, registry);

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Gatekeeper stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
