mod banner;
mod config;
mod connection;
mod local;
mod server;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use libremotecc::{Hub, NativeSpawner};
use remotecc_protocol::connection_url;

use crate::config::{Overrides, ServerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "remotecc",
    version,
    about = "Relay an interactive CLI agent to a remote client"
)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Config file (default: $XDG_CONFIG_HOME/remotecc/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not print the connection QR code
    #[arg(long)]
    no_qr: bool,

    /// Quiet period before buffered output is classified
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Program to run and its arguments (default: claude)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            port: self.port,
            host: self.host.clone(),
            no_qr: self.no_qr,
            debounce_ms: self.debounce_ms,
            command: self.command.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref())?.with_overrides(args.overrides());
    init_tracing(&config)?;

    let listener = match server::bind(&config.host, config.port).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("remotecc: {err}");
            std::process::exit(err.exit_code());
        }
    };

    let hub = Hub::new(
        config.hub_config(),
        Arc::new(NativeSpawner),
        Arc::new(local::StdoutMirror::spawn()),
    );
    let url = connection_url(&banner::advertised_host(&config.host), config.port, hub.token());
    eprint!("{}", banner::render(&url, hub.token(), config.show_qr));
    info!(command = %config.command, port = config.port, "waiting for a client to start the session");

    let signal_hub = hub.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("signal received, shutting down");
        signal_hub.shutdown().await;
    });

    let _raw_mode = local::spawn_passthrough(hub.clone())?;
    server::serve(listener, hub.clone()).await?;
    hub.shutdown().await;
    Ok(())
}

fn init_tracing(config: &ServerConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "remotecc=info,libremotecc=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
}
