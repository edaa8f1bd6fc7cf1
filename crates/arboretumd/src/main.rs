//! arboretumd — Arboretum daemon binary.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use arboretum_core::ArboretumConfig;
use arboretumd::{Supervisor, SupervisorConfig, WorkerContext};

#[derive(Parser)]
#[command(name = "arboretumd", about = "Arboretum daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor and its workers until SIGTERM or Ctrl-C.
    Run {
        /// Path to arboretum.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Append logs to this file instead of stderr.
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        json_logs: bool,
    },
}

fn init_tracing(json: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,arboretumd=debug,arboretum=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (json, log_file) {
        (false, None) => builder.init(),
        (true, None) => builder.json().init(),
        (json, Some(path)) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            log_file,
            json_logs,
        } => {
            init_tracing(json_logs, log_file.as_deref())?;
            let config = ArboretumConfig::load(config.as_deref())?;
            info!(
                store = %config.store.path.display(),
                control_port = config.daemon.control_port,
                "starting Arboretum daemon"
            );

            let ctx = Arc::new(WorkerContext::from_config(&config)?);
            let supervisor = Supervisor::start(ctx, SupervisorConfig::from(&config.daemon)).await?;
            supervisor.run(shutdown_signal()).await?;

            info!("Arboretum daemon stopped");
        }
    }

    Ok(())
}
