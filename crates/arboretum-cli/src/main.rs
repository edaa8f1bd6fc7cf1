use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use arboretum_core::ArboretumConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "arboretum",
    about = "Arboretum — branch instance control",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to arboretum.toml (default: ./arboretum.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the running daemon which workers are up
    Status,
    /// Create a branch for a group
    Create {
        /// Group to serve
        group: String,
        /// How long the branch lives, e.g. "8 hours", "25 minutes", "forever"
        #[arg(short, long, default_value = "8 hours")]
        lifetime: String,
    },
    /// Destroy a group's branch
    Destroy {
        /// Group whose branch is destroyed
        group: String,
    },
    /// List the group catalogue with branch status
    Groups {
        /// Only groups whose branch is up
        #[arg(long)]
        active: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Refresh the group catalogue from the index snapshot
    UpdateGroups,
    /// Print the current change stamp
    Stamp,
    /// Serve the HTTP API
    ServeApi {
        /// Listen port (default: [api].port from the config)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("arboretum=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = ArboretumConfig::load(cli.config.as_deref())?;

    let succeeded = match cli.command {
        Commands::Status => commands::status::status(&config).await,
        Commands::Create { group, lifetime } => {
            commands::create::create(&config, &group, &lifetime).await
        }
        Commands::Destroy { group } => commands::destroy::destroy(&config, &group).await,
        Commands::Groups { active, json } => commands::groups::groups(&config, active, json),
        Commands::UpdateGroups => commands::update_groups::update_groups(&config).await,
        Commands::Stamp => commands::stamp::stamp(&config),
        Commands::ServeApi { port } => commands::serve_api::serve_api(&config, port).await,
    }?;

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
