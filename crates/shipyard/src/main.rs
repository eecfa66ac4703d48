mod commands;
mod progress;
mod runtime;

use clap::{Parser, Subcommand};
use shipyard_core::DEFAULT_CONFIG_FILE;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "Provision servers, bootstrap K3s and ship your app behind a Cloudflare tunnel", long_about = None)]
#[command(version)]
struct Cli {
    /// Deployment config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Deploy a branch copy with its own servers and hostnames
    #[arg(short, long, global = true)]
    branch: Option<String>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision infrastructure, bootstrap the cluster and deploy the app
    Deploy {
        /// Docker build context uploaded to the master
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// Tear down everything a deploy created
    Delete {
        /// Exit non-zero when any resource could not be removed
        #[arg(long)]
        strict: bool,
    },
    /// Check the config file and the provider credentials
    Validate {
        /// Only check the config file, skip the provider API
        #[arg(long)]
        offline: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let branch = cli.branch.as_deref();
    match cli.command {
        Commands::Deploy { dir } => {
            commands::deploy::handle(&cli.config, branch, &dir).await?;
        }
        Commands::Delete { strict } => {
            commands::delete::handle(&cli.config, branch, strict).await?;
        }
        Commands::Validate { offline } => {
            commands::validate::handle(&cli.config, branch, offline).await?;
        }
    }

    Ok(())
}
