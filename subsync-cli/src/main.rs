//! Subsync CLI - Command-line interface
//!
//! Loads an INI configuration file, installs logging and runs one command
//! against the subscription manager.

mod commands;
mod error;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::common::PolicyArg;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "subsync", version, about = "Keep subscribed content in sync")]
struct Cli {
    /// Configuration file (default: <config dir>/subsync/config.ini)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Initialize every subscription: resume, unpack bundled content, download
    Init,

    /// Check for updates and apply them
    Refresh {
        /// Refresh only this subscription
        name: Option<String>,
    },

    /// Show version and progress of every subscription
    Status,

    /// Show or set the download policy
    Policy {
        /// New policy; omit to print the current one
        #[arg(value_enum)]
        policy: Option<PolicyArg>,
    },

    /// Discard a subscription's local content and restore its bundled content
    Reset {
        /// Subscription to reset
        name: String,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "subsync=debug" } else { "subsync=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config: Option<&Path> = cli.config.as_deref();

    match cli.command {
        Commands::Status => commands::status::run(config),
        Commands::Policy { policy } => commands::policy::run(config, policy),
        command => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async {
                match command {
                    Commands::Init => commands::init::run(config).await,
                    Commands::Refresh { name } => {
                        commands::refresh::run(config, name.as_deref()).await
                    }
                    Commands::Reset { name } => commands::reset::run(config, &name).await,
                    Commands::Status | Commands::Policy { .. } => Ok(()),
                }
            })
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}
