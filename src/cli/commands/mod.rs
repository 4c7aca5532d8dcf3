//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod batches;
mod categories;
mod collect;
mod helpers;
mod init;
mod load;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "paperharvest")]
#[command(about = "Category-driven paper harvesting and loading")]
#[command(version)]
pub struct Cli {
    /// Target data directory (overrides config file).
    #[arg(long, short = 't', global = true)]
    target: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "PAPERHARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Global flags to repeat when this binary re-invokes itself.
    fn forwarded_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref target) = self.target {
            args.push("--target".to_string());
            args.push(target.to_string_lossy().into_owned());
        }
        if let Some(ref config) = self.config {
            args.push("--config".to_string());
            args.push(config.to_string_lossy().into_owned());
        }
        if self.cwd {
            args.push("--cwd".to_string());
        }
        if self.verbose {
            args.push("--verbose".to_string());
        }
        args
    }
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory, database and category progress
    Init,

    /// Harvest the next scheduled categories into raw batch objects
    Collect,

    /// Load pending raw batches into the paper tables
    Load {
        /// Invocation payload (set by automatic continuations)
        #[arg(long)]
        payload: Option<String>,
        /// Do not start a follow-up invocation when batches remain
        #[arg(long)]
        no_chain: bool,
    },

    /// Show harvest and load status
    Status {
        /// Print status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage category progress
    Categories {
        #[command(subcommand)]
        command: CategoryCommands,
    },

    /// Manage raw batch descriptors
    Batches {
        #[command(subcommand)]
        command: BatchCommands,
    },
}

#[derive(Subcommand)]
enum CategoryCommands {
    /// List tracked categories and their state
    List,
    /// Return categories to pending so the next collect run harvests them again
    Reset {
        /// Category to reset
        category: Option<String>,
        /// Reset every category
        #[arg(long, conflicts_with = "category")]
        all: bool,
    },
}

#[derive(Subcommand)]
enum BatchCommands {
    /// Return failed batches to pending
    Requeue,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let forwarded = cli.forwarded_args();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
        target: cli.target,
    };
    let (settings, _config) = load_settings_with_options(options).await?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Collect => collect::cmd_collect(settings).await,
        Commands::Load { payload, no_chain } => {
            load::cmd_load(settings, payload.as_deref(), !no_chain, forwarded).await
        }
        Commands::Status { json } => status::cmd_status(&settings, json).await,
        Commands::Categories { command } => match command {
            CategoryCommands::List => categories::cmd_categories_list(&settings).await,
            CategoryCommands::Reset { category, all } => {
                categories::cmd_categories_reset(&settings, category.as_deref(), all).await
            }
        },
        Commands::Batches { command } => match command {
            BatchCommands::Requeue => batches::cmd_batches_requeue(&settings).await,
        },
    }
}
