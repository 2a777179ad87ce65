//! Flagstaff administration CLI.
//!
//! A thin front end over [`flagstaff_features`]: it lists and purges feature
//! names in a configured store. Applications that define features in code
//! can embed [`run`] with their own [`FeatureManager`] so `list` sees their
//! definitions.

pub mod commands;
pub mod error;

use clap::{Parser, Subcommand};
use colored::Colorize;
use flagstaff_features::{FeatureManager, FeaturesConfig};
use std::io::Write;
use std::path::PathBuf;

pub use error::{CliError, CliResult};

/// Flagstaff command line.
#[derive(Debug, Parser)]
#[command(name = "flagstaff")]
#[command(author = "Pegasus Heavy Industries LLC")]
#[command(version)]
#[command(about = "Inspect and purge stored feature flags")]
#[command(long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = format!(
    "{}\n  {} flagstaff list --stored\n  {} flagstaff purge new-dashboard beta-search\n  {} flagstaff purge --except billing-v2 --store redis",
    "Examples:".bright_cyan().bold(),
    "$".dimmed(),
    "$".dimmed(),
    "$".dimmed(),
))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML store configuration (defaults to the environment)
    #[arg(short, long, global = true, env = "FLAGSTAFF_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List defined or stored feature names
    #[command(alias = "ls")]
    List {
        /// Store to inspect (defaults to the configured default store)
        #[arg(short, long)]
        store: Option<String>,

        /// List the names the store holds values for
        #[arg(long)]
        stored: bool,
    },

    /// Purge stored feature values
    Purge {
        /// Features to purge (all stored features when omitted)
        features: Vec<String>,

        /// Features to keep
        #[arg(long, num_args = 1..)]
        except: Vec<String>,

        /// Store to purge (defaults to the configured default store)
        #[arg(short, long)]
        store: Option<String>,
    },
}

/// Load the store configuration from `path`, or from the environment.
pub fn load_config(path: Option<&PathBuf>) -> CliResult<FeaturesConfig> {
    let config = match path {
        Some(path) => FeaturesConfig::from_file(path)?,
        None => FeaturesConfig::from_env()?,
    };
    Ok(config)
}

/// Run a parsed command against `manager`, writing to `out`.
pub async fn run(
    command: &Commands,
    manager: &FeatureManager,
    out: &mut impl Write,
) -> CliResult<()> {
    match command {
        Commands::List { store, stored } => {
            commands::list::execute(manager, store.as_deref(), *stored, out).await
        }
        Commands::Purge {
            features,
            except,
            store,
        } => commands::purge::execute(manager, features, except, store.as_deref(), out).await,
    }
}
