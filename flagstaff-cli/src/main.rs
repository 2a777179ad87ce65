//! Flagstaff CLI
//!
//! Lists and purges stored feature flags.

use clap::Parser;
use colored::Colorize;
use flagstaff_cli::{Cli, CliResult, load_config, run};
use flagstaff_features::FeatureManager;
use std::io::{self, Write};
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Handle color preferences
    if cli.no_color {
        colored::control::set_override(false);
    }

    init_logging(cli.verbose);

    if let Err(e) = execute(&cli).await {
        eprintln!("{} {}", "error:".red().bold(), e);
        process::exit(1);
    }
}

async fn execute(cli: &Cli) -> CliResult<()> {
    let config = load_config(cli.config.as_ref())?;
    let manager = FeatureManager::new(config)?;

    if cli.quiet {
        run(&cli.command, &manager, &mut io::sink()).await
    } else {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        run(&cli.command, &manager, &mut out).await?;
        out.flush()?;
        Ok(())
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("FLAGSTAFF_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
