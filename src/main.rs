mod config;
mod data;
mod distance;
mod engine;
mod error;
mod manager;
mod mcmc;
mod model;
mod rejection;
mod smc;
mod stats;
mod streams;
mod transform;
mod utils;

use crate::manager::Manager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    /// Directory holding `config.toml`, the observed dataset and all outputs.
    #[arg(long)]
    sim_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Simulate the observed dataset from the `[data]` section.
    Generate,

    /// Run rejection ABC.
    Rejection,

    /// Run ABC-MCMC (needs a rejection run).
    Mcmc,

    /// Run SMC-ABC (needs a rejection run).
    Smc,

    /// Summarize every sampler output present.
    Analyze,

    /// Remove sampler outputs.
    Clean,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.sim_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Generate => mgr.generate_observed()?,
        Command::Rejection => mgr.run_rejection()?,
        Command::Mcmc => mgr.run_mcmc()?,
        Command::Smc => mgr.run_smc()?,
        Command::Analyze => mgr.analyze()?,
        Command::Clean => mgr.clean()?,
    }

    Ok(())
}
