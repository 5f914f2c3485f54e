//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Parallel test runner with worker fleet supervision and resumable sessions
#[derive(Parser, Debug)]
#[command(name = "testfleet")]
#[command(author = "hephaex@gmail.com")]
#[command(version)]
#[command(about = "Run a test suite across a fleet of worker processes")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every item in a suite manifest
    Run(RunArgs),

    /// Rerun the failed and unfinished items of an earlier session
    Resume(ResumeArgs),

    /// List the items of a suite manifest
    List(ListArgs),

    /// List recorded sessions
    Sessions(SessionsArgs),
}

/// Options shared by `run` and `resume`
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct RunOptions {
    /// Number of worker processes (0 runs items in this process)
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Stop after the first failure or error
    #[arg(short = 'x', long)]
    pub stop_on_error: bool,

    /// Coordinator address
    #[arg(long)]
    pub host: Option<String>,

    /// Coordinator port
    #[arg(long)]
    pub port: Option<u16>,

    /// Summary format (table, json, csv, brief)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Suite manifest
    pub manifest: PathBuf,

    #[command(flatten)]
    pub options: RunOptions,

    /// Run as a fleet worker with this client id
    #[arg(long, hide = true)]
    pub worker_id: Option<u64>,
}

/// Arguments for resume command
#[derive(Parser, Debug)]
pub struct ResumeArgs {
    /// Suite manifest
    pub manifest: PathBuf,

    /// Sessions to resume (defaults to the latest one for this directory)
    pub session_ids: Vec<String>,

    #[command(flatten)]
    pub options: RunOptions,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Suite manifest
    pub manifest: PathBuf,

    /// Show commands alongside item addresses
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for sessions command
#[derive(Parser, Debug)]
pub struct SessionsArgs {
    /// Include sessions recorded from other directories
    #[arg(short, long)]
    pub all: bool,
}
