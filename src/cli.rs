//! Command-line interface definitions for fv.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// fv - self-hosted archive for scraped social media content
#[derive(Parser, Debug)]
#[command(name = "fv", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, env = "FV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose (debug) output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the archive service: startup scan plus background loops
    Run(RunArgs),

    /// One-shot ingestion scan over the source roots
    Scan(ScanArgs),

    /// Search archived posts by text
    Search(SearchArgs),

    /// Flag an account the downloader cannot refresh
    Flag(FlagArgs),
}

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Skip the post/media passes of the startup scan
    #[arg(long)]
    pub skip_scan: bool,

    /// Periodically enqueue refresh jobs for known accounts
    #[arg(long)]
    pub update_daemon: bool,
}

/// Arguments for the scan command
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Scan only this source (x, bsky, reddit, fa)
    #[arg(long)]
    pub source: Option<String>,

    /// Scan only this user directory (forces a refresh)
    #[arg(long)]
    pub user: Option<String>,
}

/// Arguments for the search command
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Words that must all appear in a post
    pub query: String,

    /// Result page (1-based)
    #[arg(short, long, default_value_t = 1)]
    pub page: usize,
}

/// Arguments for the flag command
#[derive(Args, Debug)]
pub struct FlagArgs {
    /// Composite account key, e.g. alice@x or somefox@fa
    pub uid: String,
}
