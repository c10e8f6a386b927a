use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint};

/// Resolve site addresses through a cached, rate-limited geocoder and derive
/// volume-weighted footprints.
#[derive(Parser, Debug)]
#[command(name = "site-geocache", version, about, propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve a site export and write coordinates (plus optional footprints)
    Resolve(ResolveArgs),

    /// Inspect the persisted geocode cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    /// Footprints and overlaps (JSON)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub footprints: Option<PathBuf>,

    /// Cache file; overrides GEOCACHE_PATH
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub cache: Option<PathBuf>,

    /// Clear unresolved markers for these sites and try them again
    #[arg(long)]
    pub retry_unresolved: bool,

    /// Move an unreadable cache aside and start empty
    #[arg(long)]
    pub fresh_cache: bool,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    Stats(CachePathArgs),
    Unresolved(CachePathArgs),
}

#[derive(Args, Debug)]
pub struct CachePathArgs {
    /// Cache file; overrides GEOCACHE_PATH
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub cache: Option<PathBuf>,
}
