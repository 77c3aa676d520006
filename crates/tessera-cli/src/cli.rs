use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tessera",
    about = "Inspect and maintain a tessera call cache",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache database (overrides the configuration file)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Decode a resource handle and show its call chain
    Decode(DecodeArgs),
    /// Show the cache entry for a resource handle
    Lookup(LookupArgs),
    /// Drop the cache entry for a resource handle
    Invalidate(LookupArgs),
    /// Delete expired cache entries
    Gc(GcArgs),
    /// Sweep expired entries periodically until interrupted
    Sweep(SweepArgs),
    /// List cache records holding content with a digest
    Search(SearchArgs),
    /// Parse and optionally resolve a blob:// URI
    Blob(BlobArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct DecodeArgs {
    /// Handle text
    pub handle: String,
}

#[derive(Args)]
pub struct LookupArgs {
    /// Handle text
    pub handle: String,
    /// Session the call was made in (only matters for tainted calls)
    #[arg(long, default_value = "")]
    pub session: String,
}

#[derive(Args)]
pub struct GcArgs {
    /// Treat this epoch second as the current time
    #[arg(long)]
    pub now: Option<i64>,
}

#[derive(Args)]
pub struct SweepArgs {
    /// Seconds between sweeps (defaults to the configured interval)
    #[arg(long)]
    pub interval: Option<u64>,
}

#[derive(Args)]
pub struct SearchArgs {
    /// Content digest, `sha256:<hex>`
    pub digest: String,
}

#[derive(Args)]
pub struct BlobArgs {
    /// `blob://<digest>`
    pub uri: String,
    #[arg(long)]
    pub media_type: Option<String>,
    #[arg(long)]
    pub size: Option<u64>,
    /// Directory holding result files named by storage key; resolves the blob
    #[arg(long)]
    pub root: Option<PathBuf>,
}
