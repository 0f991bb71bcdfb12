//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "hybrid-search",
    version,
    about = "Administration for the hybrid retrieval and reranking pipeline",
    long_about = "Inspect and validate pipeline configuration and manage the persistent \
                  result cache used by the hybrid search pipeline."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/hybrid-search/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the config file (e.g., "fast", "accuracy")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage the persistent result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section (e.g., "cache")
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show entry counts and size of the SQLite cache
    Stats,

    /// Delete expired entries
    Purge,

    /// Delete every entry
    Flush,

    /// Print the L1 cache key a query maps to
    Key {
        /// Query text
        query: String,

        /// Tenant partition key
        #[arg(short, long)]
        tenant: String,

        /// Result limit the request would use [default: pipeline.default_limit]
        #[arg(short, long)]
        limit: Option<usize>,

        /// Key for a request with reranking disabled
        #[arg(long)]
        no_rerank: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
