//! Command-line arguments

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use super::output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "proxycache", version, about = "Disk and RAM block cache for remote file reads")]
pub struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Override the RAM budget, e.g. 64m
    #[arg(long, global = true)]
    pub ram: Option<String>,

    /// Override the block size, e.g. 1m
    #[arg(long, global = true)]
    pub buffer_size: Option<String>,

    /// Enable prefetch regardless of the configuration
    #[arg(long, global = true)]
    pub prefetch: bool,

    #[arg(short, long, value_enum, default_value_t, global = true)]
    pub output: OutputFormat,

    /// More log output; repeat for more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read a local file through the cache and report where bytes came from
    Cat {
        path: PathBuf,
        /// Number of full reads
        #[arg(long, default_value_t = 2)]
        passes: usize,
        /// Bytes per read call
        #[arg(long, default_value = "256k")]
        chunk: String,
        /// Copy the file to stdout on the first pass
        #[arg(long)]
        print: bool,
    },
    /// Show what the cache store holds for a file
    Stat { path: PathBuf },
    /// Run one purge pass now
    Purge,
    /// Print the effective configuration
    Config {
        #[arg(long, value_enum, default_value_t)]
        format: ConfigFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Json,
}

impl Cli {
    /// `log` level filter for the `-v` count
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}
