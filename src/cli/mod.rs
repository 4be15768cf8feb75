//! CLI module for the proxycache binary
//!
//! Reads local files through a cache instance, inspects what the store holds
//! and runs purge passes on demand.

pub mod args;
pub mod commands;
pub mod config;
pub mod errors;
pub mod output;

pub use args::{Cli, Command, ConfigFormat};
pub use commands::dispatch;
pub use config::CliConfig;
pub use errors::{CliError, CliResult};
pub use output::OutputFormat;
