//! CLI configuration management
//!
//! Loads the cache configuration file, if any, and applies command-line
//! overrides on top of it.

use std::path::PathBuf;

use crate::cache::config::{parse_byte_size, ByteSize, CacheConfig};
use crate::cli::args::Cli;
use crate::cli::errors::{CliError, CliResult};

/// Overrides collected from the command line
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub config_file: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub ram: Option<String>,
    pub buffer_size: Option<String>,
    pub prefetch: bool,
}

impl From<&Cli> for CliConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            config_file: cli.config.clone(),
            cache_dir: cli.cache_dir.clone(),
            ram: cli.ram.clone(),
            buffer_size: cli.buffer_size.clone(),
            prefetch: cli.prefetch,
        }
    }
}

impl CliConfig {
    /// Load the configuration file and merge the overrides into it
    pub fn load(&self) -> CliResult<CacheConfig> {
        let mut config = match &self.config_file {
            Some(path) => {
                log::debug!("Loading configuration from {}", path.display());
                CacheConfig::from_file(path)
                    .map_err(|e| CliError::ConfigError(format!("{}: {}", path.display(), e)))?
            }
            None => CacheConfig::default(),
        };

        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(ram) = &self.ram {
            config.ram_abs_available = ByteSize(Self::size_arg("--ram", ram)?);
        }
        if let Some(size) = &self.buffer_size {
            config.buffer_size = ByteSize(Self::size_arg("--buffer-size", size)?);
        }
        if self.prefetch {
            config.prefetch_enabled = true;
        }
        config
            .validate()
            .map_err(|e| CliError::ConfigError(e.to_string()))?;
        Ok(config)
    }

    fn size_arg(flag: &str, value: &str) -> CliResult<u64> {
        parse_byte_size(value).map_err(|e| CliError::ArgumentError(format!("{} {}", flag, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cache.toml");
        std::fs::write(&file, "buffer_size = \"64k\"\nram_abs_available = \"1m\"\n").unwrap();

        let cli = CliConfig {
            config_file: Some(file),
            ram: Some("2m".into()),
            prefetch: true,
            ..Default::default()
        };
        let config = cli.load().unwrap();
        assert_eq!(config.buffer_size, ByteSize::kib(64));
        assert_eq!(config.ram_abs_available, ByteSize::mib(2));
        assert!(config.prefetch_enabled);
    }

    #[test]
    fn test_bad_override_is_argument_error() {
        let cli = CliConfig {
            buffer_size: Some("lots".into()),
            ..Default::default()
        };
        assert!(matches!(cli.load(), Err(CliError::ArgumentError(_))));
    }
}
