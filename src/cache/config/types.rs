//! The configuration record and its validation rules

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::size::{ByteSize, Watermark};
use crate::cache::traits::CacheOperationError;

/// One entry of the decision chain, in evaluation order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionConfig {
    /// Cache only paths matching the regex
    Allow { pattern: String },
    /// Never cache paths matching the regex
    Deny { pattern: String },
    /// Skip files smaller than `bytes`
    MinimumSize { bytes: ByteSize },
}

/// Cache configuration, immutable once the cache is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root of the on-disk block store
    pub cache_dir: PathBuf,
    /// Bytes per block
    pub buffer_size: ByteSize,
    /// Total RAM budget for block buffers
    pub ram_abs_available: ByteSize,
    /// Explicit buffer count, overrides `ram_abs_available / buffer_size`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ram_buffers: Option<usize>,
    /// Purge stops once occupancy is at or below this
    pub disk_usage_lwm: Watermark,
    /// Purge starts once occupancy reaches this
    pub disk_usage_hwm: Watermark,
    /// Capacity used to resolve fractional watermarks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_capacity_bytes: Option<ByteSize>,
    pub prefetch_enabled: bool,
    /// Outstanding speculative blocks allowed per file
    pub prefetch_max_blocks_per_file: usize,
    /// Split files into independently cached units of `block_mode_unit_size`
    pub block_mode: bool,
    pub block_mode_unit_size: ByteSize,
    /// Ceiling on queued write bytes; defaults to the RAM budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_queue_max_bytes: Option<ByteSize>,
    pub purge_interval_secs: u64,
    pub writer_threads: usize,
    /// How long the prefetch loop sleeps after a pass with nothing to do
    pub prefetch_idle_wait_ms: u64,
    /// Decision chain applied on attach
    pub decisions: Vec<DecisionConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./proxycache-data"),
            buffer_size: ByteSize::mib(1),
            ram_abs_available: ByteSize::mib(8),
            num_ram_buffers: None,
            disk_usage_lwm: Watermark::Disabled,
            disk_usage_hwm: Watermark::Disabled,
            disk_capacity_bytes: None,
            prefetch_enabled: false,
            prefetch_max_blocks_per_file: 10,
            block_mode: false,
            block_mode_unit_size: ByteSize::mib(128),
            write_queue_max_bytes: None,
            purge_interval_secs: 60,
            writer_threads: 1,
            prefetch_idle_wait_ms: 100,
            decisions: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Load from `path`: JSON when the extension is `.json`, TOML otherwise
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CacheOperationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheOperationError::invalid_configuration(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))
        })?;
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CacheOperationError> {
        toml::from_str(content)
            .map_err(|e| CacheOperationError::invalid_configuration(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self, CacheOperationError> {
        serde_json::from_str(content)
            .map_err(|e| CacheOperationError::invalid_configuration(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, CacheOperationError> {
        toml::to_string_pretty(self)
            .map_err(|e| CacheOperationError::SerializationError(e.to_string()))
    }

    pub fn to_json_string(&self) -> Result<String, CacheOperationError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CacheOperationError::SerializationError(e.to_string()))
    }

    /// Number of RAM buffers in the pool
    pub fn num_ram_buffers(&self) -> usize {
        match self.num_ram_buffers {
            Some(n) => n,
            None if self.buffer_size.get() == 0 => 0,
            None => (self.ram_abs_available.get() / self.buffer_size.get()) as usize,
        }
    }

    /// Byte ceiling for `have_free_writing_slots`
    pub fn write_queue_ceiling(&self) -> u64 {
        match self.write_queue_max_bytes {
            Some(bytes) => bytes.get(),
            None => self.num_ram_buffers() as u64 * self.buffer_size.get(),
        }
    }

    /// `(lwm, hwm)` in bytes, `-1` each when purging is disabled
    pub fn watermarks(&self) -> Result<(i64, i64), CacheOperationError> {
        let capacity = self.disk_capacity_bytes.map(ByteSize::get);
        Ok((
            self.disk_usage_lwm.resolve(capacity)?,
            self.disk_usage_hwm.resolve(capacity)?,
        ))
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn prefetch_idle_wait(&self) -> Duration {
        Duration::from_millis(self.prefetch_idle_wait_ms)
    }

    /// Reject configurations the cache cannot start with
    pub fn validate(&self) -> Result<(), CacheOperationError> {
        let buffer_size = self.buffer_size.get();
        if buffer_size == 0 {
            return Err(CacheOperationError::invalid_configuration(
                "buffer_size must be positive",
            ));
        }
        match self.num_ram_buffers {
            Some(0) => {
                return Err(CacheOperationError::invalid_configuration(
                    "num_ram_buffers must be positive",
                ))
            }
            None if self.ram_abs_available.get() < buffer_size => {
                return Err(CacheOperationError::invalid_configuration(format!(
                    "ram_abs_available ({}) is smaller than one buffer ({})",
                    self.ram_abs_available, self.buffer_size
                )))
            }
            _ => {}
        }

        if self.disk_usage_lwm.is_disabled() != self.disk_usage_hwm.is_disabled() {
            return Err(CacheOperationError::invalid_configuration(
                "disk_usage_lwm and disk_usage_hwm must be both set or both disabled",
            ));
        }
        let (lwm, hwm) = self.watermarks()?;
        if hwm >= 0 && lwm >= hwm {
            return Err(CacheOperationError::invalid_configuration(format!(
                "disk_usage_lwm ({}) must be below disk_usage_hwm ({})",
                lwm, hwm
            )));
        }

        if self.block_mode {
            let unit = self.block_mode_unit_size.get();
            if unit == 0 || unit % buffer_size != 0 {
                return Err(CacheOperationError::invalid_configuration(format!(
                    "block_mode_unit_size ({}) must be a positive multiple of buffer_size ({})",
                    unit, buffer_size
                )));
            }
        }
        if self.writer_threads == 0 {
            return Err(CacheOperationError::invalid_configuration(
                "writer_threads must be at least 1",
            ));
        }
        if self.write_queue_ceiling() == 0 {
            return Err(CacheOperationError::invalid_configuration(
                "write_queue_max_bytes must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CacheConfig::default();
        config.validate().unwrap();
        assert_eq!(config.num_ram_buffers(), 8);
        assert_eq!(config.write_queue_ceiling(), 8 * 1024 * 1024);
        assert_eq!(config.watermarks().unwrap(), (-1, -1));
    }

    #[test]
    fn test_toml_with_size_strings() {
        let config = CacheConfig::from_toml_str(
            r#"
            cache_dir = "/var/cache/px"
            buffer_size = "64k"
            ram_abs_available = "1m"
            disk_usage_lwm = "1g"
            disk_usage_hwm = "2g"
            prefetch_enabled = true

            [[decisions]]
            kind = "deny"
            pattern = "\\.tmp$"

            [[decisions]]
            kind = "minimum_size"
            bytes = "4k"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/px"));
        assert_eq!(config.num_ram_buffers(), 16);
        assert_eq!(config.watermarks().unwrap(), (1 << 30, 2 << 30));
        assert!(config.prefetch_enabled);
        assert_eq!(config.prefetch_max_blocks_per_file, 10);
        assert_eq!(
            config.decisions,
            vec![
                DecisionConfig::Deny { pattern: r"\.tmp$".into() },
                DecisionConfig::MinimumSize { bytes: ByteSize(4096) },
            ]
        );
    }

    #[test]
    fn test_json_with_fractional_watermarks() {
        let config = CacheConfig::from_json_str(
            r#"{"disk_usage_lwm": 0.8, "disk_usage_hwm": "90%", "disk_capacity_bytes": 1000}"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.watermarks().unwrap(), (800, 900));
    }

    #[test]
    fn test_invalid_configurations() {
        let invalid = [
            CacheConfig { buffer_size: ByteSize(0), ..Default::default() },
            CacheConfig { num_ram_buffers: Some(0), ..Default::default() },
            CacheConfig { ram_abs_available: ByteSize(10), ..Default::default() },
            CacheConfig { disk_usage_hwm: Watermark::Bytes(100), ..Default::default() },
            CacheConfig {
                disk_usage_lwm: Watermark::Bytes(100),
                disk_usage_hwm: Watermark::Bytes(100),
                ..Default::default()
            },
            CacheConfig {
                block_mode: true,
                block_mode_unit_size: ByteSize(1000),
                ..Default::default()
            },
            CacheConfig { writer_threads: 0, ..Default::default() },
        ];
        for config in invalid {
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, CacheOperationError::InvalidConfiguration(_)),
                "{:?}",
                config
            );
        }
    }

    #[test]
    fn test_override_wins_over_ram_budget() {
        let config = CacheConfig {
            ram_abs_available: ByteSize(10),
            num_ram_buffers: Some(3),
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.num_ram_buffers(), 3);
    }

    #[test]
    fn test_toml_output_parses_back() {
        let config = CacheConfig {
            decisions: vec![DecisionConfig::Allow { pattern: "^/data/".into() }],
            disk_usage_lwm: Watermark::Bytes(10),
            disk_usage_hwm: Watermark::Bytes(20),
            ..Default::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(CacheConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_from_file_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("cache.json");
        std::fs::write(&json, r#"{"buffer_size": 4096, "num_ram_buffers": 4}"#).unwrap();
        assert_eq!(CacheConfig::from_file(&json).unwrap().num_ram_buffers(), 4);

        let toml_path = dir.path().join("cache.toml");
        std::fs::write(&toml_path, "writer_threads = 2\n").unwrap();
        assert_eq!(CacheConfig::from_file(&toml_path).unwrap().writer_threads, 2);

        assert!(CacheConfig::from_file(dir.path().join("absent.toml")).is_err());
    }
}
