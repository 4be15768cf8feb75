//! Cache configuration
//!
//! Loaded once at startup from TOML (or JSON), validated, and read-only
//! afterwards. Size-valued keys accept integers or strings like `"8m"`.

pub mod size;
pub mod types;

pub use size::{parse_byte_size, ByteSize, Watermark};
pub use types::{CacheConfig, DecisionConfig};
