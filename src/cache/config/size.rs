//! Byte-size and watermark values as they appear in configuration files

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::cache::traits::CacheOperationError;

const KIB: u64 = 1024;

/// Parse `"4096"`, `"512k"`, `"8m"`, `"2g"`, `"1t"` (binary multiples, optional `b`/`ib`)
pub fn parse_byte_size(input: &str) -> Result<u64, CacheOperationError> {
    let text = input.trim().to_ascii_lowercase();
    let digits_end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (number, suffix) = text.split_at(digits_end);
    if number.is_empty() {
        return Err(CacheOperationError::invalid_configuration(format!(
            "'{}' is not a byte size",
            input
        )));
    }
    let multiplier = match suffix.trim() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KIB,
        "m" | "mb" | "mib" => KIB * KIB,
        "g" | "gb" | "gib" => KIB * KIB * KIB,
        "t" | "tb" | "tib" => KIB * KIB * KIB * KIB,
        other => {
            return Err(CacheOperationError::invalid_configuration(format!(
                "unknown size suffix '{}' in '{}'",
                other, input
            )))
        }
    };
    number
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| {
            CacheOperationError::invalid_configuration(format!("byte size '{}' overflows", input))
        })
}

/// A byte count that deserializes from an integer or a human string
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteSize(pub u64);

impl ByteSize {
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn kib(n: u64) -> Self {
        Self(n * KIB)
    }

    pub const fn mib(n: u64) -> Self {
        Self(n * KIB * KIB)
    }
}

impl From<u64> for ByteSize {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

struct ByteSizeVisitor;

impl<'de> Visitor<'de> for ByteSizeVisitor {
    type Value = ByteSize;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a byte count or a size string such as \"512k\"")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(ByteSize(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(ByteSize)
            .map_err(|_| E::custom(format!("byte size must not be negative, got {}", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        parse_byte_size(v).map(ByteSize).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

/// Disk usage threshold: absolute bytes, a fraction of disk capacity, or off (`-1`)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Watermark {
    #[default]
    Disabled,
    Bytes(u64),
    Fraction(f64),
}

impl Watermark {
    pub fn is_disabled(&self) -> bool {
        matches!(self, Watermark::Disabled)
    }

    /// Byte threshold, `-1` when disabled
    pub fn resolve(&self, disk_capacity: Option<u64>) -> Result<i64, CacheOperationError> {
        match *self {
            Watermark::Disabled => Ok(-1),
            Watermark::Bytes(bytes) => i64::try_from(bytes).map_err(|_| {
                CacheOperationError::invalid_configuration(format!(
                    "watermark {} bytes is out of range",
                    bytes
                ))
            }),
            Watermark::Fraction(fraction) => {
                if !(fraction > 0.0 && fraction <= 1.0) {
                    return Err(CacheOperationError::invalid_configuration(format!(
                        "watermark fraction {} must be in (0, 1]",
                        fraction
                    )));
                }
                let capacity = disk_capacity.ok_or_else(|| {
                    CacheOperationError::invalid_configuration(
                        "fractional watermarks need disk_capacity_bytes",
                    )
                })?;
                Ok((capacity as f64 * fraction) as i64)
            }
        }
    }
}

impl Serialize for Watermark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Watermark::Disabled => serializer.serialize_i64(-1),
            Watermark::Bytes(bytes) => serializer.serialize_u64(bytes),
            Watermark::Fraction(fraction) => serializer.serialize_f64(fraction),
        }
    }
}

struct WatermarkVisitor;

impl<'de> Visitor<'de> for WatermarkVisitor {
    type Value = Watermark;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("-1, a byte size, or a fraction of the disk such as 0.9 or \"90%\"")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Watermark::Bytes(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        match v {
            -1 => Ok(Watermark::Disabled),
            v if v >= 0 => Ok(Watermark::Bytes(v as u64)),
            v => Err(E::custom(format!("watermark must be -1 or non-negative, got {}", v))),
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Watermark::Fraction(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        let text = v.trim();
        if text == "-1" || text.eq_ignore_ascii_case("disabled") {
            return Ok(Watermark::Disabled);
        }
        if let Some(percent) = text.strip_suffix('%') {
            return percent
                .trim()
                .parse::<f64>()
                .map(|p| Watermark::Fraction(p / 100.0))
                .map_err(|_| E::custom(format!("invalid percentage '{}'", v)));
        }
        if text.contains('.') {
            return text
                .parse::<f64>()
                .map(Watermark::Fraction)
                .map_err(|_| E::custom(format!("invalid fraction '{}'", v)));
        }
        parse_byte_size(text).map(Watermark::Bytes).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Watermark {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(WatermarkVisitor)
    }
}
