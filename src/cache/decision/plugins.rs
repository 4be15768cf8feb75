//! Built-in decision plugins

use regex::Regex;

use super::chain::{Decision, DecisionTarget};
use crate::cache::traits::CacheOperationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternMode {
    /// Approve only matching paths
    Allow,
    /// Reject matching paths
    Deny,
}

/// Approve or reject by regular expression on the remote path
#[derive(Debug, Clone)]
pub struct PathPatternDecision {
    name: String,
    pattern: Regex,
    mode: PatternMode,
}

impl PathPatternDecision {
    pub fn new(pattern: &str, mode: PatternMode) -> Result<Self, CacheOperationError> {
        let compiled = Regex::new(pattern).map_err(|e| {
            CacheOperationError::invalid_configuration(format!(
                "invalid decision pattern '{}': {}",
                pattern, e
            ))
        })?;
        let name = match mode {
            PatternMode::Allow => format!("allow({})", pattern),
            PatternMode::Deny => format!("deny({})", pattern),
        };
        Ok(Self {
            name,
            pattern: compiled,
            mode,
        })
    }

    pub fn allow(pattern: &str) -> Result<Self, CacheOperationError> {
        Self::new(pattern, PatternMode::Allow)
    }

    pub fn deny(pattern: &str) -> Result<Self, CacheOperationError> {
        Self::new(pattern, PatternMode::Deny)
    }
}

impl Decision for PathPatternDecision {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&self, target: &DecisionTarget<'_>) -> bool {
        let matched = self.pattern.is_match(target.path);
        match self.mode {
            PatternMode::Allow => matched,
            PatternMode::Deny => !matched,
        }
    }
}

/// Skip files smaller than a threshold; unknown sizes pass
#[derive(Debug, Clone)]
pub struct MinimumSizeDecision {
    name: String,
    min_bytes: u64,
}

impl MinimumSizeDecision {
    pub fn new(min_bytes: u64) -> Self {
        Self {
            name: format!("min-size({})", min_bytes),
            min_bytes,
        }
    }
}

impl Decision for MinimumSizeDecision {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&self, target: &DecisionTarget<'_>) -> bool {
        target.size.map_or(true, |size| size >= self.min_bytes)
    }
}
