//! Decision plugin contract and ordered chain

use std::fmt;

use super::plugins::{MinimumSizeDecision, PathPatternDecision};
use crate::cache::config::DecisionConfig;
use crate::cache::traits::CacheOperationError;

/// What a decision plugin gets to look at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionTarget<'a> {
    /// Remote path of the file being opened
    pub path: &'a str,
    /// Remote size when already known
    pub size: Option<u64>,
}

impl<'a> DecisionTarget<'a> {
    pub fn new(path: &'a str, size: Option<u64>) -> Self {
        Self { path, size }
    }
}

/// Predicate approving or rejecting caching for one file
pub trait Decision: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    fn decide(&self, target: &DecisionTarget<'_>) -> bool;
}

/// Statically composed, ordered list of decision plugins
#[derive(Default)]
pub struct DecisionChain {
    plugins: Vec<Box<dyn Decision>>,
}

impl DecisionChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the chain described by configuration, in order
    pub fn from_config(entries: &[DecisionConfig]) -> Result<Self, CacheOperationError> {
        let mut chain = Self::new();
        for entry in entries {
            let plugin: Box<dyn Decision> = match entry {
                DecisionConfig::Allow { pattern } => {
                    Box::new(PathPatternDecision::allow(pattern)?)
                }
                DecisionConfig::Deny { pattern } => Box::new(PathPatternDecision::deny(pattern)?),
                DecisionConfig::MinimumSize { bytes } => {
                    Box::new(MinimumSizeDecision::new(bytes.get()))
                }
            };
            chain.push(plugin);
        }
        Ok(chain)
    }

    /// Append a plugin at the end of the chain
    pub fn push(&mut self, plugin: Box<dyn Decision>) {
        log::debug!("Decision plugin '{}' added at position {}", plugin.name(), self.plugins.len());
        self.plugins.push(plugin);
    }

    pub fn with(mut self, plugin: impl Decision + 'static) -> Self {
        self.push(Box::new(plugin));
        self
    }

    /// First-reject semantics; an empty chain approves everything
    pub fn decide(&self, target: &DecisionTarget<'_>) -> bool {
        for plugin in &self.plugins {
            if !plugin.decide(target) {
                log::debug!("Decision '{}' rejected caching of {}", plugin.name(), target.path);
                return false;
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl fmt::Debug for DecisionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}
