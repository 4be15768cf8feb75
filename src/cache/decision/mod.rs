//! Decision gate: should this file be cached at all
//!
//! An ordered chain of predicates consulted once per attach. The first
//! plugin that rejects ends the evaluation. Plugins must not block.

pub mod chain;
pub mod plugins;

pub use chain::{Decision, DecisionChain, DecisionTarget};
pub use plugins::{MinimumSizeDecision, PathPatternDecision, PatternMode};
