//! Context Matcher
//!
//! Ranks candidate templates for a usage situation by blending historical
//! stats with a deterministic context match accuracy.

#![warn(missing_docs)]

pub mod matcher;

pub use matcher::{ContextMatcher, Match};
