//! # PagePilot Parser
//!
//! Semantic extraction pipeline: navigate, classify interactive elements,
//! segment content into ranked blocks, fingerprint the DOM and consult the
//! TTL result cache.

pub mod cache;
pub mod parser;
pub mod scoring;

pub use cache::{normalize_url, CacheKey, ResultCache};
pub use parser::SemanticParser;
