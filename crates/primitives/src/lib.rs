//! Semantic containers used across the backup engine.
//!
//! - [`art`]: an adaptive radix tree keyed by byte strings, used for
//!   manifest diffs, path sets and the workflow bag
//! - [`json`]: a thin insertion-ordered JSON document wrapper

pub mod art;
pub mod json;

pub use art::Art;
pub use json::JsonDocument;
