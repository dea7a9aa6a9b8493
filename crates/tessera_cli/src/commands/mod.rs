//! CLI command implementations.

pub mod stress;
pub mod timeline;
