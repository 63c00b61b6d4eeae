//! CLI command implementations.

pub mod fill;
