//! CLI command implementations

pub mod contend;
pub mod deadlock;
