//! CLI command implementations

pub mod backends;
pub mod monitor;
