//! Scriptwright Core Engine
//!
//! Credential pools, provider failover, tolerant JSON decoding, and the
//! batch orchestrator that drives long-form script generation.

pub mod ai;
pub mod billing;
pub mod credentials;
pub mod jobs;
pub mod settings;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

#[cfg(test)]
mod tests_pipeline;
