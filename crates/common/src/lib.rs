//! castd Common Utilities
//!
//! Shared infrastructure for all castd crates:
//! - Error types and result aliases
//! - Tracing/logging initialization
//! - Configuration loading (recording defaults, lockdown policy)

pub mod config;
pub mod error;
pub mod logging;

pub use config::*;
pub use error::*;
