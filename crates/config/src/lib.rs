//! Configuration management for the testrig API
//!
//! This crate provides centralized configuration loading and management
//! for different environments (development, production, etc.).

pub mod environment;
pub mod loader;
pub mod types;

pub use environment::Environment;
pub use loader::load;
pub use types::*;
