//! Hive - mini-app host
//!
//! This crate is the outer shell around `hive_runtime`:
//! - Host configuration (TOML file layered with `HIVE_` environment variables)
//! - A multi-app `Shell` that launches and tears down running apps
//! - Bundled capability modules (`storage`, `system`)

// Re-export core crates
pub use hive_runtime;

// Host configuration
pub mod config;

// Running apps
pub mod shell;

// Bundled capability modules
pub mod modules;

pub use config::{ConfigError, HostConfig, LogConfig};
pub use shell::{Shell, ShellError};
