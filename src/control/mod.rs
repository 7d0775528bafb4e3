//! Medium configuration loaded from `config.toml` next to the scene file.

pub mod config;

pub use config::{ConfigError, MediumConfig};
