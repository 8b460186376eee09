//! Configuration loading
//!
//! Every section is `#[serde(default)]`, so a TOML file only needs the keys it
//! changes.

mod schema;

pub use schema::*;

use std::path::Path;

use crate::error::Result;

/// Read and validate a TOML configuration file
pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let config = from_toml_str(&text)?;
    tracing::debug!("Loaded configuration from {}", path.as_ref().display());
    Ok(config)
}

/// Parse and validate configuration text
pub fn from_toml_str(text: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}
