//! Configuration for Maestro: `~/.maestro/config.toml` plus process env.
//!
//! Two layers, applied with priority **existing env > config.toml `[env]`**:
//! the `[env]` table is copied into the process environment for keys not
//! already set, and the typed accessors ([`TierBindings`], [`RuntimeCaps`])
//! then read everything from the environment. Binaries call
//! [`load_and_apply`] once at startup.

mod providers;
mod sources;

#[cfg(feature = "tracing-init")]
pub mod tracing_init;

use std::path::PathBuf;
use thiserror::Error;

pub use providers::{ModelTier, ProviderBinding, RuntimeCaps, TierBindings};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read config.toml: {0}")]
    Read(std::io::Error),
    #[error("parse config.toml: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Directory holding Maestro's config, cache and data files: `~/.maestro`.
/// Overridable with `MAESTRO_HOME` (used by tests and containers).
pub fn maestro_home() -> PathBuf {
    if let Ok(dir) = std::env::var("MAESTRO_HOME") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".maestro")
}

/// Loads `~/.maestro/config.toml` and applies its `[env]` table to the process
/// environment for keys that are **not** already set (existing env wins).
/// A missing file is not an error.
pub fn load_and_apply() -> Result<(), LoadError> {
    let map = sources::load_env_table(&maestro_home().join("config.toml"))?;
    for (key, value) in map {
        if std::env::var(&key).is_err() {
            std::env::set_var(&key, value);
        }
    }
    Ok(())
}
