//! Driver manifest: the channel names an application wires up.
//!
//! Channel names cannot be discovered from a stream of bundles, so
//! [`extract_sinks`](crate::extract::extract_sinks) and
//! [`load_async`](crate::lazy::load_async) take them explicitly. The manifest
//! keeps that list in one place and can check bundles against it.
//!
//! ```toml
//! drivers = ["dom", "http", "state"]
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::sinks::{Sinks, unique_channels};

/// Environment variable pointing at a manifest file.
pub const MANIFEST_ENV: &str = "CYCLE_SINKS_MANIFEST";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverManifest {
    /// Channel names, one per driver.
    pub drivers: Vec<String>,
}

impl DriverManifest {
    pub fn new<I>(drivers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            drivers: unique_channels(drivers),
        }
    }

    /// Loads the manifest named by `CYCLE_SINKS_MANIFEST`.
    /// Returns an empty manifest if the variable is unset.
    ///
    /// # Errors
    /// Returns an error if the named file cannot be read or parsed.
    pub fn load() -> Result<Self> {
        match std::env::var_os(MANIFEST_ENV) {
            Some(path) if !path.is_empty() => Self::load_from(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    /// Loads a manifest from a specific path.
    /// Returns an empty manifest if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no driver manifest, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read driver manifest from {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse driver manifest from {}", path.display()))
    }

    /// # Errors
    /// Returns an error if `contents` is not a valid manifest.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(contents)?;
        Ok(Self::new(manifest.drivers))
    }

    pub fn channels(&self) -> &[String] {
        &self.drivers
    }

    pub fn declares(&self, channel: &str) -> bool {
        self.drivers.iter().any(|d| d == channel)
    }

    /// Fails on the first channel in `sinks` the manifest doesn't declare.
    ///
    /// # Errors
    /// Returns an error naming the undeclared channel.
    pub fn check<T>(&self, sinks: &Sinks<T>) -> Result<()> {
        for channel in sinks.channels() {
            if !self.declares(channel) {
                bail!(
                    "Channel '{channel}' has no driver (declared: {})",
                    self.drivers.join(", ")
                );
            }
        }
        Ok(())
    }
}
