//! Lockbox configuration.
//!
//! Stored as a JSON file. Every field has a default, so a partial file (or
//! none at all) yields a working in-memory setup.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lockbox_common::{Error, Result};
use lockbox_crypto::KdfParams;
use lockbox_store::{DocumentStore, StoreRegistry};

/// Default capacity of watch channels.
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 16;

/// Which document store to use and how to configure it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Registered store name (e.g., "memory", "local").
    pub provider: String,
    /// Provider-specific configuration.
    #[serde(default)]
    pub config: Value,
}

impl StoreSettings {
    pub fn memory() -> Self {
        Self {
            provider: "memory".to_string(),
            config: Value::Null,
        }
    }

    pub fn local(root: impl AsRef<Path>) -> Self {
        Self {
            provider: "local".to_string(),
            config: serde_json::json!({ "root": root.as_ref().to_string_lossy() }),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::memory()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockboxConfig {
    /// Key derivation parameters. Changing them changes every user's key.
    #[serde(default)]
    pub kdf: KdfParams,
    #[serde(default)]
    pub store: StoreSettings,
    /// Snapshots buffered per watch before the producer waits.
    #[serde(default = "default_subscription_buffer")]
    pub subscription_buffer: usize,
}

fn default_subscription_buffer() -> usize {
    DEFAULT_SUBSCRIPTION_BUFFER
}

impl Default for LockboxConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            store: StoreSettings::default(),
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        }
    }
}

impl LockboxConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load configuration from a file.
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `Serialization` if it is not valid configuration JSON
    /// - `InvalidInput` if a value is out of range
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Write configuration to a file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Point the store at a local directory, replacing the configured store.
    pub fn with_store_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.store = StoreSettings::local(root.into());
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.subscription_buffer == 0 {
            return Err(Error::InvalidInput(
                "subscription_buffer must be at least 1".to_string(),
            ));
        }
        if self.store.provider.trim().is_empty() {
            return Err(Error::InvalidInput("store provider is required".to_string()));
        }
        if self.kdf.memory_cost == 0 || self.kdf.time_cost == 0 || self.kdf.parallelism == 0 {
            return Err(Error::InvalidInput(
                "KDF parameters must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the configured store.
    pub fn open_store(&self, registry: &StoreRegistry) -> Result<Arc<dyn DocumentStore>> {
        registry.resolve(&self.store.provider, self.store.config.clone())
    }
}
