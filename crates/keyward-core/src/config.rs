//! Manager configuration types.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::{AccountStore, FileAccountStore, MemoryAccountStore};
use crate::{Error, Result};

/// Directory under the platform data dir that holds the default store file.
const APP_DIR: &str = "keyward";

/// File name of the default store.
const STORE_FILE: &str = "accounts.json";

/// Which bundled store adapter backs the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-process store; accounts vanish with the process.
    #[default]
    Memory,
    /// JSON file store at `path`.
    File {
        /// Location of the store file.
        path: PathBuf,
    },
}

impl StoreConfig {
    /// File store in the platform data directory
    /// (e.g. `~/.local/share/keyward/accounts.json` on Linux).
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no data directory.
    pub fn default_file() -> Result<Self> {
        let dir = dirs::data_dir()
            .ok_or_else(|| Error::Config("no data directory on this platform".to_string()))?;
        Ok(Self::File {
            path: dir.join(APP_DIR).join(STORE_FILE),
        })
    }

    /// Opens the configured store.
    ///
    /// # Errors
    ///
    /// Returns an error if a file store cannot be read.
    pub fn open(&self) -> Result<Arc<dyn AccountStore>> {
        let store: Arc<dyn AccountStore> = match self {
            Self::Memory => Arc::new(MemoryAccountStore::new()),
            Self::File { path } => Arc::new(FileAccountStore::open(path.clone())?),
        };
        Ok(store)
    }
}

/// Account manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Account type managed by this instance.
    pub account_type: String,
    /// Backing store.
    #[serde(default)]
    pub store: StoreConfig,
}

impl ManagerConfig {
    /// Creates a configuration for `account_type` backed by memory.
    #[must_use]
    pub fn new(account_type: impl Into<String>) -> Self {
        Self {
            account_type: account_type.into(),
            store: StoreConfig::Memory,
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(account_type: impl Into<String>) -> ManagerConfigBuilder {
        ManagerConfigBuilder::new(account_type)
    }

    /// Checks the configuration for obvious mistakes.
    ///
    /// # Errors
    ///
    /// Returns an error if the account type is blank.
    pub fn validate(&self) -> Result<()> {
        if self.account_type.trim().is_empty() {
            return Err(Error::Config("account type must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Builder for manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfigBuilder {
    account_type: String,
    store: StoreConfig,
}

impl ManagerConfigBuilder {
    /// Creates a new builder for `account_type`.
    #[must_use]
    pub fn new(account_type: impl Into<String>) -> Self {
        Self {
            account_type: account_type.into(),
            store: StoreConfig::Memory,
        }
    }

    /// Sets the store.
    #[must_use]
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Uses a JSON file store at `path`.
    #[must_use]
    pub fn file_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = StoreConfig::File { path: path.into() };
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ManagerConfig {
        ManagerConfig {
            account_type: self.account_type,
            store: self.store,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn new_defaults_to_memory() {
        let config = ManagerConfig::new("com.example");
        assert_eq!(config.account_type, "com.example");
        assert_eq!(config.store, StoreConfig::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_sets_file_store() {
        let config = ManagerConfig::builder("t").file_store("/tmp/a.json").build();
        assert_eq!(
            config.store,
            StoreConfig::File {
                path: PathBuf::from("/tmp/a.json")
            }
        );
    }

    #[test]
    fn blank_account_type_is_rejected() {
        let config = ManagerConfig::new("  ");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn deserializes_with_default_store() {
        let config: ManagerConfig = serde_json::from_str(r#"{"account_type":"t"}"#).unwrap();
        assert_eq!(config.store, StoreConfig::Memory);

        let config: ManagerConfig = serde_json::from_str(
            r#"{"account_type":"t","store":{"kind":"file","path":"/var/lib/a.json"}}"#,
        )
        .unwrap();
        assert_eq!(
            config.store,
            StoreConfig::File {
                path: PathBuf::from("/var/lib/a.json")
            }
        );
    }

    #[test]
    fn default_file_lives_under_app_dir() {
        if let Ok(StoreConfig::File { path }) = StoreConfig::default_file() {
            assert!(path.ends_with("keyward/accounts.json"));
        }
    }

    #[test]
    fn open_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreConfig::File {
            path: dir.path().join("a.json"),
        }
        .open()
        .unwrap();
        assert!(store.accounts_by_type("t").unwrap().is_empty());
    }
}
