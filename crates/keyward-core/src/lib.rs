//! # keyward-core
//!
//! Account lifecycle and credential management for one account type.
//!
//! This crate provides:
//! - Account creation and deletion, blocking or on the tokio blocking pool
//! - Password, auth token and key/value data storage
//! - Pluggable crypto for stored data keys, values and passwords
//! - Lifecycle notifications delivered to registered watchers
//! - In-memory and JSON file store adapters
//!
//! The entry point is [`AccountManager`]; platform account services plug in
//! through [`AccountStore`] and callers observe changes through
//! [`AccountWatcher`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
pub mod config;
pub mod crypto;
mod dispatch;
mod error;
pub mod manager;
pub mod store;
pub mod watcher;

pub use account::{
    Account, AccountError, AccountErrorCode, DataBundle, Operation, Permission, UserAccount,
};
pub use config::{ManagerConfig, ManagerConfigBuilder, StoreConfig};
pub use crypto::{Crypto, CryptoError, CryptoResult};
pub use error::{Error, Result};
pub use manager::{AccountManager, AccountManagerBuilder};
pub use store::{
    AccountStore, FileAccountStore, MemoryAccountStore, SecureStore, StoreError, StoreResult,
};
pub use watcher::{AccountWatcher, WatcherRegistry};
