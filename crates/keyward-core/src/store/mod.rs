//! Account persistence.
//!
//! [`AccountStore`] is the boundary to the platform's account service. All
//! values crossing it are already in their stored (possibly encrypted) form;
//! [`SecureStore`] is the layer that applies the crypto capabilities.

mod file;
mod memory;
mod records;
mod secure;

pub use file::FileAccountStore;
pub use memory::MemoryAccountStore;
pub use secure::SecureStore;

use crate::account::{Account, DataBundle};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A write targeted an account that does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(Account),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A thread panicked while holding the store lock.
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Keyed persistence service for accounts.
///
/// Accounts are keyed by `(name, account_type)`. Reads of a missing account
/// return `Ok(None)`; writes to a missing account fail with
/// [`StoreError::AccountNotFound`]. Implementations must be safe to call
/// from several threads for different accounts.
pub trait AccountStore: Send + Sync {
    /// Registers a new account. Returns `false` if it already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn add_account(
        &self,
        account: &Account,
        password: Option<&str>,
        data: &DataBundle,
    ) -> StoreResult<bool>;

    /// Removes an account with all its data. Returns `false` if it did not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn remove_account(&self, account: &Account) -> StoreResult<bool>;

    /// Lists all accounts of a type.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn accounts_by_type(&self, account_type: &str) -> StoreResult<Vec<Account>>;

    /// Stored password of an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn password(&self, account: &Account) -> StoreResult<Option<String>>;

    /// Replaces the stored password; `None` removes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the account is missing or the store cannot be written.
    fn set_password(&self, account: &Account, password: Option<&str>) -> StoreResult<()>;

    /// Forgets the stored password.
    ///
    /// # Errors
    ///
    /// Returns an error if the account is missing or the store cannot be written.
    fn clear_password(&self, account: &Account) -> StoreResult<()> {
        self.set_password(account, None)
    }

    /// Stored data value for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn user_data(&self, account: &Account, key: &str) -> StoreResult<Option<String>>;

    /// Writes a data value; `None` removes the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the account is missing or the store cannot be written.
    fn set_user_data(&self, account: &Account, key: &str, value: Option<&str>)
    -> StoreResult<()>;

    /// Writes an auth token; `None` removes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the account is missing or the store cannot be written.
    fn set_auth_token(
        &self,
        account: &Account,
        token_type: &str,
        token: Option<&str>,
    ) -> StoreResult<()>;

    /// Cached auth token of a type.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn peek_auth_token(&self, account: &Account, token_type: &str) -> StoreResult<Option<String>>;

    /// Drops `token` from every account of `account_type` holding it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn invalidate_auth_token(&self, account_type: &str, token: &str) -> StoreResult<()>;
}
