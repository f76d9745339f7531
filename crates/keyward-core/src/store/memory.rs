//! In-process account store.

use std::sync::{Mutex, MutexGuard};

use super::records::Records;
use super::{AccountStore, StoreError, StoreResult};
use crate::account::{Account, DataBundle};

/// Account store kept in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    records: Mutex<Records>,
}

impl MemoryAccountStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accounts across all types.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.lock()?.len())
    }

    /// Whether the store holds no accounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Raw stored data for an account, exactly as persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn raw_data(&self, account: &Account) -> StoreResult<Option<DataBundle>> {
        Ok(self.lock()?.get(account).map(|stored| stored.user_data.clone()))
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Records>> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl AccountStore for MemoryAccountStore {
    fn add_account(
        &self,
        account: &Account,
        password: Option<&str>,
        data: &DataBundle,
    ) -> StoreResult<bool> {
        Ok(self.lock()?.add(account, password, data))
    }

    fn remove_account(&self, account: &Account) -> StoreResult<bool> {
        Ok(self.lock()?.remove(account))
    }

    fn accounts_by_type(&self, account_type: &str) -> StoreResult<Vec<Account>> {
        Ok(self.lock()?.by_type(account_type))
    }

    fn password(&self, account: &Account) -> StoreResult<Option<String>> {
        Ok(self.lock()?.password(account))
    }

    fn set_password(&self, account: &Account, password: Option<&str>) -> StoreResult<()> {
        self.lock()?.set_password(account, password)
    }

    fn user_data(&self, account: &Account, key: &str) -> StoreResult<Option<String>> {
        Ok(self.lock()?.user_data(account, key))
    }

    fn set_user_data(
        &self,
        account: &Account,
        key: &str,
        value: Option<&str>,
    ) -> StoreResult<()> {
        self.lock()?.set_user_data(account, key, value)
    }

    fn set_auth_token(
        &self,
        account: &Account,
        token_type: &str,
        token: Option<&str>,
    ) -> StoreResult<()> {
        self.lock()?.set_auth_token(account, token_type, token)
    }

    fn peek_auth_token(&self, account: &Account, token_type: &str) -> StoreResult<Option<String>> {
        Ok(self.lock()?.peek_auth_token(account, token_type))
    }

    fn invalidate_auth_token(&self, account_type: &str, token: &str) -> StoreResult<()> {
        self.lock()?.invalidate_auth_token(account_type, token);
        Ok(())
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
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn add_and_read_back() {
        let store = MemoryAccountStore::new();
        let account = Account::new("alice", "t");
        let mut data = DataBundle::new();
        data.insert("role".to_string(), "admin".to_string());

        assert!(store.add_account(&account, Some("p1"), &data).unwrap());
        assert_eq!(store.password(&account).unwrap().as_deref(), Some("p1"));
        assert_eq!(
            store.user_data(&account, "role").unwrap().as_deref(),
            Some("admin")
        );
        assert_eq!(store.raw_data(&account).unwrap(), Some(data));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn clear_password_uses_default() {
        let store = MemoryAccountStore::new();
        let account = Account::new("alice", "t");
        store
            .add_account(&account, Some("p1"), &DataBundle::new())
            .unwrap();
        store.clear_password(&account).unwrap();
        assert_eq!(store.password(&account).unwrap(), None);
    }

    #[test]
    fn reads_of_missing_account_are_empty() {
        let store = MemoryAccountStore::new();
        let account = Account::new("ghost", "t");
        assert!(store.is_empty().unwrap());
        assert_eq!(store.password(&account).unwrap(), None);
        assert_eq!(store.user_data(&account, "k").unwrap(), None);
        assert_eq!(store.peek_auth_token(&account, "refresh").unwrap(), None);
        assert!(!store.remove_account(&account).unwrap());
    }

    #[test]
    fn concurrent_adds_of_distinct_accounts() {
        let store = Arc::new(MemoryAccountStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let account = Account::new(format!("user-{i}"), "t");
                    store.add_account(&account, None, &DataBundle::new()).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(store.accounts_by_type("t").unwrap().len(), 8);
    }
}
