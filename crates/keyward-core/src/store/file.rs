//! JSON file backed account store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use super::records::Records;
use super::{AccountStore, StoreError, StoreResult};
use crate::account::{Account, DataBundle};

/// Account store persisted to a single JSON file.
///
/// The whole record set is rewritten after every mutation: first to a
/// sibling temporary file, then renamed over the target. A failed write
/// leaves both the file and the in-memory state unchanged.
#[derive(Debug)]
pub struct FileAccountStore {
    path: PathBuf,
    records: Mutex<Records>,
}

impl FileAccountStore {
    /// Open the store at `path`, creating it on first write if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let records = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let records: Records = serde_json::from_str(&contents)?;
            info!(
                "Loaded {} account(s) from {}",
                records.len(),
                path.display()
            );
            records
        } else {
            debug!("No account file at {}, starting empty", path.display());
            Records::default()
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Records>> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Applies `change` to a copy of the records, persists it, then commits.
    fn mutate<T>(&self, change: impl FnOnce(&mut Records) -> StoreResult<T>) -> StoreResult<T> {
        let mut records = self.lock()?;
        let mut next = records.clone();
        let outcome = change(&mut next)?;
        if next != *records {
            self.persist(&next)?;
            *records = next;
        }
        Ok(outcome)
    }

    fn persist(&self, records: &Records) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Persisted {} account(s) to {}", records.len(), self.path.display());
        Ok(())
    }
}

impl AccountStore for FileAccountStore {
    fn add_account(
        &self,
        account: &Account,
        password: Option<&str>,
        data: &DataBundle,
    ) -> StoreResult<bool> {
        self.mutate(|records| Ok(records.add(account, password, data)))
    }

    fn remove_account(&self, account: &Account) -> StoreResult<bool> {
        self.mutate(|records| Ok(records.remove(account)))
    }

    fn accounts_by_type(&self, account_type: &str) -> StoreResult<Vec<Account>> {
        Ok(self.lock()?.by_type(account_type))
    }

    fn password(&self, account: &Account) -> StoreResult<Option<String>> {
        Ok(self.lock()?.password(account))
    }

    fn set_password(&self, account: &Account, password: Option<&str>) -> StoreResult<()> {
        self.mutate(|records| records.set_password(account, password))
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
        self.mutate(|records| records.set_user_data(account, key, value))
    }

    fn set_auth_token(
        &self,
        account: &Account,
        token_type: &str,
        token: Option<&str>,
    ) -> StoreResult<()> {
        self.mutate(|records| records.set_auth_token(account, token_type, token))
    }

    fn peek_auth_token(&self, account: &Account, token_type: &str) -> StoreResult<Option<String>> {
        Ok(self.lock()?.peek_auth_token(account, token_type))
    }

    fn invalidate_auth_token(&self, account_type: &str, token: &str) -> StoreResult<()> {
        self.mutate(|records| {
            records.invalidate_auth_token(account_type, token);
            Ok(())
        })
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
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAccountStore::open(dir.path().join("accounts.json")).unwrap();
        assert!(store.accounts_by_type("t").unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("accounts.json");
        let account = Account::new("alice", "t");

        {
            let store = FileAccountStore::open(&path).unwrap();
            let mut data = DataBundle::new();
            data.insert("role".to_string(), "admin".to_string());
            assert!(store.add_account(&account, Some("p1"), &data).unwrap());
            store.set_auth_token(&account, "refresh", Some("r1")).unwrap();
        }

        let store = FileAccountStore::open(&path).unwrap();
        assert_eq!(store.accounts_by_type("t").unwrap(), vec![account.clone()]);
        assert_eq!(store.password(&account).unwrap().as_deref(), Some("p1"));
        assert_eq!(
            store.user_data(&account, "role").unwrap().as_deref(),
            Some("admin")
        );
        assert_eq!(
            store.peek_auth_token(&account, "refresh").unwrap().as_deref(),
            Some("r1")
        );
    }

    #[test]
    fn failed_write_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let store = FileAccountStore::open(&path).unwrap();
        let ghost = Account::new("ghost", "t");

        assert!(store.set_password(&ghost, Some("p")).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn remove_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let account = Account::new("alice", "t");

        let store = FileAccountStore::open(&path).unwrap();
        store.add_account(&account, None, &DataBundle::new()).unwrap();
        assert!(store.remove_account(&account).unwrap());
        drop(store);

        let store = FileAccountStore::open(&path).unwrap();
        assert!(store.accounts_by_type("t").unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileAccountStore::open(&path),
            Err(StoreError::Serde(_))
        ));
    }
}
