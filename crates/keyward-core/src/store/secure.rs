//! Crypto-wrapped façade over an [`AccountStore`].

use std::sync::Arc;

use tracing::{debug, trace};

use super::AccountStore;
use crate::account::{Account, DataBundle};
use crate::crypto::{Crypto, CryptoSlot};
use crate::Result;

/// Store adapter that encrypts data keys, data values and passwords.
///
/// Keys go through the key capability, values and passwords through the
/// value capability. Auth tokens are stored as given. Both capabilities
/// default to pass-through.
pub struct SecureStore {
    store: Arc<dyn AccountStore>,
    key_crypto: CryptoSlot,
    value_crypto: CryptoSlot,
}

impl SecureStore {
    /// Wrap `store` with pass-through crypto.
    #[must_use]
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            store,
            key_crypto: CryptoSlot::new(),
            value_crypto: CryptoSlot::new(),
        }
    }

    /// Sets the capability used for data keys.
    pub fn set_key_crypto(&self, crypto: Option<Arc<dyn Crypto>>) {
        self.key_crypto.set(crypto);
    }

    /// Sets the capability used for data values and passwords.
    pub fn set_value_crypto(&self, crypto: Option<Arc<dyn Crypto>>) {
        self.value_crypto.set(crypto);
    }

    /// Encrypts every key and value of `bundle` into a new bundle.
    fn encrypt_bundle(&self, bundle: &DataBundle) -> Result<DataBundle> {
        bundle
            .iter()
            .map(|(key, value)| -> Result<(String, String)> {
                Ok((
                    self.key_crypto.encrypt(key)?,
                    self.value_crypto.encrypt(value)?,
                ))
            })
            .collect()
    }

    /// Registers `account` with encrypted password and data.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the store write fails.
    pub fn add_account(
        &self,
        account: &Account,
        password: Option<&str>,
        data: Option<&DataBundle>,
    ) -> Result<bool> {
        let password = self.value_crypto.encrypt_opt(password)?;
        let data = match data {
            Some(bundle) => self.encrypt_bundle(bundle)?,
            None => DataBundle::new(),
        };
        trace!("Adding {account} with {} data entries", data.len());
        Ok(self
            .store
            .add_account(account, password.as_deref(), &data)?)
    }

    /// Removes `account`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn remove_account(&self, account: &Account) -> Result<bool> {
        Ok(self.store.remove_account(account)?)
    }

    /// Lists accounts of `account_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn accounts_by_type(&self, account_type: &str) -> Result<Vec<Account>> {
        Ok(self.store.accounts_by_type(account_type)?)
    }

    /// Linear scan of `account_type` for `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn find_account(&self, account_type: &str, name: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts_by_type(account_type)?
            .into_iter()
            .find(|account| account.name == name))
    }

    /// Decrypted password.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read or decryption fails.
    pub fn password(&self, account: &Account) -> Result<Option<String>> {
        let stored = self.store.password(account)?;
        Ok(self.value_crypto.decrypt_opt(stored.as_deref())?)
    }

    /// Encrypts and stores a password; `None` removes it.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the store write fails.
    pub fn set_password(&self, account: &Account, password: Option<&str>) -> Result<()> {
        let password = self.value_crypto.encrypt_opt(password)?;
        self.store.set_password(account, password.as_deref())?;
        Ok(())
    }

    /// Forgets the password.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn clear_password(&self, account: &Account) -> Result<()> {
        self.store.clear_password(account)?;
        Ok(())
    }

    /// Decrypted data value, looked up by encrypted key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read or a transform fails.
    pub fn data(&self, account: &Account, key: &str) -> Result<Option<String>> {
        let stored_key = self.key_crypto.encrypt(key)?;
        let stored = self.store.user_data(account, &stored_key)?;
        Ok(self.value_crypto.decrypt_opt(stored.as_deref())?)
    }

    /// Stores a data value under an encrypted key; `None` removes it.
    ///
    /// # Errors
    ///
    /// Returns an error if a transform or the store write fails.
    pub fn set_data(&self, account: &Account, key: &str, value: Option<&str>) -> Result<()> {
        let stored_key = self.key_crypto.encrypt(key)?;
        let stored_value = self.value_crypto.encrypt_opt(value)?;
        self.store
            .set_user_data(account, &stored_key, stored_value.as_deref())?;
        Ok(())
    }

    /// Stores an auth token as given.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn set_auth_token(
        &self,
        account: &Account,
        token_type: &str,
        token: Option<&str>,
    ) -> Result<()> {
        self.store.set_auth_token(account, token_type, token)?;
        Ok(())
    }

    /// Cached auth token.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn peek_auth_token(&self, account: &Account, token_type: &str) -> Result<Option<String>> {
        Ok(self.store.peek_auth_token(account, token_type)?)
    }

    /// Invalidates `token` for every account of `account_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn invalidate_auth_token(&self, account_type: &str, token: &str) -> Result<()> {
        debug!("Invalidating auth token for type {account_type}");
        self.store.invalidate_auth_token(account_type, token)?;
        Ok(())
    }
}

impl std::fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStore")
            .field("key_crypto", &self.key_crypto)
            .field("value_crypto", &self.value_crypto)
            .finish_non_exhaustive()
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
    use crate::crypto::CryptoResult;
    use crate::store::MemoryAccountStore;

    /// Shifts every char by one code point.
    struct Shift;

    impl Crypto for Shift {
        fn encrypt(&self, plaintext: &str) -> CryptoResult<String> {
            Ok(plaintext
                .chars()
                .map(|c| char::from_u32(c as u32 + 1).unwrap_or(c))
                .collect())
        }

        fn decrypt(&self, ciphertext: &str) -> CryptoResult<String> {
            Ok(ciphertext
                .chars()
                .map(|c| char::from_u32(c as u32 - 1).unwrap_or(c))
                .collect())
        }
    }

    fn setup() -> (Arc<MemoryAccountStore>, SecureStore, Account) {
        let memory = Arc::new(MemoryAccountStore::new());
        let secure = SecureStore::new(memory.clone());
        (memory, secure, Account::new("alice", "t"))
    }

    #[test]
    fn add_account_encrypts_bundle_into_new_map() {
        let (memory, secure, account) = setup();
        secure.set_key_crypto(Some(Arc::new(Shift)));
        secure.set_value_crypto(Some(Arc::new(Shift)));

        let mut data = DataBundle::new();
        data.insert("ab".to_string(), "xy".to_string());
        assert!(secure.add_account(&account, Some("p1"), Some(&data)).unwrap());

        let raw = memory.raw_data(&account).unwrap().unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw["bc"], "yz");
        assert_eq!(memory.password(&account).unwrap().as_deref(), Some("q2"));

        assert_eq!(secure.password(&account).unwrap().as_deref(), Some("p1"));
        assert_eq!(secure.data(&account, "ab").unwrap().as_deref(), Some("xy"));
    }

    #[test]
    fn tokens_are_not_encrypted() {
        let (memory, secure, account) = setup();
        secure.set_value_crypto(Some(Arc::new(Shift)));
        secure.add_account(&account, None, None).unwrap();
        secure.set_auth_token(&account, "refresh", Some("tok")).unwrap();
        assert_eq!(
            memory.peek_auth_token(&account, "refresh").unwrap().as_deref(),
            Some("tok")
        );
    }

    #[test]
    fn pass_through_without_crypto() {
        let (memory, secure, account) = setup();
        secure.add_account(&account, None, None).unwrap();
        secure.set_data(&account, "k", Some("v\u{0}é")).unwrap();
        assert_eq!(
            memory.user_data(&account, "k").unwrap().as_deref(),
            Some("v\u{0}é")
        );
        assert_eq!(secure.data(&account, "k").unwrap().as_deref(), Some("v\u{0}é"));
    }

    #[test]
    fn find_account_scans_by_name() {
        let (_memory, secure, account) = setup();
        secure.add_account(&account, None, None).unwrap();
        secure
            .add_account(&Account::new("bob", "t"), None, None)
            .unwrap();
        assert_eq!(secure.find_account("t", "alice").unwrap(), Some(account));
        assert_eq!(secure.find_account("t", "carol").unwrap(), None);
        assert_eq!(secure.find_account("other", "alice").unwrap(), None);
    }

    #[test]
    fn crypto_swap_garbles_reads() {
        let (_memory, secure, account) = setup();
        secure.add_account(&account, None, None).unwrap();
        secure.set_data(&account, "k", Some("plain")).unwrap();
        secure.set_value_crypto(Some(Arc::new(Shift)));
        assert_eq!(secure.data(&account, "k").unwrap().as_deref(), Some("ok`hm"));
    }
}
