//! Account manager.
//!
//! [`AccountManager`] manages accounts of a single type: it creates and
//! deletes them (synchronously or on the blocking pool), stores passwords,
//! auth tokens and data through a [`SecureStore`], and reports lifecycle
//! events to registered [`AccountWatcher`]s from a dedicated dispatcher task.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use keyward_core::{AccountManager, MemoryAccountStore, UserAccount};
//!
//! let manager = AccountManager::builder("com.example", Arc::new(MemoryAccountStore::new()))
//!     .build()?;
//!
//! let alice = UserAccount::new("alice")
//!     .with_password("p1")
//!     .with_auth_token("refresh", "r-1");
//! assert!(manager.create_account(&alice));
//!
//! let account = manager.find_account(&alice)?.unwrap();
//! assert!(manager.is_authenticated(&account, "refresh"));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::account::{Account, AccountErrorCode, DataBundle, UserAccount};
use crate::config::ManagerConfig;
use crate::crypto::Crypto;
use crate::dispatch::{Notification, Notifier, TaskResult};
use crate::store::{AccountStore, SecureStore};
use crate::watcher::{AccountWatcher, WatcherRegistry};
use crate::{Error, Result};

/// Manages accounts of one account type.
///
/// Cheap to clone; clones share the store, crypto configuration and
/// watchers.
///
/// The synchronous operations block the calling thread for the duration of
/// the store I/O. Do not call them from inside a watcher callback: that would
/// stall every pending notification.
#[derive(Clone)]
pub struct AccountManager {
    inner: Arc<Inner>,
}

struct Inner {
    account_type: String,
    store: SecureStore,
    watchers: Arc<WatcherRegistry>,
    notifier: Notifier,
    runtime: Handle,
}

impl Inner {
    /// Replace-or-create. `Ok(false)` means the store refused registration.
    fn create(&self, user: &UserAccount) -> Result<bool> {
        let account = user.account(&self.account_type);

        match self.delete(user) {
            Ok(true) => debug!("Replacing existing {account}"),
            Ok(false) => {}
            Err(e) => debug!("Ignoring failed removal of previous {account}: {e}"),
        }

        if !self
            .store
            .add_account(&account, user.password.as_deref(), user.data_bundle.as_ref())?
        {
            warn!("Store refused to register {account}");
            return Ok(false);
        }

        for (token_type, token) in user.declared_tokens() {
            if let Err(e) = self.store.set_auth_token(&account, token_type, Some(token)) {
                warn!("Failed to store {token_type} token for {account}: {e}");
            }
        }

        info!("Created {account}");
        Ok(true)
    }

    /// `Ok(false)` means there was nothing to delete or the store refused.
    fn delete(&self, user: &UserAccount) -> Result<bool> {
        let Some(account) = self.store.find_account(&self.account_type, &user.name)? else {
            debug!("No {} account named {} to delete", self.account_type, user.name);
            return Ok(false);
        };

        // Tokens must be read before removal to be invalidated afterwards.
        let tokens: Vec<String> = user
            .auth_token_types
            .iter()
            .filter_map(|token_type| {
                self.store
                    .peek_auth_token(&account, token_type)
                    .unwrap_or_else(|e| {
                        debug!("Could not read {token_type} token of {account}: {e}");
                        None
                    })
            })
            .collect();

        if !self.store.remove_account(&account)? {
            warn!("Store refused to remove {account}");
            return Ok(false);
        }

        if let Err(e) = self.store.clear_password(&account) {
            debug!("Password cleanup for {account} skipped: {e}");
        }
        for token in &tokens {
            if let Err(e) = self
                .store
                .invalidate_auth_token(&account.account_type, token)
            {
                warn!("Failed to invalidate token of {account}: {e}");
            }
        }

        info!("Deleted {account}");
        Ok(true)
    }
}

impl AccountManager {
    /// Starts building a manager for `account_type` on top of `store`.
    #[must_use]
    pub fn builder(
        account_type: impl Into<String>,
        store: Arc<dyn AccountStore>,
    ) -> AccountManagerBuilder {
        AccountManagerBuilder::new(account_type, store)
    }

    /// Builds a manager from configuration on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the store cannot be
    /// opened, or no runtime is running.
    pub fn from_config(config: &ManagerConfig) -> Result<Self> {
        config.validate()?;
        let store = config.store.open()?;
        Self::builder(config.account_type.clone(), store).build()
    }

    /// Account type managed by this instance.
    #[must_use]
    pub fn account_type(&self) -> &str {
        &self.inner.account_type
    }

    /// Registers a watcher. Returns `false` if it was already registered.
    pub fn register_watcher(&self, watcher: Arc<dyn AccountWatcher>) -> bool {
        self.inner.watchers.register(watcher)
    }

    /// Unregisters a watcher. Returns `false` if it was not registered.
    pub fn unregister_watcher(&self, watcher: &Arc<dyn AccountWatcher>) -> bool {
        self.inner.watchers.unregister(watcher)
    }

    /// Sets the capability for data keys; `None` stores keys as given.
    pub fn set_key_crypto(&self, crypto: Option<Arc<dyn Crypto>>) {
        self.inner.store.set_key_crypto(crypto);
    }

    /// Sets the capability for data values and passwords; `None` stores them
    /// as given.
    pub fn set_value_crypto(&self, crypto: Option<Arc<dyn Crypto>>) {
        self.inner.store.set_value_crypto(crypto);
    }

    /// Creates the account for `user`, replacing any account with the same
    /// name.
    ///
    /// Returns `false` if the store refused or failed the registration; the
    /// cause is logged. On success watchers receive
    /// [`AccountWatcher::on_account_created`].
    pub fn create_account(&self, user: &UserAccount) -> bool {
        match self.inner.create(user) {
            Ok(true) => {
                self.inner.notifier.post(Notification::Created(user.clone()));
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("Failed to create account {}: {e}", user.name);
                false
            }
        }
    }

    /// Runs [`Self::create_account`] on the blocking pool.
    ///
    /// Watchers receive either `on_account_created` or `on_account_error`
    /// with [`AccountErrorCode::CreateAccountFailed`]. The returned handle
    /// resolves once the notification is queued; dropping it does not cancel
    /// the operation.
    pub fn create_account_async(&self, user: UserAccount) -> JoinHandle<()> {
        self.spawn_task(
            user,
            AccountErrorCode::CreateAccountFailed,
            Inner::create,
            Notification::Created,
        )
    }

    /// Deletes the account matching `user`'s name.
    ///
    /// Returns `false` if no such account exists or the store refused the
    /// removal. After removal the password is cleared and the tokens of
    /// every declared token type are invalidated; those cleanup steps are
    /// best-effort. On success watchers receive
    /// [`AccountWatcher::on_account_deleted`].
    pub fn delete_account(&self, user: &UserAccount) -> bool {
        match self.inner.delete(user) {
            Ok(true) => {
                self.inner.notifier.post(Notification::Deleted(user.clone()));
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("Failed to delete account {}: {e}", user.name);
                false
            }
        }
    }

    /// Runs [`Self::delete_account`] on the blocking pool.
    ///
    /// Watchers receive either `on_account_deleted` or `on_account_error`
    /// with [`AccountErrorCode::DeleteAccountFailed`].
    pub fn delete_account_async(&self, user: UserAccount) -> JoinHandle<()> {
        self.spawn_task(
            user,
            AccountErrorCode::DeleteAccountFailed,
            Inner::delete,
            Notification::Deleted,
        )
    }

    fn spawn_task(
        &self,
        user: UserAccount,
        code: AccountErrorCode,
        operation: fn(&Inner, &UserAccount) -> Result<bool>,
        success: fn(UserAccount) -> Notification,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            let worker = Arc::clone(&inner);
            let task_user = user.clone();
            let outcome = task::spawn_blocking(move || operation(&worker, &task_user)).await;
            let result = TaskResult::new(user, code, outcome);
            inner.notifier.post(result.into_notification(success));
        })
    }

    /// Looks up the account for `user` by linear scan of this type.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn find_account(&self, user: &UserAccount) -> Result<Option<Account>> {
        self.inner
            .store
            .find_account(&self.inner.account_type, &user.name)
    }

    /// All accounts of this type.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn accounts(&self) -> Result<Vec<Account>> {
        self.inner.store.accounts_by_type(&self.inner.account_type)
    }

    /// Stores an auth token as given; `None` removes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the account is missing or the store write fails.
    pub fn set_auth_token(
        &self,
        account: &Account,
        token_type: &str,
        token: Option<&str>,
    ) -> Result<()> {
        self.inner.store.set_auth_token(account, token_type, token)
    }

    /// Whether a non-empty token of `token_type` is cached for `account`.
    ///
    /// A failing store read counts as not authenticated.
    #[must_use]
    pub fn is_authenticated(&self, account: &Account, token_type: &str) -> bool {
        match self.peek_auth_token(account, token_type) {
            Ok(token) => token.is_some_and(|t| !t.is_empty()),
            Err(e) => {
                warn!("Failed to read {token_type} token of {account}: {e}");
                false
            }
        }
    }

    /// Cached auth token of `token_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn peek_auth_token(&self, account: &Account, token_type: &str) -> Result<Option<String>> {
        self.inner.store.peek_auth_token(account, token_type)
    }

    /// Invalidates `token` for every account of `account`'s type.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn invalidate_auth_token(&self, account: &Account, token: &str) -> Result<()> {
        self.inner
            .store
            .invalidate_auth_token(&account.account_type, token)
    }

    /// Encrypts and stores a password; `None` removes it.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails, the account is missing, or the
    /// store write fails.
    pub fn set_password(&self, account: &Account, password: Option<&str>) -> Result<()> {
        self.inner.store.set_password(account, password)
    }

    /// Decrypted password, `None` if unset or the account is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read or decryption fails.
    pub fn get_password(&self, account: &Account) -> Result<Option<String>> {
        self.inner.store.password(account)
    }

    /// Forgets the password.
    ///
    /// # Errors
    ///
    /// Returns an error if the account is missing or the store write fails.
    pub fn clear_password(&self, account: &Account) -> Result<()> {
        self.inner.store.clear_password(account)
    }

    /// Stores `value` under `key`, both encrypted; `None` removes the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if a transform fails, the account is missing, or the
    /// store write fails.
    pub fn set_data(&self, account: &Account, key: &str, value: Option<&str>) -> Result<()> {
        self.inner.store.set_data(account, key, value)
    }

    /// Decrypted value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read or a transform fails.
    pub fn get_data(&self, account: &Account, key: &str) -> Result<Option<String>> {
        self.inner.store.data(account, key)
    }

    /// [`Self::set_data`] for every entry of `bundle`.
    ///
    /// Not transactional: entries written before a failure stay written.
    ///
    /// # Errors
    ///
    /// Returns the first failing entry's error.
    pub fn set_data_bundle(&self, account: &Account, bundle: &DataBundle) -> Result<()> {
        if bundle.is_empty() {
            return Ok(());
        }
        for (key, value) in bundle {
            self.set_data(account, key, Some(value))?;
        }
        Ok(())
    }

    /// [`Self::get_data`] for every key; missing keys map to `None`.
    ///
    /// # Errors
    ///
    /// Returns the first failing lookup's error.
    pub fn get_data_bundle(
        &self,
        account: &Account,
        keys: &[&str],
    ) -> Result<BTreeMap<String, Option<String>>> {
        keys.iter()
            .map(|key| -> Result<(String, Option<String>)> {
                Ok(((*key).to_string(), self.get_data(account, key)?))
            })
            .collect()
    }
}

impl std::fmt::Debug for AccountManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountManager")
            .field("account_type", &self.inner.account_type)
            .field("store", &self.inner.store)
            .field("watchers", &self.inner.watchers)
            .finish_non_exhaustive()
    }
}

/// Builder for [`AccountManager`].
pub struct AccountManagerBuilder {
    account_type: String,
    store: Arc<dyn AccountStore>,
    runtime: Option<Handle>,
    key_crypto: Option<Arc<dyn Crypto>>,
    value_crypto: Option<Arc<dyn Crypto>>,
}

impl AccountManagerBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(account_type: impl Into<String>, store: Arc<dyn AccountStore>) -> Self {
        Self {
            account_type: account_type.into(),
            store,
            runtime: None,
            key_crypto: None,
            value_crypto: None,
        }
    }

    /// Runtime that hosts the dispatcher and background tasks. Defaults to
    /// the runtime `build` is called from.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Sets the key crypto capability.
    #[must_use]
    pub fn key_crypto(mut self, crypto: Arc<dyn Crypto>) -> Self {
        self.key_crypto = Some(crypto);
        self
    }

    /// Sets the value crypto capability.
    #[must_use]
    pub fn value_crypto(mut self, crypto: Arc<dyn Crypto>) -> Self {
        self.value_crypto = Some(crypto);
        self
    }

    /// Builds the manager and spawns its notification dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the account type is blank or no runtime was given
    /// and none is running.
    pub fn build(self) -> Result<AccountManager> {
        if self.account_type.trim().is_empty() {
            return Err(Error::Config("account type must not be empty".to_string()));
        }
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()?,
        };

        let store = SecureStore::new(self.store);
        store.set_key_crypto(self.key_crypto);
        store.set_value_crypto(self.value_crypto);

        let watchers = Arc::new(WatcherRegistry::new());
        let notifier = Notifier::spawn(&runtime, Arc::clone(&watchers));
        debug!("Account manager ready for type {}", self.account_type);

        Ok(AccountManager {
            inner: Arc::new(Inner {
                account_type: self.account_type,
                store,
                watchers,
                notifier,
                runtime,
            }),
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
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

    use super::*;
    use crate::account::AccountError;
    use crate::crypto::CryptoResult;
    use crate::store::{MemoryAccountStore, StoreError, StoreResult};

    const TYPE: &str = "com.example.account";

    /// Rotates ASCII letters by 13.
    struct Rot13;

    fn rot13(input: &str) -> String {
        input
            .chars()
            .map(|c| match c {
                'a'..='m' | 'A'..='M' => (c as u8 + 13) as char,
                'n'..='z' | 'N'..='Z' => (c as u8 - 13) as char,
                _ => c,
            })
            .collect()
    }

    impl Crypto for Rot13 {
        fn encrypt(&self, plaintext: &str) -> CryptoResult<String> {
            Ok(rot13(plaintext))
        }

        fn decrypt(&self, ciphertext: &str) -> CryptoResult<String> {
            Ok(rot13(ciphertext))
        }
    }

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Created(String),
        Deleted(String),
        Error(String, AccountErrorCode),
    }

    struct Recorder(Mutex<UnboundedSender<Event>>);

    impl Recorder {
        fn new() -> (Arc<Self>, UnboundedReceiver<Event>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self(Mutex::new(tx))), rx)
        }

        fn send(&self, event: Event) {
            let _ = self.0.lock().unwrap().send(event);
        }
    }

    impl AccountWatcher for Recorder {
        fn on_account_created(&self, account: &UserAccount) {
            self.send(Event::Created(account.name.clone()));
        }

        fn on_account_deleted(&self, account: &UserAccount) {
            self.send(Event::Deleted(account.name.clone()));
        }

        fn on_account_error(&self, account: &UserAccount, error: &AccountError) {
            self.send(Event::Error(account.name.clone(), error.code()));
        }
    }

    /// Store that refuses every registration and removal.
    #[derive(Default)]
    struct Refusing(MemoryAccountStore);

    impl AccountStore for Refusing {
        fn add_account(&self, _: &Account, _: Option<&str>, _: &DataBundle) -> StoreResult<bool> {
            Ok(false)
        }
        fn remove_account(&self, _: &Account) -> StoreResult<bool> {
            Ok(false)
        }
        fn accounts_by_type(&self, account_type: &str) -> StoreResult<Vec<Account>> {
            Ok(vec![Account::new("alice", account_type)])
        }
        fn password(&self, account: &Account) -> StoreResult<Option<String>> {
            self.0.password(account)
        }
        fn set_password(&self, account: &Account, password: Option<&str>) -> StoreResult<()> {
            self.0.set_password(account, password)
        }
        fn user_data(&self, account: &Account, key: &str) -> StoreResult<Option<String>> {
            self.0.user_data(account, key)
        }
        fn set_user_data(&self, a: &Account, k: &str, v: Option<&str>) -> StoreResult<()> {
            self.0.set_user_data(a, k, v)
        }
        fn set_auth_token(&self, a: &Account, t: &str, v: Option<&str>) -> StoreResult<()> {
            self.0.set_auth_token(a, t, v)
        }
        fn peek_auth_token(&self, a: &Account, t: &str) -> StoreResult<Option<String>> {
            self.0.peek_auth_token(a, t)
        }
        fn invalidate_auth_token(&self, t: &str, token: &str) -> StoreResult<()> {
            self.0.invalidate_auth_token(t, token)
        }
    }

    /// Memory store with switchable failures.
    #[derive(Default)]
    struct Faulty {
        inner: MemoryAccountStore,
        /// Every call fails.
        broken: bool,
        /// Password writes and token invalidation fail.
        failing_cleanup: bool,
        /// Number of data writes that succeed before the rest fail.
        data_write_budget: Option<usize>,
        data_writes: AtomicUsize,
    }

    impl Faulty {
        fn broken() -> Self {
            Self {
                broken: true,
                ..Self::default()
            }
        }

        fn failing_cleanup() -> Self {
            Self {
                failing_cleanup: true,
                ..Self::default()
            }
        }

        fn with_data_write_budget(budget: usize) -> Self {
            Self {
                data_write_budget: Some(budget),
                ..Self::default()
            }
        }

        fn check(&self) -> StoreResult<&MemoryAccountStore> {
            if self.broken {
                return Err(StoreError::Poisoned);
            }
            Ok(&self.inner)
        }

        fn check_cleanup(&self) -> StoreResult<&MemoryAccountStore> {
            if self.failing_cleanup {
                return Err(StoreError::Poisoned);
            }
            self.check()
        }
    }

    impl AccountStore for Faulty {
        fn add_account(&self, a: &Account, p: Option<&str>, d: &DataBundle) -> StoreResult<bool> {
            self.check()?.add_account(a, p, d)
        }
        fn remove_account(&self, a: &Account) -> StoreResult<bool> {
            self.check()?.remove_account(a)
        }
        fn accounts_by_type(&self, account_type: &str) -> StoreResult<Vec<Account>> {
            self.check()?.accounts_by_type(account_type)
        }
        fn password(&self, account: &Account) -> StoreResult<Option<String>> {
            self.check()?.password(account)
        }
        fn set_password(&self, account: &Account, password: Option<&str>) -> StoreResult<()> {
            self.check_cleanup()?.set_password(account, password)
        }
        fn user_data(&self, account: &Account, key: &str) -> StoreResult<Option<String>> {
            self.check()?.user_data(account, key)
        }
        fn set_user_data(&self, a: &Account, k: &str, v: Option<&str>) -> StoreResult<()> {
            let store = self.check()?;
            let written = self.data_writes.fetch_add(1, Ordering::SeqCst);
            if self.data_write_budget.is_some_and(|budget| written >= budget) {
                return Err(StoreError::Poisoned);
            }
            store.set_user_data(a, k, v)
        }
        fn set_auth_token(&self, a: &Account, t: &str, v: Option<&str>) -> StoreResult<()> {
            self.check()?.set_auth_token(a, t, v)
        }
        fn peek_auth_token(&self, a: &Account, t: &str) -> StoreResult<Option<String>> {
            self.check()?.peek_auth_token(a, t)
        }
        fn invalidate_auth_token(&self, t: &str, token: &str) -> StoreResult<()> {
            self.check_cleanup()?.invalidate_auth_token(t, token)
        }
    }

    fn manager_with(store: Arc<dyn AccountStore>) -> AccountManager {
        AccountManager::builder(TYPE, store).build().unwrap()
    }

    fn manager() -> (AccountManager, Arc<MemoryAccountStore>) {
        let store = Arc::new(MemoryAccountStore::new());
        (manager_with(store.clone()), store)
    }

    mod builder_tests {
        use super::*;

        #[test]
        fn build_without_runtime_fails() {
            let result = AccountManager::builder(TYPE, Arc::new(MemoryAccountStore::new())).build();
            assert!(matches!(result, Err(Error::Runtime(_))));
        }

        #[test]
        fn build_with_explicit_runtime() {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let manager = AccountManager::builder(TYPE, Arc::new(MemoryAccountStore::new()))
                .runtime(runtime.handle().clone())
                .build()
                .unwrap();
            assert_eq!(manager.account_type(), TYPE);
        }

        #[tokio::test]
        async fn blank_account_type_is_rejected() {
            let result = AccountManager::builder(" ", Arc::new(MemoryAccountStore::new())).build();
            assert!(matches!(result, Err(Error::Config(_))));
        }

        #[tokio::test]
        async fn builder_crypto_applies() {
            let store = Arc::new(MemoryAccountStore::new());
            let manager = AccountManager::builder(TYPE, store.clone())
                .key_crypto(Arc::new(Rot13))
                .value_crypto(Arc::new(Rot13))
                .build()
                .unwrap();
            let alice = UserAccount::new("alice").with_data("role", "admin");
            assert!(manager.create_account(&alice));

            let raw = store.raw_data(&Account::new("alice", TYPE)).unwrap().unwrap();
            assert_eq!(raw["ebyr"], "nqzva");
        }

        #[tokio::test]
        async fn from_config() {
            let manager = AccountManager::from_config(&ManagerConfig::new(TYPE)).unwrap();
            assert_eq!(manager.account_type(), TYPE);
            assert!(manager.accounts().unwrap().is_empty());
        }
    }

    mod create_tests {
        use super::*;

        #[tokio::test]
        async fn create_stores_everything() {
            let (manager, _store) = manager();
            let alice = UserAccount::new("alice")
                .with_password("p1")
                .with_data("role", "admin")
                .with_auth_token("refresh", "r-1");

            assert!(manager.create_account(&alice));
            let account = manager.find_account(&alice).unwrap().unwrap();
            assert_eq!(manager.get_password(&account).unwrap().as_deref(), Some("p1"));
            assert_eq!(
                manager.get_data(&account, "role").unwrap().as_deref(),
                Some("admin")
            );
            assert!(manager.is_authenticated(&account, "refresh"));
        }

        #[tokio::test]
        async fn create_replaces_existing() {
            let (manager, store) = manager();
            assert!(manager.create_account(&UserAccount::new("alice").with_data("v", "1")));
            assert!(manager.create_account(&UserAccount::new("alice").with_data("v", "2")));

            assert_eq!(store.len().unwrap(), 1);
            let account = Account::new("alice", TYPE);
            assert_eq!(manager.get_data(&account, "v").unwrap().as_deref(), Some("2"));
        }

        #[tokio::test]
        async fn create_notifies_off_thread() {
            let (manager, _store) = manager();
            let (recorder, mut events) = Recorder::new();
            manager.register_watcher(recorder);

            assert!(manager.create_account(&UserAccount::new("alice")));
            assert_eq!(events.recv().await.unwrap(), Event::Created("alice".into()));
        }

        #[tokio::test]
        async fn refused_registration_returns_false() {
            let manager = manager_with(Arc::new(Refusing::default()));
            let (recorder, mut events) = Recorder::new();
            manager.register_watcher(recorder);

            assert!(!manager.create_account(&UserAccount::new("alice")));
            tokio::task::yield_now().await;
            assert!(events.try_recv().is_err());
        }

        #[tokio::test]
        async fn async_create_reports_refusal_as_error() {
            let manager = manager_with(Arc::new(Refusing::default()));
            let (recorder, mut events) = Recorder::new();
            manager.register_watcher(recorder);

            manager
                .create_account_async(UserAccount::new("alice"))
                .await
                .unwrap();
            assert_eq!(
                events.recv().await.unwrap(),
                Event::Error("alice".into(), AccountErrorCode::CreateAccountFailed)
            );
        }
    }

    mod delete_tests {
        use super::*;

        #[tokio::test]
        async fn delete_missing_is_noop() {
            let (manager, store) = manager();
            let (recorder, mut events) = Recorder::new();
            manager.register_watcher(recorder);

            assert!(!manager.delete_account(&UserAccount::new("ghost")));
            assert!(store.is_empty().unwrap());
            tokio::task::yield_now().await;
            assert!(events.try_recv().is_err());
        }

        #[tokio::test]
        async fn delete_invalidates_tokens_of_declared_types() {
            let (manager, _store) = manager();
            let alice = UserAccount::new("alice").with_auth_token("refresh", "shared");
            // Another account holding the same token loses it too.
            let bob = UserAccount::new("bob").with_auth_token("refresh", "shared");
            manager.create_account(&alice);
            manager.create_account(&bob);

            assert!(manager.delete_account(&alice));
            let bob_account = Account::new("bob", TYPE);
            assert!(!manager.is_authenticated(&bob_account, "refresh"));
        }

        #[tokio::test]
        async fn delete_notifies() {
            let (manager, _store) = manager();
            let (recorder, mut events) = Recorder::new();
            manager.register_watcher(recorder);
            let alice = UserAccount::new("alice");

            manager.create_account(&alice);
            manager.delete_account(&alice);
            assert_eq!(events.recv().await.unwrap(), Event::Created("alice".into()));
            assert_eq!(events.recv().await.unwrap(), Event::Deleted("alice".into()));
        }

        #[tokio::test]
        async fn failed_cleanup_still_deletes() {
            let store = Arc::new(Faulty::failing_cleanup());
            let manager = manager_with(store.clone());
            let (recorder, mut events) = Recorder::new();
            manager.register_watcher(recorder);
            let alice = UserAccount::new("alice")
                .with_password("p1")
                .with_auth_token("refresh", "r-1");

            assert!(manager.create_account(&alice));
            assert!(manager.delete_account(&alice));
            assert_eq!(events.recv().await.unwrap(), Event::Created("alice".into()));
            assert_eq!(events.recv().await.unwrap(), Event::Deleted("alice".into()));
            assert!(store.accounts_by_type(TYPE).unwrap().is_empty());
        }

        #[tokio::test]
        async fn refused_removal_returns_false() {
            let manager = manager_with(Arc::new(Refusing::default()));
            assert!(!manager.delete_account(&UserAccount::new("alice")));
        }

        #[tokio::test]
        async fn async_delete_of_missing_reports_error() {
            let (manager, _store) = manager();
            let (recorder, mut events) = Recorder::new();
            manager.register_watcher(recorder);

            manager
                .delete_account_async(UserAccount::new("ghost"))
                .await
                .unwrap();
            assert_eq!(
                events.recv().await.unwrap(),
                Event::Error("ghost".into(), AccountErrorCode::DeleteAccountFailed)
            );
        }

        #[tokio::test]
        async fn store_failure_returns_false() {
            let manager = manager_with(Arc::new(Faulty::broken()));
            assert!(!manager.delete_account(&UserAccount::new("alice")));
            assert!(manager.find_account(&UserAccount::new("alice")).is_err());
        }
    }

    mod credential_tests {
        use super::*;

        #[tokio::test]
        async fn password_round_trip_with_crypto() {
            let (manager, store) = manager();
            manager.set_value_crypto(Some(Arc::new(Rot13)));
            manager.create_account(&UserAccount::new("alice"));
            let account = Account::new("alice", TYPE);

            manager.set_password(&account, Some("secret")).unwrap();
            assert_eq!(store.password(&account).unwrap().as_deref(), Some("frperg"));
            assert_eq!(
                manager.get_password(&account).unwrap().as_deref(),
                Some("secret")
            );

            manager.clear_password(&account).unwrap();
            assert_eq!(manager.get_password(&account).unwrap(), None);
        }

        #[tokio::test]
        async fn tokens() {
            let (manager, _store) = manager();
            manager.create_account(&UserAccount::new("alice"));
            let account = Account::new("alice", TYPE);

            assert!(!manager.is_authenticated(&account, "access"));
            manager.set_auth_token(&account, "access", Some("")).unwrap();
            assert!(!manager.is_authenticated(&account, "access"));

            manager.set_auth_token(&account, "access", Some("a-1")).unwrap();
            assert!(manager.is_authenticated(&account, "access"));
            assert_eq!(
                manager.peek_auth_token(&account, "access").unwrap().as_deref(),
                Some("a-1")
            );

            manager.invalidate_auth_token(&account, "a-1").unwrap();
            assert_eq!(manager.peek_auth_token(&account, "access").unwrap(), None);
        }

        #[tokio::test]
        async fn store_errors_mean_not_authenticated() {
            let manager = manager_with(Arc::new(Faulty::broken()));
            assert!(!manager.is_authenticated(&Account::new("alice", TYPE), "refresh"));
        }

        #[tokio::test]
        async fn writes_to_missing_account_fail() {
            let (manager, _store) = manager();
            let ghost = Account::new("ghost", TYPE);
            assert!(matches!(
                manager.set_password(&ghost, Some("p")),
                Err(Error::Store(StoreError::AccountNotFound(_)))
            ));
            assert!(manager.set_data(&ghost, "k", Some("v")).is_err());
        }
    }

    mod data_tests {
        use super::*;

        #[tokio::test]
        async fn bundle_round_trip() {
            let (manager, _store) = manager();
            manager.set_key_crypto(Some(Arc::new(Rot13)));
            manager.set_value_crypto(Some(Arc::new(Rot13)));
            manager.create_account(&UserAccount::new("alice"));
            let account = Account::new("alice", TYPE);

            let mut bundle = DataBundle::new();
            bundle.insert("role".into(), "admin".into());
            bundle.insert("team".into(), "core".into());
            manager.set_data_bundle(&account, &bundle).unwrap();

            let read = manager
                .get_data_bundle(&account, &["role", "team", "missing"])
                .unwrap();
            assert_eq!(read.len(), 3);
            assert_eq!(read["role"].as_deref(), Some("admin"));
            assert_eq!(read["team"].as_deref(), Some("core"));
            assert_eq!(read["missing"], None);
        }

        #[tokio::test]
        async fn empty_bundles_skip_the_store() {
            // Every call to this store fails, so success means it was not called.
            let manager = manager_with(Arc::new(Faulty::broken()));
            let ghost = Account::new("ghost", TYPE);
            assert!(manager.set_data_bundle(&ghost, &DataBundle::new()).is_ok());
            assert!(manager.get_data_bundle(&ghost, &[]).unwrap().is_empty());
            assert!(manager.get_data_bundle(&ghost, &["k"]).is_err());
        }

        #[tokio::test]
        async fn bundle_write_keeps_entries_before_failure() {
            let manager = manager_with(Arc::new(Faulty::with_data_write_budget(1)));
            manager.create_account(&UserAccount::new("alice"));
            let account = Account::new("alice", TYPE);

            let mut bundle = DataBundle::new();
            bundle.insert("a".into(), "1".into());
            bundle.insert("b".into(), "2".into());
            assert!(manager.set_data_bundle(&account, &bundle).is_err());

            assert_eq!(manager.get_data(&account, "a").unwrap().as_deref(), Some("1"));
            assert_eq!(manager.get_data(&account, "b").unwrap(), None);
        }

        #[tokio::test]
        async fn remove_single_entry() {
            let (manager, _store) = manager();
            manager.create_account(&UserAccount::new("alice").with_data("k", "v"));
            let account = Account::new("alice", TYPE);
            manager.set_data(&account, "k", None).unwrap();
            assert_eq!(manager.get_data(&account, "k").unwrap(), None);
        }
    }
}
