//! Integration tests for the account manager.
//!
//! These drive the public API end to end against the bundled stores, with a
//! recording watcher standing in for the application.

#![allow(clippy::unwrap_used, clippy::similar_names)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

use keyward_core::{
    Account, AccountError, AccountErrorCode, AccountManager, AccountStore, AccountWatcher, Crypto,
    CryptoError, CryptoResult, DataBundle, ManagerConfig, MemoryAccountStore, StoreConfig,
    StoreResult, UserAccount,
};

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

/// Crypto whose encryption always fails.
struct Failing;

impl Crypto for Failing {
    fn encrypt(&self, _plaintext: &str) -> CryptoResult<String> {
        Err(CryptoError::Encrypt("key unavailable".to_string()))
    }

    fn decrypt(&self, _ciphertext: &str) -> CryptoResult<String> {
        Err(CryptoError::Decrypt("key unavailable".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Created(String),
    Deleted(String),
    Error(String, AccountErrorCode),
}

/// Watcher that forwards every callback into a channel.
struct Recorder {
    tx: Mutex<UnboundedSender<Event>>,
}

fn recorder() -> (Arc<Recorder>, UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { tx: Mutex::new(tx) }), rx)
}

impl Recorder {
    fn send(&self, event: Event) {
        let _ = self.tx.lock().unwrap().send(event);
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

/// Memory store that counts every call made to it.
#[derive(Default)]
struct Counting {
    inner: MemoryAccountStore,
    calls: AtomicUsize,
}

impl Counting {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) -> &MemoryAccountStore {
        self.calls.fetch_add(1, Ordering::SeqCst);
        &self.inner
    }
}

impl AccountStore for Counting {
    fn add_account(
        &self,
        account: &Account,
        password: Option<&str>,
        data: &DataBundle,
    ) -> StoreResult<bool> {
        self.hit().add_account(account, password, data)
    }

    fn remove_account(&self, account: &Account) -> StoreResult<bool> {
        self.hit().remove_account(account)
    }

    fn accounts_by_type(&self, account_type: &str) -> StoreResult<Vec<Account>> {
        self.hit().accounts_by_type(account_type)
    }

    fn password(&self, account: &Account) -> StoreResult<Option<String>> {
        self.hit().password(account)
    }

    fn set_password(&self, account: &Account, password: Option<&str>) -> StoreResult<()> {
        self.hit().set_password(account, password)
    }

    fn user_data(&self, account: &Account, key: &str) -> StoreResult<Option<String>> {
        self.hit().user_data(account, key)
    }

    fn set_user_data(&self, account: &Account, key: &str, value: Option<&str>) -> StoreResult<()> {
        self.hit().set_user_data(account, key, value)
    }

    fn set_auth_token(
        &self,
        account: &Account,
        token_type: &str,
        token: Option<&str>,
    ) -> StoreResult<()> {
        self.hit().set_auth_token(account, token_type, token)
    }

    fn peek_auth_token(&self, account: &Account, token_type: &str) -> StoreResult<Option<String>> {
        self.hit().peek_auth_token(account, token_type)
    }

    fn invalidate_auth_token(&self, account_type: &str, token: &str) -> StoreResult<()> {
        self.hit().invalidate_auth_token(account_type, token)
    }
}

fn alice() -> UserAccount {
    UserAccount::new("alice")
        .with_password("p1")
        .with_data("region", "eu")
        .with_auth_token("refresh", "r-1")
}

fn manager() -> (AccountManager, Arc<MemoryAccountStore>) {
    let store = Arc::new(MemoryAccountStore::new());
    let manager = AccountManager::builder(TYPE, store.clone())
        .value_crypto(Arc::new(Rot13))
        .build()
        .unwrap();
    (manager, store)
}

async fn next(events: &mut UnboundedReceiver<Event>) -> Event {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap()
}

async fn assert_quiet(events: &mut UnboundedReceiver<Event>) {
    assert!(
        timeout(Duration::from_millis(100), events.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_create_then_delete() {
    let (manager, store) = manager();
    let (watcher, mut events) = recorder();
    manager.register_watcher(watcher);

    let alice = alice();
    assert!(manager.create_account(&alice));
    assert_eq!(next(&mut events).await, Event::Created("alice".into()));

    let account = manager.find_account(&alice).unwrap().unwrap();
    assert_eq!(account, Account::new("alice", TYPE));
    assert_eq!(store.password(&account).unwrap().as_deref(), Some("c1"));
    assert_eq!(
        manager.get_password(&account).unwrap().as_deref(),
        Some("p1")
    );
    assert_eq!(
        manager.get_data(&account, "region").unwrap().as_deref(),
        Some("eu")
    );
    assert!(manager.is_authenticated(&account, "refresh"));

    assert!(manager.delete_account(&alice));
    assert_eq!(next(&mut events).await, Event::Deleted("alice".into()));
    assert_eq!(manager.get_password(&account).unwrap(), None);
    assert!(!manager.is_authenticated(&account, "refresh"));
    assert!(manager.find_account(&alice).unwrap().is_none());
}

#[tokio::test]
async fn test_create_is_idempotent_replace() {
    let (manager, store) = manager();
    let (watcher, mut events) = recorder();
    manager.register_watcher(watcher);

    assert!(manager.create_account(&alice()));
    assert!(manager.create_account(&alice().with_password("p2")));

    // The replaced account's delete is silent.
    assert_eq!(next(&mut events).await, Event::Created("alice".into()));
    assert_eq!(next(&mut events).await, Event::Created("alice".into()));
    assert_quiet(&mut events).await;

    assert_eq!(store.len().unwrap(), 1);
    let account = Account::new("alice", TYPE);
    assert_eq!(
        manager.get_password(&account).unwrap().as_deref(),
        Some("p2")
    );
}

#[tokio::test]
async fn test_delete_missing_account() {
    let (manager, _store) = manager();
    let (watcher, mut events) = recorder();
    manager.register_watcher(watcher);

    assert!(!manager.delete_account(&UserAccount::new("ghost")));
    assert_quiet(&mut events).await;
}

#[tokio::test]
async fn test_double_registration() {
    let (manager, _store) = manager();
    let (watcher, mut events) = recorder();
    assert!(manager.register_watcher(watcher.clone()));
    assert!(!manager.register_watcher(watcher.clone()));

    manager.create_account(&alice());
    assert_eq!(next(&mut events).await, Event::Created("alice".into()));
    assert_quiet(&mut events).await;

    let watcher: Arc<dyn AccountWatcher> = watcher;
    assert!(manager.unregister_watcher(&watcher));
    assert!(!manager.unregister_watcher(&watcher));
    manager.create_account(&alice());
    assert_quiet(&mut events).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_async_creates() {
    let (manager, store) = manager();
    let (watcher, mut events) = recorder();
    manager.register_watcher(watcher);

    let names: Vec<String> = (0..16).map(|i| format!("user{i}")).collect();
    let handles: Vec<_> = names
        .iter()
        .map(|name| manager.create_account_async(UserAccount::new(name.as_str())))
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let mut created = Vec::new();
    for _ in 0..names.len() {
        match next(&mut events).await {
            Event::Created(name) => created.push(name),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_quiet(&mut events).await;

    created.sort();
    let mut expected = names.clone();
    expected.sort();
    assert_eq!(created, expected);
    assert_eq!(store.len().unwrap(), names.len());
}

#[tokio::test]
async fn test_async_failure_reaches_watchers() {
    let (manager, _store) = manager();
    manager.set_value_crypto(Some(Arc::new(Failing)));
    let (watcher, mut events) = recorder();
    manager.register_watcher(watcher);

    manager.create_account_async(alice()).await.unwrap();
    assert_eq!(
        next(&mut events).await,
        Event::Error("alice".into(), AccountErrorCode::CreateAccountFailed)
    );
    assert!(manager.find_account(&alice()).unwrap().is_none());

    manager.delete_account_async(alice()).await.unwrap();
    assert_eq!(
        next(&mut events).await,
        Event::Error("alice".into(), AccountErrorCode::DeleteAccountFailed)
    );
}

#[tokio::test]
async fn test_async_create_then_delete() {
    let (manager, _store) = manager();
    let (watcher, mut events) = recorder();
    manager.register_watcher(watcher);

    manager.create_account_async(alice()).await.unwrap();
    manager.delete_account_async(alice()).await.unwrap();
    assert_eq!(next(&mut events).await, Event::Created("alice".into()));
    assert_eq!(next(&mut events).await, Event::Deleted("alice".into()));
}

#[tokio::test]
async fn test_empty_bundles_do_not_touch_store() {
    let store = Arc::new(Counting::default());
    let manager = AccountManager::builder(TYPE, store.clone())
        .build()
        .unwrap();
    let account = Account::new("alice", TYPE);

    manager.set_data_bundle(&account, &DataBundle::new()).unwrap();
    assert_eq!(manager.get_data_bundle(&account, &[]).unwrap(), BTreeMap::new());
    assert_eq!(store.calls(), 0);

    manager.create_account(&UserAccount::new("alice"));
    let before = store.calls();
    let read = manager.get_data_bundle(&account, &["a", "b"]).unwrap();
    assert_eq!(read.len(), 2);
    assert!(read.values().all(Option::is_none));
    assert_eq!(store.calls(), before + 2);
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = ManagerConfig::builder(TYPE)
        .store(StoreConfig::File {
            path: dir.path().join("accounts.json"),
        })
        .build();

    {
        let manager = AccountManager::from_config(&config).unwrap();
        assert!(manager.create_account(&alice()));
    }

    let manager = AccountManager::from_config(&config).unwrap();
    let account = manager.find_account(&alice()).unwrap().unwrap();
    assert_eq!(
        manager.get_password(&account).unwrap().as_deref(),
        Some("p1")
    );
    assert_eq!(
        manager.peek_auth_token(&account, "refresh").unwrap().as_deref(),
        Some("r-1")
    );
    assert_eq!(manager.accounts().unwrap(), vec![account]);
}

mod proptest_tests {
    use proptest::prelude::*;

    use super::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #[test]
        fn credentials_round_trip_through_crypto(
            password in "\\PC{0,24}",
            data in proptest::collection::btree_map("\\PC{1,12}", "\\PC{0,24}", 0..6),
        ) {
            let runtime = runtime();
            let manager = AccountManager::builder(TYPE, Arc::new(MemoryAccountStore::new()))
                .runtime(runtime.handle().clone())
                .key_crypto(Arc::new(Rot13))
                .value_crypto(Arc::new(Rot13))
                .build()
                .unwrap();

            let mut user = UserAccount::new("alice").with_password(password.clone());
            user.data_bundle = Some(data.clone());
            prop_assert!(manager.create_account(&user));

            let account = user.account(TYPE);
            prop_assert_eq!(manager.get_password(&account).unwrap(), Some(password));

            let keys: Vec<&str> = data.keys().map(String::as_str).collect();
            let read = manager.get_data_bundle(&account, &keys).unwrap();
            for (key, value) in &data {
                prop_assert_eq!(read[key].as_deref(), Some(value.as_str()));
            }
        }
    }
}
