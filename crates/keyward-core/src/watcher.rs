//! Account lifecycle watchers.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::account::{AccountError, UserAccount};

/// Listener for account lifecycle events.
///
/// Callbacks run on the manager's notification task, never on the thread that
/// requested the operation. Keep them short; a slow watcher delays every
/// later notification.
pub trait AccountWatcher: Send + Sync {
    /// An account was created.
    fn on_account_created(&self, account: &UserAccount);

    /// An account was deleted.
    fn on_account_deleted(&self, account: &UserAccount);

    /// An asynchronous create or delete failed.
    fn on_account_error(&self, account: &UserAccount, error: &AccountError);
}

/// De-duplicating set of watchers.
///
/// Watcher identity is the `Arc` allocation: registering two clones of the
/// same `Arc` keeps one entry.
#[derive(Default)]
pub struct WatcherRegistry {
    watchers: Mutex<Vec<Arc<dyn AccountWatcher>>>,
}

fn same_watcher(a: &Arc<dyn AccountWatcher>, b: &Arc<dyn AccountWatcher>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

impl WatcherRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn AccountWatcher>>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `watcher`. Returns `false` if it was already registered.
    pub fn register(&self, watcher: Arc<dyn AccountWatcher>) -> bool {
        let mut watchers = self.lock();
        if watchers.iter().any(|w| same_watcher(w, &watcher)) {
            return false;
        }
        watchers.push(watcher);
        debug!("Registered account watcher ({} total)", watchers.len());
        true
    }

    /// Removes `watcher`. Returns `false` if it was not registered.
    pub fn unregister(&self, watcher: &Arc<dyn AccountWatcher>) -> bool {
        let mut watchers = self.lock();
        let before = watchers.len();
        watchers.retain(|w| !same_watcher(w, watcher));
        before != watchers.len()
    }

    /// Number of registered watchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no watcher is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current set, taken under the lock.
    fn snapshot(&self) -> Vec<Arc<dyn AccountWatcher>> {
        self.lock().clone()
    }

    fn notify(&self, event: &str, callback: impl Fn(&dyn AccountWatcher)) {
        for watcher in self.snapshot() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(watcher.as_ref()))).is_err() {
                error!("Account watcher panicked while handling {event}");
            }
        }
    }

    /// Invokes [`AccountWatcher::on_account_created`] on every watcher.
    pub fn notify_created(&self, account: &UserAccount) {
        self.notify("account created", |w| w.on_account_created(account));
    }

    /// Invokes [`AccountWatcher::on_account_deleted`] on every watcher.
    pub fn notify_deleted(&self, account: &UserAccount) {
        self.notify("account deleted", |w| w.on_account_deleted(account));
    }

    /// Invokes [`AccountWatcher::on_account_error`] on every watcher.
    pub fn notify_error(&self, account: &UserAccount, error: &AccountError) {
        self.notify("account error", |w| w.on_account_error(account, error));
    }
}

impl std::fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("watchers", &self.len())
            .finish()
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::account::AccountErrorCode;

    #[derive(Default)]
    struct Counter {
        created: AtomicUsize,
        deleted: AtomicUsize,
        errors: AtomicUsize,
    }

    impl AccountWatcher for Counter {
        fn on_account_created(&self, _account: &UserAccount) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }

        fn on_account_deleted(&self, _account: &UserAccount) {
            self.deleted.fetch_add(1, Ordering::SeqCst);
        }

        fn on_account_error(&self, _account: &UserAccount, _error: &AccountError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicky;

    impl AccountWatcher for Panicky {
        fn on_account_created(&self, _account: &UserAccount) {
            panic!("boom");
        }

        fn on_account_deleted(&self, _account: &UserAccount) {}

        fn on_account_error(&self, _account: &UserAccount, _error: &AccountError) {}
    }

    #[test]
    fn double_registration_notifies_once() {
        let registry = WatcherRegistry::new();
        let counter = Arc::new(Counter::default());
        assert!(registry.register(counter.clone()));
        assert!(!registry.register(counter.clone()));
        assert_eq!(registry.len(), 1);

        registry.notify_created(&UserAccount::new("alice"));
        assert_eq!(counter.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_instances_are_distinct_watchers() {
        let registry = WatcherRegistry::new();
        registry.register(Arc::new(Counter::default()));
        registry.register(Arc::new(Counter::default()));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregister() {
        let registry = WatcherRegistry::new();
        let counter = Arc::new(Counter::default());
        let watcher: Arc<dyn AccountWatcher> = counter.clone();

        assert!(!registry.unregister(&watcher));
        registry.register(watcher.clone());
        assert!(registry.unregister(&watcher));
        assert!(registry.is_empty());

        registry.notify_deleted(&UserAccount::new("alice"));
        assert_eq!(counter.deleted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn every_callback_is_routed() {
        let registry = WatcherRegistry::new();
        let counter = Arc::new(Counter::default());
        registry.register(counter.clone());
        let account = UserAccount::new("alice");

        registry.notify_created(&account);
        registry.notify_deleted(&account);
        registry.notify_error(
            &account,
            &AccountError::with_code(AccountErrorCode::CreateAccountFailed),
        );

        assert_eq!(counter.created.load(Ordering::SeqCst), 1);
        assert_eq!(counter.deleted.load(Ordering::SeqCst), 1);
        assert_eq!(counter.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_watcher_does_not_starve_others() {
        let registry = WatcherRegistry::new();
        let counter = Arc::new(Counter::default());
        registry.register(Arc::new(Panicky));
        registry.register(counter.clone());

        registry.notify_created(&UserAccount::new("alice"));
        assert_eq!(counter.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn watcher_may_unregister_itself() {
        struct SelfRemoving {
            registry: Arc<WatcherRegistry>,
            me: Mutex<Option<Arc<dyn AccountWatcher>>>,
        }

        impl AccountWatcher for SelfRemoving {
            fn on_account_created(&self, _account: &UserAccount) {
                if let Some(me) = self.me.lock().unwrap().take() {
                    self.registry.unregister(&me);
                }
            }

            fn on_account_deleted(&self, _account: &UserAccount) {}

            fn on_account_error(&self, _account: &UserAccount, _error: &AccountError) {}
        }

        let registry = Arc::new(WatcherRegistry::new());
        let watcher = Arc::new(SelfRemoving {
            registry: registry.clone(),
            me: Mutex::new(None),
        });
        let as_dyn: Arc<dyn AccountWatcher> = watcher.clone();
        *watcher.me.lock().unwrap() = Some(as_dyn.clone());
        registry.register(as_dyn);

        registry.notify_created(&UserAccount::new("alice"));
        assert!(registry.is_empty());
    }
}
