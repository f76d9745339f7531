//! Notification delivery off the calling thread.
//!
//! Operations post [`Notification`]s to an unbounded channel. A single task
//! spawned on the manager's runtime drains it and fans each event out to the
//! [`WatcherRegistry`], so watchers observe events in completion order.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::account::{AccountError, AccountErrorCode, UserAccount};
use crate::watcher::WatcherRegistry;

/// Event destined for the watchers.
#[derive(Debug)]
pub(crate) enum Notification {
    Created(UserAccount),
    Deleted(UserAccount),
    Error(UserAccount, AccountError),
}

/// Outcome of a background create or delete.
#[derive(Debug)]
pub(crate) struct TaskResult {
    account: UserAccount,
    error: Option<AccountError>,
}

impl TaskResult {
    /// Folds the blocking task's outcome into a result for `account`.
    ///
    /// `Ok(Ok(false))` (the store refused) and `Ok(Err(_))` (the operation
    /// failed) both become `code`; a panic surfaces as a [`JoinError`].
    pub fn new(
        account: UserAccount,
        code: AccountErrorCode,
        outcome: Result<crate::Result<bool>, JoinError>,
    ) -> Self {
        let error = match outcome {
            Ok(Ok(true)) => None,
            Ok(Ok(false)) => Some(AccountError::with_code(code)),
            Ok(Err(e)) => Some(AccountError::new(code, e)),
            Err(e) => Some(AccountError::new(code, e.into())),
        };
        Self { account, error }
    }

    /// Consumes the result; `success` builds the notification when no error
    /// was recorded.
    pub fn into_notification(self, success: fn(UserAccount) -> Notification) -> Notification {
        match self.error {
            None => success(self.account),
            Some(error) => Notification::Error(self.account, error),
        }
    }
}

/// Sending half of the notification channel.
#[derive(Debug, Clone)]
pub(crate) struct Notifier {
    tx: UnboundedSender<Notification>,
}

impl Notifier {
    /// Spawns the dispatch task on `runtime`.
    pub fn spawn(runtime: &Handle, registry: Arc<WatcherRegistry>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(dispatch(rx, registry));
        Self { tx }
    }

    /// Queues `notification` for delivery.
    pub fn post(&self, notification: Notification) {
        if let Err(e) = self.tx.send(notification) {
            warn!("Notification dropped, dispatcher has stopped: {:?}", e.0);
        }
    }
}

async fn dispatch(mut rx: UnboundedReceiver<Notification>, registry: Arc<WatcherRegistry>) {
    debug!("Account notification dispatcher started");
    while let Some(notification) = rx.recv().await {
        match notification {
            Notification::Created(account) => registry.notify_created(&account),
            Notification::Deleted(account) => registry.notify_deleted(&account),
            Notification::Error(account, error) => {
                warn!("Account task failed for {}: {error}", account.name);
                registry.notify_error(&account, &error);
            }
        }
    }
    debug!("Account notification dispatcher stopped");
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
    use crate::Error;
    use crate::crypto::CryptoError;

    fn alice() -> UserAccount {
        UserAccount::new("alice")
    }

    mod task_result_tests {
        use super::*;

        #[test]
        fn success_uses_given_constructor() {
            let result =
                TaskResult::new(alice(), AccountErrorCode::CreateAccountFailed, Ok(Ok(true)));
            assert!(matches!(
                result.into_notification(Notification::Created),
                Notification::Created(account) if account.name == "alice"
            ));
        }

        #[test]
        fn refusal_has_code_without_cause() {
            let result =
                TaskResult::new(alice(), AccountErrorCode::DeleteAccountFailed, Ok(Ok(false)));
            match result.into_notification(Notification::Deleted) {
                Notification::Error(_, error) => {
                    assert_eq!(error.code(), AccountErrorCode::DeleteAccountFailed);
                    assert!(error.cause().is_none());
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn failure_keeps_cause() {
            let cause = Error::Crypto(CryptoError::Encrypt("x".to_string()));
            let result = TaskResult::new(
                alice(),
                AccountErrorCode::CreateAccountFailed,
                Ok(Err(cause)),
            );
            match result.into_notification(Notification::Created) {
                Notification::Error(_, error) => {
                    assert!(matches!(error.cause(), Some(Error::Crypto(_))));
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test]
        async fn panic_becomes_task_error() {
            let outcome = tokio::task::spawn_blocking(|| -> crate::Result<bool> {
                panic!("store exploded")
            })
            .await;
            let result = TaskResult::new(alice(), AccountErrorCode::CreateAccountFailed, outcome);
            match result.into_notification(Notification::Created) {
                Notification::Error(_, error) => {
                    assert!(matches!(error.cause(), Some(Error::Task(_))));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    mod notifier_tests {
        use std::sync::Mutex;

        use tokio::sync::mpsc::UnboundedSender;

        use super::*;
        use crate::watcher::AccountWatcher;

        struct Forward(Mutex<UnboundedSender<String>>);

        impl AccountWatcher for Forward {
            fn on_account_created(&self, account: &UserAccount) {
                let _ = self.0.lock().unwrap().send(format!("created {}", account.name));
            }

            fn on_account_deleted(&self, account: &UserAccount) {
                let _ = self.0.lock().unwrap().send(format!("deleted {}", account.name));
            }

            fn on_account_error(&self, account: &UserAccount, error: &AccountError) {
                let _ = self
                    .0
                    .lock()
                    .unwrap()
                    .send(format!("error {} {}", account.name, error.code().code()));
            }
        }

        #[tokio::test]
        async fn delivers_in_posting_order() {
            let registry = Arc::new(WatcherRegistry::new());
            let (tx, mut rx) = mpsc::unbounded_channel();
            registry.register(Arc::new(Forward(Mutex::new(tx))));

            let notifier = Notifier::spawn(&Handle::current(), registry);
            notifier.post(Notification::Created(alice()));
            notifier.post(Notification::Deleted(alice()));
            notifier.post(Notification::Error(
                alice(),
                AccountError::with_code(AccountErrorCode::DeleteAccountFailed),
            ));

            assert_eq!(rx.recv().await.unwrap(), "created alice");
            assert_eq!(rx.recv().await.unwrap(), "deleted alice");
            assert_eq!(rx.recv().await.unwrap(), "error alice -2");
        }
    }
}
