//! Errors reported to watchers for background account tasks.

use crate::Error;

/// Which background operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountErrorCode {
    /// Asynchronous account creation failed.
    CreateAccountFailed,
    /// Asynchronous account deletion failed.
    DeleteAccountFailed,
}

impl AccountErrorCode {
    /// Numeric code, negative by convention.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::CreateAccountFailed => -0x01,
            Self::DeleteAccountFailed => -0x02,
        }
    }
}

impl std::fmt::Display for AccountErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateAccountFailed => f.write_str("failed to create account"),
            Self::DeleteAccountFailed => f.write_str("failed to delete account"),
        }
    }
}

/// Failure of an asynchronous create or delete, delivered via
/// [`AccountWatcher::on_account_error`](crate::AccountWatcher::on_account_error).
#[derive(Debug, thiserror::Error)]
#[error("{code} (code {})", .code.code())]
pub struct AccountError {
    code: AccountErrorCode,
    #[source]
    source: Option<Box<Error>>,
}

impl AccountError {
    /// Error with only a code; the store reported the failure without a cause.
    #[must_use]
    pub const fn with_code(code: AccountErrorCode) -> Self {
        Self { code, source: None }
    }

    /// Error caused by `source`.
    #[must_use]
    pub fn new(code: AccountErrorCode, source: Error) -> Self {
        Self {
            code,
            source: Some(Box::new(source)),
        }
    }

    /// The error code.
    #[must_use]
    pub const fn code(&self) -> AccountErrorCode {
        self.code
    }

    /// The underlying cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&Error> {
        self.source.as_deref()
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
    use std::error::Error as _;

    use super::*;
    use crate::crypto::CryptoError;

    #[test]
    fn numeric_codes() {
        assert_eq!(AccountErrorCode::CreateAccountFailed.code(), -1);
        assert_eq!(AccountErrorCode::DeleteAccountFailed.code(), -2);
    }

    #[test]
    fn display_includes_code() {
        let error = AccountError::with_code(AccountErrorCode::DeleteAccountFailed);
        assert_eq!(error.to_string(), "failed to delete account (code -2)");
        assert!(error.cause().is_none());
        assert!(error.source().is_none());
    }

    #[test]
    fn keeps_cause() {
        let cause = Error::Crypto(CryptoError::Encrypt("bad key".to_string()));
        let error = AccountError::new(AccountErrorCode::CreateAccountFailed, cause);
        assert_eq!(error.code(), AccountErrorCode::CreateAccountFailed);
        assert!(matches!(error.cause(), Some(Error::Crypto(_))));
        assert!(error.source().is_some());
    }
}
