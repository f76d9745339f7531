//! Caller capabilities each account operation relies on.
//!
//! These are declarations only. Enforcement belongs to the platform store;
//! the manager never checks them.

/// Capability a caller must hold for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// List accounts of a type.
    GetAccounts,
    /// Manage accounts (invalidate tokens, clear passwords).
    ManageAccounts,
    /// Act as the authenticator for accounts (create, delete, read and write
    /// credentials and data).
    AuthenticateAccounts,
}

impl Permission {
    /// Stable identifier for the permission.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetAccounts => "accounts.get",
            Self::ManageAccounts => "accounts.manage",
            Self::AuthenticateAccounts => "accounts.authenticate",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public operations of [`AccountManager`](crate::AccountManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Synchronous or asynchronous account creation.
    CreateAccount,
    /// Synchronous or asynchronous account deletion.
    DeleteAccount,
    /// Account lookup by name.
    FindAccount,
    /// Setting an auth token.
    SetAuthToken,
    /// Reading an auth token, including `is_authenticated`.
    PeekAuthToken,
    /// Invalidating an auth token.
    InvalidateAuthToken,
    /// Setting a password.
    SetPassword,
    /// Reading a password.
    GetPassword,
    /// Clearing a password.
    ClearPassword,
    /// Writing data, single or bundle.
    SetData,
    /// Reading data, single or bundle.
    GetData,
}

impl Operation {
    /// Permissions the caller must hold for this operation.
    #[must_use]
    pub const fn required_permissions(self) -> &'static [Permission] {
        match self {
            Self::CreateAccount | Self::DeleteAccount => {
                &[Permission::GetAccounts, Permission::AuthenticateAccounts]
            }
            Self::FindAccount => &[Permission::GetAccounts],
            Self::InvalidateAuthToken | Self::ClearPassword => &[Permission::ManageAccounts],
            Self::SetAuthToken
            | Self::PeekAuthToken
            | Self::SetPassword
            | Self::GetPassword
            | Self::SetData
            | Self::GetData => &[Permission::AuthenticateAccounts],
        }
    }

    /// Whether `granted` covers every permission this operation needs.
    #[must_use]
    pub fn is_permitted(self, granted: &[Permission]) -> bool {
        self.required_permissions()
            .iter()
            .all(|required| granted.contains(required))
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
    fn lifecycle_needs_lookup_and_authenticator() {
        assert_eq!(
            Operation::CreateAccount.required_permissions(),
            &[Permission::GetAccounts, Permission::AuthenticateAccounts]
        );
        assert_eq!(
            Operation::DeleteAccount.required_permissions(),
            Operation::CreateAccount.required_permissions()
        );
    }

    #[test]
    fn invalidation_needs_manage() {
        assert_eq!(
            Operation::InvalidateAuthToken.required_permissions(),
            &[Permission::ManageAccounts]
        );
        assert_eq!(
            Operation::ClearPassword.required_permissions(),
            &[Permission::ManageAccounts]
        );
    }

    #[test]
    fn is_permitted() {
        let granted = [Permission::AuthenticateAccounts];
        assert!(Operation::GetData.is_permitted(&granted));
        assert!(!Operation::CreateAccount.is_permitted(&granted));
        assert!(Operation::CreateAccount.is_permitted(&[
            Permission::AuthenticateAccounts,
            Permission::GetAccounts
        ]));
    }

    #[test]
    fn display() {
        assert_eq!(Permission::ManageAccounts.to_string(), "accounts.manage");
    }
}
