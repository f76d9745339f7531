//! Account model types.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Key/value data attached to an account.
pub type DataBundle = BTreeMap<String, String>;

/// Handle to a persisted account record.
///
/// An account is identified by its name within an account type; the store
/// holds at most one record per pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Account {
    /// Account name, unique within `account_type`.
    pub name: String,
    /// Account type the record belongs to.
    pub account_type: String,
}

impl Account {
    /// Create a new account handle.
    #[must_use]
    pub fn new(name: impl Into<String>, account_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account_type: account_type.into(),
        }
    }
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.account_type)
    }
}

/// Caller-supplied description of an account to create or delete.
///
/// The manager only reads it to populate the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Account name.
    pub name: String,
    /// Password to store with the account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Initial data bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_bundle: Option<DataBundle>,
    /// Auth token types this account uses.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub auth_token_types: BTreeSet<String>,
    /// Tokens keyed by auth token type.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub auth_tokens: HashMap<String, String>,
}

impl UserAccount {
    /// Create a user account with only a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Adds a data entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data_bundle
            .get_or_insert_with(DataBundle::new)
            .insert(key.into(), value.into());
        self
    }

    /// Declares an auth token type without a token.
    #[must_use]
    pub fn with_auth_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.auth_token_types.insert(token_type.into());
        self
    }

    /// Declares an auth token type together with its token.
    #[must_use]
    pub fn with_auth_token(
        mut self,
        token_type: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let token_type = token_type.into();
        self.auth_token_types.insert(token_type.clone());
        self.auth_tokens.insert(token_type, token.into());
        self
    }

    /// Declared token types paired with their tokens, skipping types that
    /// have no token.
    pub fn declared_tokens(&self) -> impl Iterator<Item = (&str, &str)> {
        self.auth_token_types.iter().filter_map(|token_type| {
            self.auth_tokens
                .get(token_type)
                .map(|token| (token_type.as_str(), token.as_str()))
        })
    }

    /// Handle for this user within `account_type`.
    #[must_use]
    pub fn account(&self, account_type: &str) -> Account {
        Account::new(self.name.clone(), account_type)
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

    mod account_tests {
        use super::*;

        #[test]
        fn new() {
            let account = Account::new("alice", "com.example");
            assert_eq!(account.name, "alice");
            assert_eq!(account.account_type, "com.example");
        }

        #[test]
        fn display() {
            let account = Account::new("alice", "com.example");
            assert_eq!(format!("{account}"), "alice (com.example)");
        }

        #[test]
        fn equality_uses_name_and_type() {
            let a = Account::new("alice", "one");
            let b = Account::new("alice", "one");
            let c = Account::new("alice", "two");
            assert_eq!(a, b);
            assert_ne!(a, c);
        }
    }

    mod user_account_tests {
        use super::*;

        #[test]
        fn new_creates_empty() {
            let user = UserAccount::new("alice");
            assert_eq!(user.name, "alice");
            assert!(user.password.is_none());
            assert!(user.data_bundle.is_none());
            assert!(user.auth_token_types.is_empty());
            assert!(user.auth_tokens.is_empty());
        }

        #[test]
        fn builder_collects_data() {
            let user = UserAccount::new("alice")
                .with_password("p1")
                .with_data("role", "admin")
                .with_data("team", "core");
            assert_eq!(user.password.as_deref(), Some("p1"));
            let bundle = user.data_bundle.unwrap();
            assert_eq!(bundle.len(), 2);
            assert_eq!(bundle["role"], "admin");
        }

        #[test]
        fn declared_tokens_skip_missing() {
            let user = UserAccount::new("alice")
                .with_auth_token("refresh", "r-1")
                .with_auth_token_type("access");
            assert_eq!(user.auth_token_types.len(), 2);
            let tokens: Vec<_> = user.declared_tokens().collect();
            assert_eq!(tokens, vec![("refresh", "r-1")]);
        }

        #[test]
        fn undeclared_tokens_are_ignored() {
            let mut user = UserAccount::new("alice");
            user.auth_tokens.insert("orphan".to_string(), "t".to_string());
            assert_eq!(user.declared_tokens().count(), 0);
        }

        #[test]
        fn account_handle() {
            let user = UserAccount::new("alice");
            assert_eq!(user.account("t"), Account::new("alice", "t"));
        }

        #[test]
        fn serde_skips_empty_fields() {
            let json = serde_json::to_string(&UserAccount::new("bob")).unwrap();
            assert_eq!(json, r#"{"name":"bob"}"#);
            let back: UserAccount = serde_json::from_str(&json).unwrap();
            assert_eq!(back, UserAccount::new("bob"));
        }
    }
}
