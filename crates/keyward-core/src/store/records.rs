//! Record set shared by the bundled store adapters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{StoreError, StoreResult};
use crate::account::{Account, DataBundle};

/// One persisted account with its credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoredAccount {
    pub account: Account,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub user_data: BTreeMap<String, String>,
    #[serde(default)]
    pub auth_tokens: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Accounts in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Records {
    #[serde(default)]
    accounts: Vec<StoredAccount>,
}

impl Records {
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    fn position(&self, account: &Account) -> Option<usize> {
        self.accounts.iter().position(|stored| &stored.account == account)
    }

    pub fn get(&self, account: &Account) -> Option<&StoredAccount> {
        self.accounts.iter().find(|stored| &stored.account == account)
    }

    fn get_mut(&mut self, account: &Account) -> StoreResult<&mut StoredAccount> {
        self.accounts
            .iter_mut()
            .find(|stored| &stored.account == account)
            .ok_or_else(|| StoreError::AccountNotFound(account.clone()))
    }

    pub fn add(&mut self, account: &Account, password: Option<&str>, data: &DataBundle) -> bool {
        if self.position(account).is_some() {
            return false;
        }
        self.accounts.push(StoredAccount {
            account: account.clone(),
            password: password.map(str::to_string),
            user_data: data.clone(),
            auth_tokens: BTreeMap::new(),
            created_at: Utc::now(),
        });
        true
    }

    pub fn remove(&mut self, account: &Account) -> bool {
        match self.position(account) {
            Some(index) => {
                self.accounts.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn by_type(&self, account_type: &str) -> Vec<Account> {
        self.accounts
            .iter()
            .filter(|stored| stored.account.account_type == account_type)
            .map(|stored| stored.account.clone())
            .collect()
    }

    pub fn password(&self, account: &Account) -> Option<String> {
        self.get(account).and_then(|stored| stored.password.clone())
    }

    pub fn set_password(&mut self, account: &Account, password: Option<&str>) -> StoreResult<()> {
        self.get_mut(account)?.password = password.map(str::to_string);
        Ok(())
    }

    pub fn user_data(&self, account: &Account, key: &str) -> Option<String> {
        self.get(account)
            .and_then(|stored| stored.user_data.get(key).cloned())
    }

    pub fn set_user_data(
        &mut self,
        account: &Account,
        key: &str,
        value: Option<&str>,
    ) -> StoreResult<()> {
        let stored = self.get_mut(account)?;
        match value {
            Some(value) => {
                stored.user_data.insert(key.to_string(), value.to_string());
            }
            None => {
                stored.user_data.remove(key);
            }
        }
        Ok(())
    }

    pub fn set_auth_token(
        &mut self,
        account: &Account,
        token_type: &str,
        token: Option<&str>,
    ) -> StoreResult<()> {
        let stored = self.get_mut(account)?;
        match token {
            Some(token) => {
                stored
                    .auth_tokens
                    .insert(token_type.to_string(), token.to_string());
            }
            None => {
                stored.auth_tokens.remove(token_type);
            }
        }
        Ok(())
    }

    pub fn peek_auth_token(&self, account: &Account, token_type: &str) -> Option<String> {
        self.get(account)
            .and_then(|stored| stored.auth_tokens.get(token_type).cloned())
    }

    /// Returns how many tokens were dropped.
    pub fn invalidate_auth_token(&mut self, account_type: &str, token: &str) -> usize {
        let mut dropped = 0;
        for stored in self
            .accounts
            .iter_mut()
            .filter(|stored| stored.account.account_type == account_type)
        {
            let before = stored.auth_tokens.len();
            stored.auth_tokens.retain(|_, value| value != token);
            dropped += before - stored.auth_tokens.len();
        }
        dropped
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

    fn alice() -> Account {
        Account::new("alice", "t")
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut records = Records::default();
        assert!(records.add(&alice(), Some("p"), &DataBundle::new()));
        assert!(!records.add(&alice(), None, &DataBundle::new()));
        assert_eq!(records.len(), 1);
        assert_eq!(records.password(&alice()).as_deref(), Some("p"));
    }

    #[test]
    fn remove_reports_presence() {
        let mut records = Records::default();
        assert!(!records.remove(&alice()));
        records.add(&alice(), None, &DataBundle::new());
        assert!(records.remove(&alice()));
        assert!(records.get(&alice()).is_none());
    }

    #[test]
    fn by_type_filters_and_keeps_order() {
        let mut records = Records::default();
        records.add(&Account::new("b", "t"), None, &DataBundle::new());
        records.add(&Account::new("x", "other"), None, &DataBundle::new());
        records.add(&Account::new("a", "t"), None, &DataBundle::new());
        let names: Vec<_> = records.by_type("t").into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn writes_to_missing_account_fail() {
        let mut records = Records::default();
        assert!(matches!(
            records.set_password(&alice(), Some("p")),
            Err(StoreError::AccountNotFound(_))
        ));
        assert!(records.set_user_data(&alice(), "k", Some("v")).is_err());
        assert!(records.set_auth_token(&alice(), "t", Some("x")).is_err());
    }

    #[test]
    fn none_removes_entries() {
        let mut records = Records::default();
        records.add(&alice(), Some("p"), &DataBundle::new());
        records.set_user_data(&alice(), "k", Some("v")).unwrap();
        records.set_auth_token(&alice(), "refresh", Some("r")).unwrap();

        records.set_user_data(&alice(), "k", None).unwrap();
        records.set_auth_token(&alice(), "refresh", None).unwrap();
        records.set_password(&alice(), None).unwrap();

        assert_eq!(records.user_data(&alice(), "k"), None);
        assert_eq!(records.peek_auth_token(&alice(), "refresh"), None);
        assert_eq!(records.password(&alice()), None);
    }

    #[test]
    fn invalidate_is_scoped_to_type() {
        let mut records = Records::default();
        let other = Account::new("alice", "other");
        records.add(&alice(), None, &DataBundle::new());
        records.add(&other, None, &DataBundle::new());
        records.set_auth_token(&alice(), "refresh", Some("tok")).unwrap();
        records.set_auth_token(&alice(), "access", Some("tok")).unwrap();
        records.set_auth_token(&other, "refresh", Some("tok")).unwrap();

        assert_eq!(records.invalidate_auth_token("t", "tok"), 2);
        assert_eq!(records.peek_auth_token(&alice(), "refresh"), None);
        assert_eq!(records.peek_auth_token(&other, "refresh").as_deref(), Some("tok"));
    }
}
