//! Pluggable encryption for stored keys and values.
//!
//! The manager holds two independent capability slots: one transforms data
//! keys, the other transforms data values and passwords. An empty slot is a
//! valid pass-through state. Concrete algorithms live outside this crate.

use std::sync::{Arc, PoisonError, RwLock};

/// Error type for crypto operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Encryption of a plaintext failed.
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    /// Decryption of a ciphertext failed.
    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

/// Result type for crypto operations.
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

/// Reversible string transform applied before persisting and after reading.
///
/// Implementations must be deterministic for keys: a data key is encrypted
/// both when written and when looked up, so the two ciphertexts must match.
pub trait Crypto: Send + Sync {
    /// Transforms `plaintext` into its stored form.
    ///
    /// # Errors
    ///
    /// Returns an error if the input cannot be encrypted.
    fn encrypt(&self, plaintext: &str) -> CryptoResult<String>;

    /// Restores the plaintext from its stored form.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid ciphertext.
    fn decrypt(&self, ciphertext: &str) -> CryptoResult<String>;
}

/// Late-bound, optional crypto capability.
#[derive(Default)]
pub struct CryptoSlot {
    crypto: RwLock<Option<Arc<dyn Crypto>>>,
}

impl CryptoSlot {
    /// Creates an empty (pass-through) slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the configured capability. `None` restores pass-through.
    pub fn set(&self, crypto: Option<Arc<dyn Crypto>>) {
        *self.crypto.write().unwrap_or_else(PoisonError::into_inner) = crypto;
    }

    /// Whether a capability is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<dyn Crypto>> {
        self.crypto
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Encrypts `value`, or returns it unchanged when the slot is empty.
    ///
    /// # Errors
    ///
    /// Propagates the capability's encryption error.
    pub fn encrypt(&self, value: &str) -> CryptoResult<String> {
        match self.current() {
            Some(crypto) => crypto.encrypt(value),
            None => Ok(value.to_string()),
        }
    }

    /// Decrypts `value`, or returns it unchanged when the slot is empty.
    ///
    /// # Errors
    ///
    /// Propagates the capability's decryption error.
    pub fn decrypt(&self, value: &str) -> CryptoResult<String> {
        match self.current() {
            Some(crypto) => crypto.decrypt(value),
            None => Ok(value.to_string()),
        }
    }

    /// [`Self::encrypt`] lifted over an optional value.
    ///
    /// # Errors
    ///
    /// Propagates the capability's encryption error.
    pub fn encrypt_opt(&self, value: Option<&str>) -> CryptoResult<Option<String>> {
        value.map(|v| self.encrypt(v)).transpose()
    }

    /// [`Self::decrypt`] lifted over an optional value.
    ///
    /// # Errors
    ///
    /// Propagates the capability's decryption error.
    pub fn decrypt_opt(&self, value: Option<&str>) -> CryptoResult<Option<String>> {
        value.map(|v| self.decrypt(v)).transpose()
    }
}

impl std::fmt::Debug for CryptoSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoSlot")
            .field("configured", &self.is_configured())
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
    use super::*;

    struct Reverse;

    impl Crypto for Reverse {
        fn encrypt(&self, plaintext: &str) -> CryptoResult<String> {
            Ok(plaintext.chars().rev().collect())
        }

        fn decrypt(&self, ciphertext: &str) -> CryptoResult<String> {
            Ok(ciphertext.chars().rev().collect())
        }
    }

    struct Broken;

    impl Crypto for Broken {
        fn encrypt(&self, _plaintext: &str) -> CryptoResult<String> {
            Err(CryptoError::Encrypt("no key".to_string()))
        }

        fn decrypt(&self, _ciphertext: &str) -> CryptoResult<String> {
            Err(CryptoError::Decrypt("no key".to_string()))
        }
    }

    #[test]
    fn empty_slot_passes_through() {
        let slot = CryptoSlot::new();
        assert!(!slot.is_configured());
        assert_eq!(slot.encrypt("päss wörd\n").unwrap(), "päss wörd\n");
        assert_eq!(slot.decrypt("päss wörd\n").unwrap(), "päss wörd\n");
    }

    #[test]
    fn configured_slot_transforms() {
        let slot = CryptoSlot::new();
        slot.set(Some(Arc::new(Reverse)));
        assert!(slot.is_configured());
        assert_eq!(slot.encrypt("abc").unwrap(), "cba");
        assert_eq!(slot.decrypt("cba").unwrap(), "abc");
    }

    #[test]
    fn clearing_slot_restores_pass_through() {
        let slot = CryptoSlot::new();
        slot.set(Some(Arc::new(Reverse)));
        slot.set(None);
        assert_eq!(slot.encrypt("abc").unwrap(), "abc");
    }

    #[test]
    fn optional_values() {
        let slot = CryptoSlot::new();
        slot.set(Some(Arc::new(Reverse)));
        assert_eq!(slot.encrypt_opt(None).unwrap(), None);
        assert_eq!(slot.encrypt_opt(Some("ab")).unwrap().as_deref(), Some("ba"));
        assert_eq!(slot.decrypt_opt(Some("ba")).unwrap().as_deref(), Some("ab"));
    }

    #[test]
    fn errors_propagate() {
        let slot = CryptoSlot::new();
        slot.set(Some(Arc::new(Broken)));
        assert_eq!(
            slot.encrypt("x").unwrap_err(),
            CryptoError::Encrypt("no key".to_string())
        );
        assert!(matches!(slot.decrypt("x"), Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn debug_hides_capability() {
        let slot = CryptoSlot::new();
        assert_eq!(format!("{slot:?}"), "CryptoSlot { configured: false }");
    }
}
