#![allow(clippy::doc_markdown, clippy::uninlined_format_args)]
//! Example: account lifecycle with a JSON file store
//!
//! Creates an account, reads its credentials back, then deletes it, printing
//! every watcher notification along the way.
//!
//! ## Running
//!
//! ```bash
//! RUST_LOG=keyward_core=debug cargo run --package keyward-core --example account_lifecycle
//! ```
//!
//! Pass a path to keep the store file around:
//!
//! ```bash
//! cargo run --package keyward-core --example account_lifecycle -- /tmp/accounts.json
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use keyward_core::{
    AccountError, AccountManager, AccountWatcher, Crypto, CryptoError, CryptoResult,
    ManagerConfig, UserAccount,
};

const ACCOUNT_TYPE: &str = "com.example.mail";

/// XOR-and-hex obfuscation. Stand-in for a real cipher.
struct Obfuscate(u8);

impl Crypto for Obfuscate {
    fn encrypt(&self, plaintext: &str) -> CryptoResult<String> {
        Ok(plaintext
            .bytes()
            .map(|b| format!("{:02x}", b ^ self.0))
            .collect())
    }

    fn decrypt(&self, ciphertext: &str) -> CryptoResult<String> {
        let bytes = (0..ciphertext.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(ciphertext.get(i..i + 2).unwrap_or_default(), 16)
                    .map(|b| b ^ self.0)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}

/// Forwards lifecycle events to the main task.
struct Printer(UnboundedSender<String>);

impl AccountWatcher for Printer {
    fn on_account_created(&self, account: &UserAccount) {
        let _ = self.0.send(format!("created {}", account.name));
    }

    fn on_account_deleted(&self, account: &UserAccount) {
        let _ = self.0.send(format!("deleted {}", account.name));
    }

    fn on_account_error(&self, account: &UserAccount, error: &AccountError) {
        let _ = self.0.send(format!("failed {}: {}", account.name, error));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyward_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path: PathBuf = match env::args().nth(1) {
        Some(path) => path.into(),
        None => env::temp_dir().join("keyward-example.json"),
    };
    println!("Store: {}", path.display());

    let config = ManagerConfig::builder(ACCOUNT_TYPE).file_store(path).build();
    let manager = AccountManager::from_config(&config).context("failed to build manager")?;
    manager.set_value_crypto(Some(Arc::new(Obfuscate(0x5a))));

    let (tx, mut events) = mpsc::unbounded_channel();
    manager.register_watcher(Arc::new(Printer(tx)));

    let alice = UserAccount::new("alice")
        .with_password("hunter2")
        .with_data("server", "imap.example.com")
        .with_auth_token("refresh", "r-0001");

    manager.create_account_async(alice.clone()).await?;
    println!("Event: {}", events.recv().await.context("dispatcher stopped")?);

    let account = manager
        .find_account(&alice)?
        .context("account missing after create")?;
    println!("Password: {:?}", manager.get_password(&account)?);
    println!("Server: {:?}", manager.get_data(&account, "server")?);
    println!(
        "Authenticated: {}",
        manager.is_authenticated(&account, "refresh")
    );

    manager.delete_account_async(alice).await?;
    println!("Event: {}", events.recv().await.context("dispatcher stopped")?);
    println!("Accounts left: {}", manager.accounts()?.len());

    Ok(())
}
