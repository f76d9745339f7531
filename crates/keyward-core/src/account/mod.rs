//! Account management module.
//!
//! Provides the account model, background error codes and the permission
//! declarations for manager operations.

mod error;
mod model;
pub mod permission;

pub use error::{AccountError, AccountErrorCode};
pub use model::{Account, DataBundle, UserAccount};
pub use permission::{Operation, Permission};
