//! Bank wallet core
//!
//! In-memory account model shared by the storage and adapter layers:
//! accounts, their credential kinds, and the small enums persisted
//! alongside them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod account;
pub mod error;

pub use account::{Account, AccountKind, AccountType, MnemonicDerivation, SyncMode};
pub use error::{Error, Result};
