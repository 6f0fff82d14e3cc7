//! Error types for Bank Core

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Bank Core errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Stored derivation code does not map to a known scheme
    #[error("Unknown mnemonic derivation code: {0}")]
    UnknownDerivation(i64),

    /// Stored sync mode string is not recognised
    #[error("Unknown sync mode: {0}")]
    UnknownSyncMode(String),

    /// Stored account type discriminant is not recognised
    #[error("Unknown account type discriminant: {0}")]
    UnknownAccountKind(i64),
}
