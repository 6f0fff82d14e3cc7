//! Account model
//!
//! An [`Account`] is one set of wallet credentials plus a little display
//! metadata. The credential itself is an [`AccountType`]: a sum type, so an
//! account can only ever carry the fields of a single credential kind.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// HD derivation scheme used for mnemonic and master-key accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MnemonicDerivation {
    /// BIP-44 (legacy P2PKH)
    Bip44,
    /// BIP-49 (P2SH-wrapped segwit)
    Bip49,
    /// BIP-84 (native segwit)
    Bip84,
}

impl MnemonicDerivation {
    /// Integer code stored in the `derivation` column
    pub fn code(&self) -> i64 {
        match self {
            MnemonicDerivation::Bip44 => 0,
            MnemonicDerivation::Bip49 => 1,
            MnemonicDerivation::Bip84 => 2,
        }
    }

    /// Parse a stored derivation code
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(MnemonicDerivation::Bip44),
            1 => Ok(MnemonicDerivation::Bip49),
            2 => Ok(MnemonicDerivation::Bip84),
            other => Err(Error::UnknownDerivation(other)),
        }
    }
}

/// Blockchain sync mode preferred for an account's wallets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Sync from a trusted checkpoint
    Fast,
    /// Full sync from genesis
    Slow,
    /// Fresh wallet, nothing to restore
    New,
}

impl SyncMode {
    /// Text stored in `defaultSyncMode` / `syncMode` columns
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Fast => "fast",
            SyncMode::Slow => "slow",
            SyncMode::New => "new",
        }
    }
}

impl FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(SyncMode::Fast),
            "slow" => Ok(SyncMode::Slow),
            "new" => Ok(SyncMode::New),
            other => Err(Error::UnknownSyncMode(other.to_string())),
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential kind without its payload (the persisted discriminant)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountKind {
    /// Recovery phrase
    Mnemonic,
    /// Raw private key
    PrivateKey,
    /// Derived HD master key
    HdMasterKey,
    /// Exchange account name plus active key
    ExchangeAccount,
}

impl AccountKind {
    /// Integer discriminant stored in the `type` column
    pub fn code(&self) -> i64 {
        match self {
            AccountKind::Mnemonic => 0,
            AccountKind::PrivateKey => 1,
            AccountKind::HdMasterKey => 2,
            AccountKind::ExchangeAccount => 3,
        }
    }

    /// Parse a stored discriminant
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(AccountKind::Mnemonic),
            1 => Ok(AccountKind::PrivateKey),
            2 => Ok(AccountKind::HdMasterKey),
            3 => Ok(AccountKind::ExchangeAccount),
            other => Err(Error::UnknownAccountKind(other)),
        }
    }
}

/// Account credential
#[derive(Clone, PartialEq, Eq)]
pub enum AccountType {
    /// Recovery phrase with optional BIP-39 passphrase ("salt")
    Mnemonic {
        /// Ordered recovery words
        words: Vec<String>,
        /// Derivation scheme
        derivation: MnemonicDerivation,
        /// Optional BIP-39 passphrase
        salt: Option<String>,
    },
    /// Single raw private key
    PrivateKey {
        /// Key bytes
        data: Vec<u8>,
    },
    /// Extended master key
    HdMasterKey {
        /// Serialized master key
        data: Vec<u8>,
        /// Derivation scheme
        derivation: MnemonicDerivation,
    },
    /// Exchange-hosted account (e.g. EOS)
    ExchangeAccount {
        /// Account name on the exchange chain
        account: String,
        /// Active permission private key
        active_private_key: Vec<u8>,
    },
}

impl AccountType {
    /// Discriminant of this credential
    pub fn kind(&self) -> AccountKind {
        match self {
            AccountType::Mnemonic { .. } => AccountKind::Mnemonic,
            AccountType::PrivateKey { .. } => AccountKind::PrivateKey,
            AccountType::HdMasterKey { .. } => AccountKind::HdMasterKey,
            AccountType::ExchangeAccount { .. } => AccountKind::ExchangeAccount,
        }
    }
}

// Never print key material.
impl fmt::Debug for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountType::Mnemonic { words, derivation, salt } => f
                .debug_struct("Mnemonic")
                .field("words", &format_args!("<{} words>", words.len()))
                .field("derivation", derivation)
                .field("salt", &salt.as_ref().map(|_| "<redacted>"))
                .finish(),
            AccountType::PrivateKey { .. } => f
                .debug_struct("PrivateKey")
                .field("data", &"<redacted>")
                .finish(),
            AccountType::HdMasterKey { derivation, .. } => f
                .debug_struct("HdMasterKey")
                .field("data", &"<redacted>")
                .field("derivation", derivation)
                .finish(),
            AccountType::ExchangeAccount { .. } => f
                .debug_struct("ExchangeAccount")
                .field("account", &"<redacted>")
                .field("active_private_key", &"<redacted>")
                .finish(),
        }
    }
}

/// Wallet account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Stable unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Credential
    pub account_type: AccountType,
    /// Whether the user confirmed a backup of the credential
    pub backed_up: bool,
    /// Sync mode to use for new wallets of this account
    pub default_sync_mode: Option<SyncMode>,
}

impl Account {
    /// Create an account with a caller-chosen id
    pub fn new(id: impl Into<String>, name: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            account_type,
            backed_up: false,
            default_sync_mode: None,
        }
    }

    /// Create an account with a freshly generated id
    pub fn generate(name: impl Into<String>, account_type: AccountType) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), name, account_type)
    }

    /// Set the default sync mode
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.default_sync_mode = Some(mode);
        self
    }

    /// Credential kind
    pub fn kind(&self) -> AccountKind {
        self.account_type.kind()
    }
}
