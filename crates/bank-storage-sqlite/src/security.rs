//! Sealing primitives for the file keystore
//!
//! AES-256-GCM and ChaCha20-Poly1305 envelopes under a 256-bit master key,
//! plus Argon2id derivation of that key from a passphrase.

use crate::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm,
};
use argon2::{Argon2, ParamsBuilder, Version};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Envelope format version
const ENVELOPE_VERSION: u8 = 1;

/// Nonce length for both AEADs
const NONCE_LEN: usize = 12;

/// Minimum accepted KDF salt length
pub const MIN_SALT_LEN: usize = 16;

/// Encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    /// AES-256-GCM
    AesGcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl EncryptionAlgorithm {
    fn tag(&self) -> u8 {
        match self {
            EncryptionAlgorithm::AesGcm => 0,
            EncryptionAlgorithm::ChaCha20Poly1305 => 1,
        }
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub m_cost: u32,
    /// Iterations
    pub t_cost: u32,
    /// Parallel lanes
    pub p_cost: u32,
}

impl Default for KdfParams {
    /// 64 MiB, 3 iterations, 4 lanes
    fn default() -> Self {
        Self {
            m_cost: 65536,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

/// Master key sealing every value in the file keystore
#[derive(Clone)]
pub struct MasterKey {
    key: Zeroizing<[u8; 32]>,
    algorithm: EncryptionAlgorithm,
}

impl MasterKey {
    /// Generate new random master key
    pub fn generate(algorithm: EncryptionAlgorithm) -> Self {
        let mut key = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(key.as_mut());
        Self { key, algorithm }
    }

    /// Create from bytes
    pub fn from_bytes(bytes: &[u8], algorithm: EncryptionAlgorithm) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::Encryption("Invalid key length".to_string()));
        }

        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(bytes);

        Ok(Self { key, algorithm })
    }

    /// Derive from a passphrase with Argon2id
    pub fn derive(
        passphrase: &str,
        salt: &[u8],
        params: KdfParams,
        algorithm: EncryptionAlgorithm,
    ) -> Result<Self> {
        let key = derive_key_bytes(passphrase, salt, params)?;
        Self::from_bytes(key.as_ref(), algorithm)
    }

    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Algorithm used by [`MasterKey::seal`]
    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }

    /// Encrypt `plaintext`, binding it to `aad`.
    ///
    /// Format: `[version(1)][algorithm(1)][nonce(12)][ciphertext]`
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let payload = Payload { msg: plaintext, aad };

        let ciphertext = match self.algorithm {
            EncryptionAlgorithm::AesGcm => Aes256Gcm::new(self.key.as_ref().into())
                .encrypt(aes_gcm::Nonce::from_slice(&nonce), payload),
            EncryptionAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new(self.key.as_ref().into())
                .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), payload),
        }
        .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(2 + NONCE_LEN + ciphertext.len());
        out.push(ENVELOPE_VERSION);
        out.push(self.algorithm.tag());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt an envelope produced by [`MasterKey::seal`] with the same `aad`
    pub fn open(&self, data: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if data.len() < 2 + NONCE_LEN {
            return Err(Error::Encryption("Invalid ciphertext length".to_string()));
        }
        if data[0] != ENVELOPE_VERSION {
            return Err(Error::Encryption(format!(
                "Unsupported encryption version: {}",
                data[0]
            )));
        }
        if data[1] != self.algorithm.tag() {
            return Err(Error::Encryption(format!(
                "Algorithm mismatch: expected {:?}, got tag {}",
                self.algorithm, data[1]
            )));
        }

        let nonce = &data[2..2 + NONCE_LEN];
        let payload = Payload {
            msg: &data[2 + NONCE_LEN..],
            aad,
        };

        let plaintext = match self.algorithm {
            EncryptionAlgorithm::AesGcm => Aes256Gcm::new(self.key.as_ref().into())
                .decrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            EncryptionAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new(self.key.as_ref().into())
                .decrypt(chacha20poly1305::Nonce::from_slice(nonce), payload),
        }
        .map_err(|e| Error::Encryption(e.to_string()))?;

        Ok(Zeroizing::new(plaintext))
    }
}

/// Derive raw key bytes from passphrase using Argon2id.
pub fn derive_key_bytes(
    passphrase: &str,
    salt: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>> {
    if salt.len() < MIN_SALT_LEN {
        return Err(Error::Encryption("Salt too short".to_string()));
    }

    let params = ParamsBuilder::new()
        .m_cost(params.m_cost)
        .t_cost(params.t_cost)
        .p_cost(params.p_cost)
        .output_len(32)
        .build()
        .map_err(|e| Error::Encryption(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, key.as_mut())
        .map_err(|e| Error::Encryption(e.to_string()))?;

    Ok(key)
}

/// Generate secure random salt
pub fn generate_salt() -> [u8; 32] {
    let mut salt = [0u8; 32];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Hash data with SHA-256
pub fn hash_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
