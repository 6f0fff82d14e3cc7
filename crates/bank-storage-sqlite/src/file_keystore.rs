//! File-backed secret store
//!
//! One file per key under a root directory. File names are the hex SHA-256
//! of the key identifier, contents are a [`MasterKey`] envelope bound to the
//! identifier, and writes go through a temp file plus rename.

use crate::keystore::{validate_key, SecretStore};
use crate::security::{
    generate_salt, hash_sha256, EncryptionAlgorithm, KdfParams, MasterKey,
};
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

const META_FILE: &str = "keystore.json";
const META_VERSION: u32 = 1;
const META_CHECK: &[u8] = b"bank-wallet-keystore";
const SEALED_EXTENSION: &str = "sealed";

#[derive(Debug, Serialize, Deserialize)]
struct KeystoreMeta {
    version: u32,
    algorithm: EncryptionAlgorithm,
    kdf: KdfParams,
    salt: String,
    check: String,
}

/// Secret store sealing each value into its own file
pub struct SealedFileKeystore {
    root_dir: PathBuf,
    key: MasterKey,
    write_lock: Mutex<()>,
}

impl SealedFileKeystore {
    /// Open (or create) a keystore directory with an already-unsealed master key
    pub fn open<P: AsRef<Path>>(root_dir: P, key: MasterKey) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root_dir)?;
        Ok(Self {
            root_dir,
            key,
            write_lock: Mutex::new(()),
        })
    }

    /// Open (or create) a keystore directory whose master key is derived from a passphrase.
    ///
    /// The salt and KDF parameters are persisted next to the sealed files on
    /// first use; later opens reuse them and reject a wrong passphrase.
    pub fn open_with_passphrase<P: AsRef<Path>>(
        root_dir: P,
        passphrase: &str,
        params: KdfParams,
    ) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root_dir)?;
        let meta_path = root_dir.join(META_FILE);

        let key = if meta_path.exists() {
            let meta: KeystoreMeta = serde_json::from_slice(&fs::read(&meta_path)?)?;
            if meta.version != META_VERSION {
                return Err(Error::Encryption(format!(
                    "Unsupported keystore version: {}",
                    meta.version
                )));
            }
            let salt = hex::decode(&meta.salt)
                .map_err(|e| Error::Encryption(format!("Invalid keystore salt: {}", e)))?;
            let check = hex::decode(&meta.check)
                .map_err(|e| Error::Encryption(format!("Invalid keystore check: {}", e)))?;

            let key = MasterKey::derive(passphrase, &salt, meta.kdf, meta.algorithm)?;
            match key.open(&check, META_FILE.as_bytes()) {
                Ok(plain) if plain.as_slice() == META_CHECK => key,
                _ => return Err(Error::Encryption("Wrong keystore passphrase".to_string())),
            }
        } else {
            let salt = generate_salt();
            let algorithm = EncryptionAlgorithm::ChaCha20Poly1305;
            let key = MasterKey::derive(passphrase, &salt, params, algorithm)?;
            let meta = KeystoreMeta {
                version: META_VERSION,
                algorithm,
                kdf: params,
                salt: hex::encode(salt),
                check: hex::encode(key.seal(META_CHECK, META_FILE.as_bytes())?),
            };
            write_atomic(&meta_path, &serde_json::to_vec_pretty(&meta)?)?;
            tracing::debug!("Created keystore metadata at {}", meta_path.display());
            key
        };

        Self::open(root_dir, key)
    }

    /// Directory holding the sealed files
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        let name = hex::encode(hash_sha256(key.as_bytes()));
        Ok(self.root_dir.join(name).with_extension(SEALED_EXTENSION))
    }
}

impl SecretStore for SealedFileKeystore {
    fn set_data(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let sealed = self.key.seal(value, key.as_bytes())?;
        let _guard = self.write_lock.lock();
        write_atomic(&path, &sealed)
    }

    fn get_data(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let path = self.path_for(key)?;
        let sealed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.key.open(&sealed, key.as_bytes()).map(Some)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
