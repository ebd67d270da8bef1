//! Zone key pair management.
//!
//! The key pair authorised inside every zone is shared by all concurrent
//! provisioning runs. [`KeyMaterialProvider`] generates it at most once: the
//! existence check and generation happen under a process-wide lock, and each
//! file is written through a temporary sibling so a reader never observes a
//! partially written key.

use std::sync::{Arc, LazyLock, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use rand::rngs::OsRng;
use serde::Serialize;
use ssh_key::private::{KeypairData, RsaKeypair};
use ssh_key::{LineEnding, PrivateKey};
use thiserror::Error;
use tracing::{info, warn};

use crate::files;

/// Modulus size of generated keys.
pub const RSA_KEY_BITS: usize = 2048;

/// Comment appended to generated public keys.
pub const DEFAULT_KEY_COMMENT: &str = "zonewright";

const KEY_FILE_MODE: u32 = 0o600;

static KEY_LOCK: LazyLock<Arc<Mutex<()>>> = LazyLock::new(|| Arc::new(Mutex::new(())));

/// Locations of the private and public halves of the zone key pair.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct KeyPaths {
    /// OpenSSH private key.
    pub private: Utf8PathBuf,
    /// OpenSSH public key.
    pub public: Utf8PathBuf,
}

/// What [`KeyMaterialProvider::ensure_keypair`] found.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyOutcome {
    /// Both files already existed and were left untouched.
    Existing,
    /// A new pair was generated and written.
    Generated,
}

/// Errors raised while preparing key material.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum KeyError {
    /// Reading or writing a key file failed.
    #[error("key file {path}: {message}")]
    Io {
        /// File being accessed.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// The public key file is missing.
    #[error("public key {0} does not exist")]
    Missing(Utf8PathBuf),
    /// Key generation or encoding failed.
    #[error("failed to generate key pair: {0}")]
    Generate(String),
    /// Another thread panicked while holding the generation lock.
    #[error("key generation lock poisoned")]
    LockPoisoned,
}

/// Generates the zone key pair once, under a shared lock.
#[derive(Clone, Debug)]
pub struct KeyMaterialProvider {
    lock: Arc<Mutex<()>>,
    comment: String,
}

impl Default for KeyMaterialProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyMaterialProvider {
    /// Creates a provider guarded by the process-wide key lock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock(Arc::clone(&KEY_LOCK))
    }

    /// Creates a provider that serialises generation on `lock`.
    #[must_use]
    pub fn with_lock(lock: Arc<Mutex<()>>) -> Self {
        Self {
            lock,
            comment: String::from(DEFAULT_KEY_COMMENT),
        }
    }

    /// Ensures both key files exist, generating a fresh pair when either is
    /// missing.
    ///
    /// An existing complete pair is never overwritten. A lone half left by
    /// an interrupted run is replaced together with its partner.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] when the lock is poisoned, generation fails, or a
    /// file cannot be read or written.
    pub fn ensure_keypair(&self, paths: &KeyPaths) -> Result<KeyOutcome, KeyError> {
        let _guard = self.lock.lock().map_err(|_| KeyError::LockPoisoned)?;

        let private_exists = exists(&paths.private)?;
        let public_exists = exists(&paths.public)?;
        if private_exists && public_exists {
            return Ok(KeyOutcome::Existing);
        }
        if private_exists || public_exists {
            warn!(
                private = %paths.private,
                public = %paths.public,
                "incomplete key pair found, regenerating"
            );
        }

        let (private, public) = self.generate()?;
        write_key(&paths.private, private.as_bytes())?;
        write_key(&paths.public, public.as_bytes())?;
        info!(public = %paths.public, "generated zone key pair");
        Ok(KeyOutcome::Generated)
    }

    fn generate(&self) -> Result<(String, String), KeyError> {
        let keypair = RsaKeypair::random(&mut OsRng, RSA_KEY_BITS)
            .map_err(|err| KeyError::Generate(err.to_string()))?;
        let private = PrivateKey::new(KeypairData::from(keypair), self.comment.as_str())
            .map_err(|err| KeyError::Generate(err.to_string()))?;
        let private_text = private
            .to_openssh(LineEnding::LF)
            .map_err(|err| KeyError::Generate(err.to_string()))?;
        let public_text = private
            .public_key()
            .to_openssh()
            .map_err(|err| KeyError::Generate(err.to_string()))?;
        Ok((private_text.as_str().to_owned(), format!("{public_text}\n")))
    }
}

/// Reads the public key text, without its trailing newline.
///
/// # Errors
///
/// Returns [`KeyError::Missing`] when the file is absent or
/// [`KeyError::Io`] when it cannot be read.
pub fn read_public_key(paths: &KeyPaths) -> Result<String, KeyError> {
    files::read_optional(&paths.public)
        .map_err(|err| io_error(&paths.public, &err))?
        .map(|text| text.trim_end().to_owned())
        .ok_or_else(|| KeyError::Missing(paths.public.clone()))
}

fn exists(path: &Utf8Path) -> Result<bool, KeyError> {
    files::exists(path).map_err(|err| io_error(path, &err))
}

fn write_key(path: &Utf8Path, contents: &[u8]) -> Result<(), KeyError> {
    files::write_atomic(path, contents, Some(KEY_FILE_MODE)).map_err(|err| io_error(path, &err))
}

fn io_error(path: &Utf8Path, err: &std::io::Error) -> KeyError {
    KeyError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
