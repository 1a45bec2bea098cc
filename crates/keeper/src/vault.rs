//! Credential vault: encryption at rest for the portal username/password.
//!
//! A random 256-bit key is generated on first use and kept in a key file
//! beside the state store. Blobs are AES-256-CBC with a fresh random IV per
//! encryption, laid out as `IV || ciphertext` and base64-encoded. The rest
//! of the engine treats the blob as opaque; only this module and the login
//! path ever see the plaintext.

use crate::error::KeeperError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// The stored username/password pair.
///
/// `Debug` redacts the password; the pair is never serialized into session
/// state and never logged.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct CredentialVault {
    key_path: PathBuf,
}

impl CredentialVault {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Encrypt the credential pair into an opaque blob.
    pub fn seal(&self, credentials: &Credentials) -> Result<String, KeeperError> {
        let key = self.load_or_create_key()?;
        let iv: [u8; IV_LEN] = rand::rng().random();

        let plaintext =
            serde_json::to_vec(credentials).map_err(|e| KeeperError::CredentialsUnreadable {
                reason: e.to_string(),
            })?;

        let cipher = Aes256CbcEnc::new_from_slices(&key, &iv).map_err(|e| {
            KeeperError::CredentialsUnreadable {
                reason: format!("failed to initialize cipher: {e}"),
            }
        })?;

        // Pkcs7 needs up to one extra block of headroom.
        let mut buffer = vec![0u8; plaintext.len() + IV_LEN];
        buffer[..plaintext.len()].copy_from_slice(&plaintext);
        let ciphertext_len = cipher
            .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
            .map_err(|e| KeeperError::CredentialsUnreadable {
                reason: format!("encryption failed: {e}"),
            })?
            .len();
        buffer.truncate(ciphertext_len);

        let mut combined = Vec::with_capacity(IV_LEN + buffer.len());
        combined.extend_from_slice(&iv);
        combined.extend_from_slice(&buffer);
        Ok(BASE64.encode(combined))
    }

    /// Decrypt a blob produced by [`seal`](Self::seal).
    pub fn open(&self, blob: &str) -> Result<Credentials, KeeperError> {
        let key = self.load_or_create_key()?;
        let combined = BASE64
            .decode(blob)
            .map_err(|e| KeeperError::CredentialsUnreadable {
                reason: format!("invalid blob encoding: {e}"),
            })?;

        if combined.len() <= IV_LEN {
            return Err(KeeperError::CredentialsUnreadable {
                reason: "blob too short".to_string(),
            });
        }
        let (iv, ciphertext) = combined.split_at(IV_LEN);

        let cipher = Aes256CbcDec::new_from_slices(&key, iv).map_err(|e| {
            KeeperError::CredentialsUnreadable {
                reason: format!("failed to initialize cipher: {e}"),
            }
        })?;

        let mut buffer = ciphertext.to_vec();
        let plaintext_len = cipher
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .map_err(|e| KeeperError::CredentialsUnreadable {
                reason: format!("decryption failed: {e}"),
            })?
            .len();
        buffer.truncate(plaintext_len);

        serde_json::from_slice(&buffer).map_err(|e| KeeperError::CredentialsUnreadable {
            reason: format!("decrypted payload malformed: {e}"),
        })
    }

    /// Read the key file, generating it on first use.
    fn load_or_create_key(&self) -> Result<[u8; KEY_LEN], KeeperError> {
        match fs::read_to_string(&self.key_path) {
            Ok(text) => {
                let bytes =
                    hex::decode(text.trim()).map_err(|e| KeeperError::CredentialsUnreadable {
                        reason: format!("key file malformed: {e}"),
                    })?;
                bytes
                    .try_into()
                    .map_err(|_| KeeperError::CredentialsUnreadable {
                        reason: "key file has wrong length".to_string(),
                    })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.key_path.display(), "generating new credential key");
                let key: [u8; KEY_LEN] = rand::rng().random();
                if let Some(parent) = self.key_path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&self.key_path, hex::encode(key))?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(&self.key_path, fs::Permissions::from_mode(0o600))?;
                }
                Ok(key)
            }
            Err(e) => Err(KeeperError::from(e)),
        }
    }
}
