//! Symmetric encryption of per-account credentials

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;

use crate::account::EncryptedSecret;
use crate::{EngineError, EngineResult};

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256-GCM vault for account passwords.
///
/// The key is loaded once from process-wide configuration. Without a
/// configured key the vault still works, but on an ephemeral key: stored
/// secrets become unreadable after a restart.
pub struct SecretVault {
    cipher: Aes256Gcm,
    ephemeral: bool,
}

impl SecretVault {
    /// Build a vault from a 64-hex-character key, or an ephemeral one when
    /// no key is configured.
    pub fn from_key_material(key_hex: Option<&str>) -> EngineResult<Self> {
        match key_hex {
            Some(raw) => {
                let bytes = hex::decode(raw.trim()).map_err(|_| {
                    EngineError::Credential("vault key is not valid hex".to_string())
                })?;
                if bytes.len() != 32 {
                    return Err(EngineError::Credential(
                        "vault key must be 32 bytes (64 hex characters)".to_string(),
                    ));
                }
                Ok(Self {
                    cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes)),
                    ephemeral: false,
                })
            }
            None => {
                warn!(
                    "no vault key configured; using an ephemeral key, encrypted \
                     credentials will NOT survive a restart"
                );
                let mut key = [0u8; 32];
                OsRng.fill_bytes(&mut key);
                Ok(Self {
                    cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
                    ephemeral: true,
                })
            }
        }
    }

    /// Whether this vault runs on an unconfigured, process-local key
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Encrypt a plaintext secret with a fresh random IV
    pub fn encrypt(&self, plaintext: &str) -> EngineResult<EncryptedSecret> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| EngineError::Credential("credential encryption failed".to_string()))?;

        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(EncryptedSecret {
            ciphertext: BASE64_STANDARD.encode(&sealed),
            iv: BASE64_STANDARD.encode(iv),
            auth_tag: BASE64_STANDARD.encode(&tag),
        })
    }

    /// Decrypt a stored secret.
    ///
    /// A tag mismatch, tampered ciphertext, or wrong key yields
    /// [`EngineError::Credential`]; callers must abort rather than proceed
    /// with a corrupt secret.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> EngineResult<String> {
        let decode = |field: &str, name: &str| {
            BASE64_STANDARD
                .decode(field)
                .map_err(|_| EngineError::Credential(format!("stored {} is not valid base64", name)))
        };

        let mut sealed = decode(&secret.ciphertext, "ciphertext")?;
        let iv = decode(&secret.iv, "iv")?;
        let tag = decode(&secret.auth_tag, "auth tag")?;

        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(EngineError::Credential(
                "stored credential has malformed iv or tag".to_string(),
            ));
        }

        sealed.extend_from_slice(&tag);

        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| {
                EngineError::Credential(
                    "credential decryption failed (wrong key or tampered ciphertext)".to_string(),
                )
            })?;

        String::from_utf8(plain)
            .map_err(|_| EngineError::Credential("decrypted secret is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    #[test]
    fn encrypt_decrypt_round_trip() {
        let vault = SecretVault::from_key_material(Some(TEST_KEY)).unwrap();
        let secret = vault.encrypt("hunter2").unwrap();
        assert_eq!(vault.decrypt(&secret).unwrap(), "hunter2");
    }

    #[test]
    fn iv_is_fresh_per_call() {
        let vault = SecretVault::from_key_material(Some(TEST_KEY)).unwrap();
        let a = vault.encrypt("same").unwrap();
        let b = vault.encrypt("same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let vault = SecretVault::from_key_material(Some(TEST_KEY)).unwrap();
        let mut secret = vault.encrypt("hunter2").unwrap();
        let mut raw = BASE64_STANDARD.decode(&secret.ciphertext).unwrap();
        raw[0] ^= 0xff;
        secret.ciphertext = BASE64_STANDARD.encode(&raw);
        assert!(matches!(
            vault.decrypt(&secret),
            Err(EngineError::Credential(_))
        ));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let vault = SecretVault::from_key_material(Some(TEST_KEY)).unwrap();
        let other = SecretVault::from_key_material(Some(
            "0202020202020202020202020202020202020202020202020202020202020202",
        ))
        .unwrap();
        let secret = vault.encrypt("hunter2").unwrap();
        assert!(matches!(
            other.decrypt(&secret),
            Err(EngineError::Credential(_))
        ));
    }

    #[test]
    fn missing_key_falls_back_to_ephemeral() {
        let vault = SecretVault::from_key_material(None).unwrap();
        assert!(vault.is_ephemeral());
        let secret = vault.encrypt("hunter2").unwrap();
        assert_eq!(vault.decrypt(&secret).unwrap(), "hunter2");
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(matches!(
            SecretVault::from_key_material(Some("abcd")),
            Err(EngineError::Credential(_))
        ));
    }
}
