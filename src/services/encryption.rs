use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine;

const NONCE_LEN: usize = 12;

/// AES-256-GCM sealing for statement frames held in object storage.
///
/// The object key is bound as associated data, so a sealed frame only opens
/// under the key it was written to.
pub struct FrameCipher {
    cipher: Aes256Gcm,
}

impl FrameCipher {
    /// Create from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_base64)
            .map_err(|_| EncryptionError::InvalidKey)?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKey);
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKey)?;
        Ok(Self { cipher })
    }

    /// Seal a frame for `object_key`; output is nonce || ciphertext.
    pub fn seal(&self, object_key: &str, frame: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: frame,
                    aad: object_key.as_bytes(),
                },
            )
            .map_err(|_| EncryptionError::EncryptFailed)?;

        let mut output = nonce.to_vec();
        output.extend(ciphertext);
        Ok(output)
    }

    /// Open a frame previously sealed for `object_key`.
    pub fn open(&self, object_key: &str, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if data.len() < NONCE_LEN {
            return Err(EncryptionError::DecryptFailed(object_key.to_string()));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: object_key.as_bytes(),
                },
            )
            .map_err(|_| EncryptionError::DecryptFailed(object_key.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Could not decrypt frame {0}")]
    DecryptFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> FrameCipher {
        FrameCipher::new(&base64::engine::general_purpose::STANDARD.encode([7u8; 32])).unwrap()
    }

    #[test]
    fn test_seal_open() {
        let c = cipher();
        let sealed = c.seal("frames/a.png", b"frame bytes").unwrap();
        assert_ne!(sealed.as_slice(), b"frame bytes");
        assert_eq!(c.open("frames/a.png", &sealed).unwrap(), b"frame bytes");
    }

    #[test]
    fn test_open_rejects_other_object_key() {
        let c = cipher();
        let sealed = c.seal("frames/a.png", b"frame bytes").unwrap();
        assert!(matches!(
            c.open("frames/b.png", &sealed),
            Err(EncryptionError::DecryptFailed(_))
        ));
    }

    #[test]
    fn test_rejects_short_key() {
        let key = base64::engine::general_purpose::STANDARD.encode([0u8; 16]);
        assert!(matches!(FrameCipher::new(&key), Err(EncryptionError::InvalidKey)));
        assert!(FrameCipher::new("not base64!").is_err());
    }
}
