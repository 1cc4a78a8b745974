use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// An encrypted OAuth token as stored on a connected service record.
/// All fields are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedToken {
    pub iv: String,
    pub auth_tag: String,
    pub encrypted: String,
}

/// AES-256-GCM encryption for third-party access and refresh tokens.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Create from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        let key_bytes = STANDARD
            .decode(key_base64)
            .map_err(|_| EncryptionError::InvalidKey)?;
        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKey);
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKey)?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, token: &str) -> Result<EncryptedToken, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, token.as_bytes())
            .map_err(|_| EncryptionError::EncryptFailed)?;

        // aes-gcm appends the tag to the ciphertext
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Ok(EncryptedToken {
            iv: STANDARD.encode(nonce),
            auth_tag: STANDARD.encode(tag),
            encrypted: STANDARD.encode(ciphertext),
        })
    }

    pub fn decrypt(&self, token: &EncryptedToken) -> Result<String, EncryptionError> {
        let decode = |field: &str| {
            STANDARD
                .decode(field)
                .map_err(|_| EncryptionError::DecryptFailed)
        };
        let iv = decode(&token.iv)?;
        let tag = decode(&token.auth_tag)?;
        let mut sealed = decode(&token.encrypted)?;

        if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(EncryptionError::DecryptFailed);
        }
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|_| EncryptionError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|_| EncryptionError::DecryptFailed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed")]
    DecryptFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> TokenCipher {
        TokenCipher::new(&STANDARD.encode([7u8; 32])).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cipher = cipher();
        let sealed = cipher.encrypt("spotify-refresh-token").unwrap();
        assert_ne!(sealed.encrypted, "spotify-refresh-token");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "spotify-refresh-token");
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let cipher = cipher();
        let a = cipher.encrypt("token").unwrap();
        let b = cipher.encrypt("token").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.encrypted, b.encrypted);
    }

    #[test]
    fn test_tampered_tag_rejected() {
        let cipher = cipher();
        let mut sealed = cipher.encrypt("token").unwrap();
        sealed.auth_tag = STANDARD.encode([0u8; TAG_LEN]);
        assert!(matches!(
            cipher.decrypt(&sealed),
            Err(EncryptionError::DecryptFailed)
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let sealed = cipher().encrypt("token").unwrap();
        let other = TokenCipher::new(&STANDARD.encode([9u8; 32])).unwrap();
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(matches!(
            TokenCipher::new(&STANDARD.encode([1u8; 16])),
            Err(EncryptionError::InvalidKey)
        ));
        assert!(TokenCipher::new("not base64!").is_err());
    }
}
