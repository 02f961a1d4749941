//! AES-256-GCM encryption for `ServerCredential.secret_material_encrypted`
//! (spec.md §5: "decrypted at driver boundary into short-lived buffers,
//! never logged or returned on any API"). The master key is handed in by
//! the caller (resolved from `AIOPS_MASTER_KEY` or whatever
//! `Settings::master_key_env` names) rather than read here, so this module
//! stays free of any env/config dependency.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum SecretCipherError {
    #[error("ciphertext is malformed or truncated")]
    Malformed,
    #[error("decryption failed: wrong key or corrupted ciphertext")]
    DecryptFailed,
}

/// The master key is an arbitrary operator-supplied string; stretch it to
/// a 256-bit key with SHA-256 rather than requiring exact key material.
fn derive_key(master_key: &str) -> Key<Aes256Gcm> {
    let mut hasher = Sha256::new();
    hasher.update(master_key.as_bytes());
    let digest = hasher.finalize();
    *Key::<Aes256Gcm>::from_slice(&digest)
}

/// Encrypts `plaintext`, returning a base64 string of `nonce || ciphertext`.
pub fn encrypt(master_key: &str, plaintext: &str) -> String {
    let cipher = Aes256Gcm::new(&derive_key(master_key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .expect("aes-gcm encryption does not fail for valid key/nonce lengths");
    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    STANDARD.encode(combined)
}

/// Reverses [`encrypt`]. Used only at executor driver boundaries, never by
/// any API handler.
pub fn decrypt(master_key: &str, encoded: &str) -> Result<String, SecretCipherError> {
    let combined = STANDARD.decode(encoded).map_err(|_| SecretCipherError::Malformed)?;
    if combined.len() < NONCE_LEN {
        return Err(SecretCipherError::Malformed);
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(&derive_key(master_key));
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| SecretCipherError::DecryptFailed)?;
    String::from_utf8(plaintext).map_err(|_| SecretCipherError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encrypt_decrypt() {
        let encrypted = encrypt("master-key-1", "ssh-private-key-material");
        let decrypted = decrypt("master-key-1", &encrypted).unwrap();
        assert_eq!(decrypted, "ssh-private-key-material");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let encrypted = encrypt("master-key-1", "secret");
        let err = decrypt("wrong-key", &encrypted).unwrap_err();
        assert!(matches!(err, SecretCipherError::DecryptFailed));
    }

    #[test]
    fn two_encryptions_of_the_same_plaintext_differ() {
        let a = encrypt("k", "same-plaintext");
        let b = encrypt("k", "same-plaintext");
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_ciphertext_is_rejected() {
        let err = decrypt("k", "not-base64!!!").unwrap_err();
        assert!(matches!(err, SecretCipherError::Malformed));
    }
}
