//! Cryptography module for entry encryption at rest
//!
//! Provides AES-256-GCM encryption of JSON payloads with PBKDF2-HMAC-SHA256
//! key derivation. The module knows nothing about entries: it turns a
//! passcode plus salt into a key, and opaque JSON into `(iv, ciphertext)`.

use crate::config::{NONCE_SIZE, PBKDF2_ITERATIONS, SALT_SIZE};
use crate::error::{AppError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

const KEY_SIZE: usize = 32; // 256 bits for AES-256

/// Symmetric key usable only for encrypt/decrypt.
///
/// The raw key bytes are consumed by the cipher at construction and are
/// never handed back out.
#[derive(Clone)]
pub struct JournalKey {
    cipher: Aes256Gcm,
}

impl fmt::Debug for JournalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JournalKey(..)")
    }
}

/// Encrypted payload, both parts base64 encoded for text columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub iv: String,
    pub ciphertext: String,
}

/// Generate a fresh random salt. Persist it: the same salt must be reused
/// for every record encrypted under the derived key.
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key from a passcode with PBKDF2-HMAC-SHA256.
///
/// Deterministic: the same `(passcode, salt)` always yields the same key.
pub fn derive_key(passcode: &str, salt: &[u8]) -> Result<JournalKey> {
    if salt.is_empty() {
        return Err(AppError::Validation("Salt must not be empty".to_string()));
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(passcode.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key_bytes);

    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|e| AppError::Generic(format!("Cipher initialization failed: {}", e)));
    key_bytes.fill(0);

    Ok(JournalKey { cipher: cipher? })
}

/// Same as [`derive_key`], run on the blocking pool so the slow stretch
/// does not stall the async executor.
pub async fn derive_key_async(passcode: String, salt: Vec<u8>) -> Result<JournalKey> {
    tokio::task::spawn_blocking(move || derive_key(&passcode, &salt))
        .await
        .map_err(|e| AppError::Generic(format!("Key derivation task failed: {}", e)))?
}

/// Serialize `data` to JSON and encrypt it under a fresh 96-bit IV
pub fn encrypt_json<T>(key: &JournalKey, data: &T) -> Result<EncryptedPayload>
where
    T: Serialize + ?Sized,
{
    let plaintext = serde_json::to_vec(data)?;

    // Never reuse an IV under the same key
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = key
        .cipher
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|e| AppError::Generic(format!("Encryption failed: {}", e)))?;

    Ok(EncryptedPayload {
        iv: STANDARD.encode(nonce_bytes),
        ciphertext: STANDARD.encode(ciphertext),
    })
}

/// Decrypt and deserialize a payload produced by [`encrypt_json`].
///
/// Fails closed: any tag mismatch, wrong key or malformed input is an
/// `AppError::CannotDecrypt`, never partial plaintext.
pub fn decrypt_json<T>(key: &JournalKey, iv: &str, ciphertext: &str) -> Result<T>
where
    T: DeserializeOwned,
{
    let nonce_bytes = STANDARD
        .decode(iv)
        .map_err(|_| AppError::CannotDecrypt("IV is not valid base64".to_string()))?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(AppError::CannotDecrypt(format!(
            "IV must be {} bytes, got {}",
            NONCE_SIZE,
            nonce_bytes.len()
        )));
    }

    let ciphertext = STANDARD
        .decode(ciphertext)
        .map_err(|_| AppError::CannotDecrypt("Ciphertext is not valid base64".to_string()))?;

    let plaintext = key
        .cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|_| AppError::CannotDecrypt("Authentication failed".to_string()))?;

    serde_json::from_slice(&plaintext)
        .map_err(|e| AppError::CannotDecrypt(format!("Decrypted payload is not valid JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn test_key(passcode: &str) -> (JournalKey, Vec<u8>) {
        let salt = generate_salt();
        (derive_key(passcode, &salt).unwrap(), salt)
    }

    #[test]
    fn test_encrypt_decrypt() {
        let (key, _) = test_key("correct horse");
        let data = json!({ "entry": "Walked outside", "mood": "🌿", "n": [1, 2, 3] });

        let encrypted = encrypt_json(&key, &data).unwrap();
        let decrypted: Value = decrypt_json(&key, &encrypted.iv, &encrypted.ciphertext).unwrap();

        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_same_passcode_and_salt_derive_same_key() {
        let (key, salt) = test_key("passcode");
        let again = derive_key("passcode", &salt).unwrap();

        let encrypted = encrypt_json(&key, "hello").unwrap();
        let decrypted: String = decrypt_json(&again, &encrypted.iv, &encrypted.ciphertext).unwrap();

        assert_eq!(decrypted, "hello");
    }

    #[test]
    fn test_wrong_passcode() {
        let (key, salt) = test_key("correct");
        let wrong = derive_key("wrong", &salt).unwrap();

        let encrypted = encrypt_json(&key, &json!({"secret": true})).unwrap();
        let result = decrypt_json::<Value>(&wrong, &encrypted.iv, &encrypted.ciphertext);

        assert!(matches!(result, Err(AppError::CannotDecrypt(_))));
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let (key, _) = test_key("pass");

        let first = encrypt_json(&key, "same data").unwrap();
        let second = encrypt_json(&key, "same data").unwrap();

        assert_ne!(first.iv, second.iv);
        assert_ne!(first.ciphertext, second.ciphertext);
        assert_eq!(STANDARD.decode(&first.iv).unwrap().len(), NONCE_SIZE);
    }

    #[test]
    fn test_corrupted_ciphertext() {
        let (key, _) = test_key("pass");
        let encrypted = encrypt_json(&key, "Original message").unwrap();

        let mut raw = STANDARD.decode(&encrypted.ciphertext).unwrap();
        raw[0] ^= 0xFF;
        let tampered = STANDARD.encode(raw);

        let result = decrypt_json::<String>(&key, &encrypted.iv, &tampered);
        assert!(matches!(result, Err(AppError::CannotDecrypt(_))));
    }

    #[test]
    fn test_malformed_inputs() {
        let (key, _) = test_key("pass");
        let encrypted = encrypt_json(&key, "x").unwrap();

        let bad_b64 = decrypt_json::<String>(&key, "not base64!!", &encrypted.ciphertext);
        assert!(matches!(bad_b64, Err(AppError::CannotDecrypt(_))));

        let short_iv = decrypt_json::<String>(&key, &STANDARD.encode([0u8; 4]), &encrypted.ciphertext);
        assert!(matches!(short_iv, Err(AppError::CannotDecrypt(_))));

        let bad_ct = decrypt_json::<String>(&key, &encrypted.iv, "%%%");
        assert!(matches!(bad_ct, Err(AppError::CannotDecrypt(_))));
    }

    #[test]
    fn test_empty_salt_rejected() {
        assert!(matches!(derive_key("pass", &[]), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let (key, _) = test_key("pass");
        assert_eq!(format!("{:?}", key), "JournalKey(..)");
    }

    #[tokio::test]
    async fn test_derive_key_async() {
        let salt = generate_salt();
        let key = derive_key_async("p@ssw0rd🔐".to_string(), salt.clone()).await.unwrap();
        let sync_key = derive_key("p@ssw0rd🔐", &salt).unwrap();

        let encrypted = encrypt_json(&key, &42).unwrap();
        let n: i32 = decrypt_json(&sync_key, &encrypted.iv, &encrypted.ciphertext).unwrap();
        assert_eq!(n, 42);
    }
}
