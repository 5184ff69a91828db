//! Key derivation and payload encryption.
//!
//! Both peers derive the same 256-bit AES-GCM key from the room code alone,
//! so no key material ever crosses the wire. This is a shared-secret scheme
//! on purpose: anyone holding the code can read that session's traffic.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::RoomCode;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Fixed application-level salt; the room code is the only variable input
const KDF_SALT: &[u8] = b"roomdrop-file-share-salt";
const KDF_ITERATIONS: u32 = 80_000;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("payload encryption failed")]
    Seal,
    #[error("authentication failed or ciphertext malformed")]
    Open,
    #[error("nonce is not valid base64 of {NONCE_LEN} bytes")]
    BadNonce,
}

/// Session transfer key, valid for exactly one room code
#[derive(Clone)]
pub struct TransferKey {
    cipher: Aes256Gcm,
}

/// Derive the session key from a room code.
///
/// PBKDF2-HMAC-SHA256 with a fixed salt and iteration count: deterministic,
/// so both peers arrive at the identical key independently.
pub fn derive_key(room_code: &RoomCode) -> TransferKey {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(
        room_code.as_str().as_bytes(),
        KDF_SALT,
        KDF_ITERATIONS,
        &mut key,
    );
    TransferKey {
        cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
    }
}

impl TransferKey {
    /// Encrypt a whole file payload; the ciphertext carries the auth tag
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plain)
            .map_err(|_| CryptoError::Seal)
    }

    /// Decrypt and authenticate a reassembled payload
    pub fn open(&self, nonce: &[u8; NONCE_LEN], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Open)
    }
}

/// Fresh random 96-bit nonce, one per file
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    Aes256Gcm::generate_nonce(&mut OsRng).into()
}

pub fn encode_nonce(nonce: &[u8; NONCE_LEN]) -> String {
    BASE64.encode(nonce)
}

pub fn decode_nonce(encoded: &str) -> Result<[u8; NONCE_LEN], CryptoError> {
    let raw = BASE64.decode(encoded).map_err(|_| CryptoError::BadNonce)?;
    raw.try_into().map_err(|_| CryptoError::BadNonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TransferKey {
        derive_key(&RoomCode::parse("482913").unwrap())
    }

    #[test]
    fn derivation_is_deterministic() {
        let nonce = [7u8; NONCE_LEN];
        let a = key().seal(&nonce, b"payload").unwrap();
        let b = key().seal(&nonce, b"payload").unwrap();
        // same code, same nonce: independently derived keys must agree
        assert_eq!(a, b);
    }

    #[test]
    fn different_codes_yield_different_keys() {
        let nonce = [7u8; NONCE_LEN];
        let a = key().seal(&nonce, b"payload").unwrap();
        let b = derive_key(&RoomCode::parse("482914").unwrap())
            .seal(&nonce, b"payload")
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn round_trip_various_lengths() {
        let key = key();
        for len in [0usize, 1, 11, 64 * 1024, 100_000] {
            let plain = vec![0xA5u8; len];
            let nonce = generate_nonce();
            let sealed = key.seal(&nonce, &plain).unwrap();
            assert_eq!(sealed.len(), len + 16, "ciphertext carries a 16-byte tag");
            assert_eq!(key.open(&nonce, &sealed).unwrap(), plain);
        }
    }

    #[test]
    fn distinct_nonces_produce_distinct_ciphertexts() {
        let key = key();
        let n1 = generate_nonce();
        let n2 = generate_nonce();
        assert_ne!(n1, n2);
        assert_ne!(
            key.seal(&n1, b"same plaintext").unwrap(),
            key.seal(&n2, b"same plaintext").unwrap()
        );
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let key = key();
        let nonce = generate_nonce();
        let mut sealed = key.seal(&nonce, b"attack at dawn").unwrap();
        sealed[3] ^= 0x01;
        assert!(matches!(key.open(&nonce, &sealed), Err(CryptoError::Open)));
    }

    #[test]
    fn nonce_base64_round_trip() {
        let nonce = generate_nonce();
        assert_eq!(decode_nonce(&encode_nonce(&nonce)).unwrap(), nonce);
        assert!(decode_nonce("not base64!").is_err());
        assert!(decode_nonce(&BASE64.encode([0u8; 8])).is_err());
    }
}
