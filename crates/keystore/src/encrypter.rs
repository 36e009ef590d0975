// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::Arc;

use aead::AeadInPlace;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Tag};
use generic_array::GenericArray;
use rand::{CryptoRng, RngCore};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Helps encrypting and decrypting data
#[derive(Clone)]
pub struct Encrypter {
    aead: Arc<ChaCha20Poly1305>,
}

impl std::fmt::Debug for Encrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encrypter").finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
#[error("Decryption error")]
pub enum DecryptError {
    Aead(#[from] aead::Error),
    Hex(#[from] hex::FromHexError),
    Utf8(#[from] std::string::FromUtf8Error),
    Shape,
}

impl Encrypter {
    /// Creates an [`Encrypter`] out of an encryption key
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        let key = GenericArray::from_slice(key);
        let aead = ChaCha20Poly1305::new(key);
        let aead = Arc::new(aead);
        Self { aead }
    }

    /// Creates an [`Encrypter`] with a freshly generated key
    #[must_use]
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        Self::new(&key)
    }

    /// Encrypt a payload, returning the ciphertext and the authentication tag
    /// separately
    ///
    /// # Errors
    ///
    /// Will return `Err` when the payload failed to encrypt
    pub fn encrypt(
        &self,
        nonce: &[u8; NONCE_LEN],
        decrypted: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_LEN]), aead::Error> {
        let nonce = GenericArray::from_slice(&nonce[..]);
        let mut buffer = decrypted.to_vec();
        let tag = self
            .aead
            .encrypt_in_place_detached(nonce, b"", &mut buffer)?;
        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(&tag);
        Ok((buffer, tag_bytes))
    }

    /// Decrypts a payload
    ///
    /// # Errors
    ///
    /// Will return `Err` when the payload failed to decrypt
    pub fn decrypt(
        &self,
        nonce: &[u8; NONCE_LEN],
        tag: &[u8; TAG_LEN],
        encrypted: &[u8],
    ) -> Result<Vec<u8>, aead::Error> {
        let nonce = GenericArray::from_slice(&nonce[..]);
        let tag = Tag::from_slice(&tag[..]);
        let mut buffer = encrypted.to_vec();
        self.aead
            .decrypt_in_place_detached(nonce, b"", &mut buffer, tag)?;
        Ok(buffer)
    }

    /// Encrypt a string to the self-contained `nonce:tag:ciphertext` format,
    /// each part being hex-encoded
    ///
    /// # Errors
    ///
    /// Will return `Err` when the payload failed to encrypt
    pub fn encrypt_to_string(&self, decrypted: &str) -> Result<String, aead::Error> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let (encrypted, tag) = self.encrypt(&nonce, decrypted.as_bytes())?;
        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(encrypted)
        ))
    }

    /// Decrypt a string produced by [`Encrypter::encrypt_to_string`]
    ///
    /// # Errors
    ///
    /// Will return `Err` if the input is malformed, was tampered with, or was
    /// encrypted with another key
    pub fn decrypt_string(&self, encrypted: &str) -> Result<String, DecryptError> {
        let mut parts = encrypted.split(':');
        let (Some(nonce), Some(tag), Some(payload), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(DecryptError::Shape);
        };

        let nonce: [u8; NONCE_LEN] = hex::decode(nonce)?
            .try_into()
            .map_err(|_| DecryptError::Shape)?;
        let tag: [u8; TAG_LEN] = hex::decode(tag)?
            .try_into()
            .map_err(|_| DecryptError::Shape)?;
        let payload = hex::decode(payload)?;

        let decrypted = self.decrypt(&nonce, &tag, &payload)?;
        Ok(String::from_utf8(decrypted)?)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn encrypter() -> Encrypter {
        let mut rng = rand_chacha::ChaChaRng::seed_from_u64(42);
        Encrypter::generate(&mut rng)
    }

    #[test]
    fn roundtrip() {
        let encrypter = encrypter();

        for token in ["", "a", "eyJhbGciOiJSUzI1NiJ9.refresh.token", "ünïcødé"] {
            let encrypted = encrypter.encrypt_to_string(token).unwrap();
            assert_eq!(encrypted.split(':').count(), 3);
            assert_eq!(encrypter.decrypt_string(&encrypted).unwrap(), token);
        }
    }

    #[test]
    fn nonce_is_random() {
        let encrypter = encrypter();
        let first = encrypter.encrypt_to_string("token").unwrap();
        let second = encrypter.encrypt_to_string("token").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn tampering_is_detected() {
        let encrypter = encrypter();
        let encrypted = encrypter.encrypt_to_string("refresh-token").unwrap();
        let parts: Vec<&str> = encrypted.split(':').collect();

        // Flip one bit of the ciphertext
        let mut payload = hex::decode(parts[2]).unwrap();
        payload[0] ^= 1;
        let tampered = format!("{}:{}:{}", parts[0], parts[1], hex::encode(payload));
        assert!(matches!(
            encrypter.decrypt_string(&tampered),
            Err(DecryptError::Aead(_))
        ));

        // Swap the tag for another one
        let tampered = format!("{}:{}:{}", parts[0], "00".repeat(16), parts[2]);
        assert!(encrypter.decrypt_string(&tampered).is_err());
    }

    #[test]
    fn malformed_input_is_rejected() {
        let encrypter = encrypter();

        for input in ["", "abc", "00:00", "00:00:00:00", "zz:zz:zz", "00:00:00"] {
            assert!(encrypter.decrypt_string(input).is_err(), "{input:?}");
        }
    }

    #[test]
    fn other_key_cannot_decrypt() {
        let encrypted = encrypter().encrypt_to_string("secret").unwrap();
        let other = Encrypter::new(&[7; 32]);
        assert!(other.decrypt_string(&encrypted).is_err());
    }
}
