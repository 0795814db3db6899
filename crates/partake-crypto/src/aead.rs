//! `ChaCha20-Poly1305` frame encryption.
//!
//! Every frame crossing a peer transport is independently sealed with the
//! room's session key: a fresh random 96-bit nonce is generated per call and
//! prepended to the ciphertext. The relay path never sees plaintext.

use crate::error::CryptoError;
use crate::{AEAD_TAG_SIZE, KEY_SIZE, NONCE_SIZE, encoding};
use chacha20poly1305::{
    ChaCha20Poly1305,
    aead::{Aead, KeyInit},
};
use rand_core::{CryptoRng, RngCore};
use zeroize::ZeroizeOnDrop;

/// Symmetric session key for one room (32 bytes).
///
/// Generated by the host, shared with peers out-of-band in the join link.
/// Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyLength` if the slice is not 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        if slice.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Generate a random key.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Decode a key from its base64url share-link form.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid base64 or wrong decoded length.
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let bytes = encoding::decode(text)?;
        Self::from_slice(&bytes)
    }

    /// Encode the key for embedding in a share link.
    #[must_use]
    pub fn to_base64(&self) -> String {
        encoding::encode(&self.0)
    }

    /// Raw key material.
    ///
    /// # Security
    ///
    /// Handle with care - this exposes the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Seal a plaintext frame.
    ///
    /// Generates a fresh random nonce, encrypts, and returns
    /// `nonce || ciphertext+tag`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if AEAD encryption fails.
    pub fn seal<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new((&self.0).into());
        let ciphertext = cipher
            .encrypt((&nonce).into(), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut framed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        framed.extend_from_slice(&nonce);
        framed.extend_from_slice(&ciphertext);
        Ok(framed)
    }

    /// Open a sealed frame (`nonce || ciphertext+tag`).
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Integrity` if the input is shorter than
    /// nonce + tag or authentication fails.
    pub fn open(&self, framed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if framed.len() < NONCE_SIZE + AEAD_TAG_SIZE {
            return Err(CryptoError::Integrity);
        }
        let (nonce, ciphertext) = framed.split_at(NONCE_SIZE);

        let cipher = ChaCha20Poly1305::new((&self.0).into());
        cipher
            .decrypt(nonce.into(), ciphertext)
            .map_err(|_| CryptoError::Integrity)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}
