//! Random identifiers: rooms, peers, transfer nonces.

use crate::{TRANSFER_NONCE_SIZE, encoding, error::CryptoError};
use rand_core::{CryptoRng, RngCore};

/// Room identifier entropy (8 bytes, base64url on the wire).
const ROOM_ID_SIZE: usize = 8;

/// Peer identifier entropy (16 bytes / 128 bits, base64url on the wire).
const PEER_ID_SIZE: usize = 16;

/// Generate a random room identifier (base64url, 8 bytes of entropy).
#[must_use]
pub fn room_id<R: RngCore + CryptoRng>(rng: &mut R) -> String {
    let mut bytes = [0u8; ROOM_ID_SIZE];
    rng.fill_bytes(&mut bytes);
    encoding::encode(&bytes)
}

/// Generate a random peer identifier (base64url, 128 bits of entropy).
///
/// Peer ids are always server-assigned, never client-supplied.
#[must_use]
pub fn peer_id<R: RngCore + CryptoRng>(rng: &mut R) -> String {
    let mut bytes = [0u8; PEER_ID_SIZE];
    rng.fill_bytes(&mut bytes);
    encoding::encode(&bytes)
}

/// Per-transfer nonce for integrity key derivation (16 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferNonce([u8; TRANSFER_NONCE_SIZE]);

impl TransferNonce {
    /// Generate a fresh random nonce.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; TRANSFER_NONCE_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Decode a nonce from its base64url wire form.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid base64 or wrong decoded length.
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let bytes = encoding::decode(text)?;
        if bytes.len() != TRANSFER_NONCE_SIZE {
            return Err(CryptoError::InvalidNonceLength {
                expected: TRANSFER_NONCE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut nonce = [0u8; TRANSFER_NONCE_SIZE];
        nonce.copy_from_slice(&bytes);
        Ok(Self(nonce))
    }

    /// Encode the nonce for embedding in a JSON message.
    #[must_use]
    pub fn to_base64(&self) -> String {
        encoding::encode(&self.0)
    }

    /// Raw nonce bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TRANSFER_NONCE_SIZE] {
        &self.0
    }
}
