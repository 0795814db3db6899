//! Error types for Partake cryptographic operations.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length provided
        actual: usize,
    },

    /// Framed ciphertext shorter than nonce + tag, or authentication failed
    #[error("integrity check failed")]
    Integrity,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Base64 decoding failed
    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    /// Invalid transfer nonce length
    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length provided
        actual: usize,
    },

    /// Invalid integrity tag length
    #[error("invalid tag length: expected {expected}, got {actual}")]
    InvalidTagLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length provided
        actual: usize,
    },
}
