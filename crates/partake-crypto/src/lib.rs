//! # Partake Crypto
//!
//! Cryptographic primitives for Partake.
//!
//! This crate provides:
//! - `ChaCha20-Poly1305` frame encryption with a prepended random nonce
//! - Per-transfer integrity key derivation (HKDF-style, over BLAKE3)
//! - Keyed-hash integrity tags with constant-time verification
//! - URL-safe base64 for binary values crossing textual boundaries
//! - Random room, peer and transfer-nonce identifiers
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm |
//! |----------|-----------|
//! | Frame AEAD | ChaCha20-Poly1305 (96-bit nonce) |
//! | KDF | HKDF over BLAKE3 |
//! | Integrity tag | Keyed BLAKE3 |
//! | Text encoding | base64url, no padding |
//!
//! The session key for a room is generated by the host and travels
//! out-of-band inside the share link; it is never sent over any channel this
//! system controls, and it is never used directly as a MAC key.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod encoding;
pub mod error;
pub mod kdf;
pub mod mac;
pub mod random;

pub use aead::SessionKey;
pub use error::CryptoError;
pub use kdf::derive_transfer_key;
pub use mac::{MacKey, Tag, TagBuilder, compute_tag, verify_tag};
pub use random::TransferNonce;

/// Session key size (32 bytes / 256 bits).
pub const KEY_SIZE: usize = 32;

/// ChaCha20-Poly1305 nonce size (12 bytes / 96 bits).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size (16 bytes / 128 bits).
pub const AEAD_TAG_SIZE: usize = 16;

/// Per-transfer nonce size used for integrity key derivation (16 bytes).
pub const TRANSFER_NONCE_SIZE: usize = 16;

/// Integrity tag size (32 bytes, keyed BLAKE3 output).
pub const MAC_TAG_SIZE: usize = 32;
