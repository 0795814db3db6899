//! Per-transfer integrity key derivation.
//!
//! HKDF-style extract-then-expand over BLAKE3. Each file transfer derives a
//! unique MAC key from the session key and a fresh per-transfer nonce
//! (salt = nonce, fixed info label), so ciphertext replayed from one
//! transfer cannot forge integrity tags for another, and the session key is
//! never used directly for MACs.

use crate::aead::SessionKey;
use crate::mac::MacKey;
use crate::random::TransferNonce;

/// Fixed context label for transfer MAC key derivation.
const TRANSFER_MAC_INFO: &[u8] = b"partake file mac";

/// HKDF-Extract: derive a pseudorandom key from input key material.
///
/// Corresponds to HKDF-Extract from RFC 5869, but using BLAKE3.
#[must_use]
pub fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> [u8; 32] {
    let salt_key = *blake3::hash(salt).as_bytes();
    let mut hasher = blake3::Hasher::new_keyed(&salt_key);
    hasher.update(ikm);
    *hasher.finalize().as_bytes()
}

/// HKDF-Expand: expand a pseudorandom key into arbitrary-length output.
pub fn hkdf_expand(prk: &[u8; 32], info: &[u8], output: &mut [u8]) {
    let mut hasher = blake3::Hasher::new_keyed(prk);
    hasher.update(info);
    hasher.finalize_xof().fill(output);
}

/// Derive the per-transfer integrity key.
///
/// Combines the raw session key material with the transfer nonce
/// (ikm = key || nonce, salt = nonce) and expands under the fixed
/// `"partake file mac"` label.
#[must_use]
pub fn derive_transfer_key(session_key: &SessionKey, nonce: &TransferNonce) -> MacKey {
    let mut ikm = Vec::with_capacity(crate::KEY_SIZE + crate::TRANSFER_NONCE_SIZE);
    ikm.extend_from_slice(session_key.as_bytes());
    ikm.extend_from_slice(nonce.as_bytes());

    let prk = hkdf_extract(nonce.as_bytes(), &ikm);
    let mut key = [0u8; 32];
    hkdf_expand(&prk, TRANSFER_MAC_INFO, &mut key);
    MacKey::new(key)
}
