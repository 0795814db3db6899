//! Keyed-hash integrity tags for assembled transfers.
//!
//! Whole-file tags are keyed BLAKE3 under a per-transfer derived key
//! (see [`crate::kdf`]); verification is constant-time.

use crate::{MAC_TAG_SIZE, encoding, error::CryptoError};
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

/// Derived integrity key (32 bytes). Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct MacKey([u8; 32]);

impl MacKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Integrity tag (32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag([u8; MAC_TAG_SIZE]);

impl Tag {
    /// Create a tag from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; MAC_TAG_SIZE]) -> Self {
        Self(bytes)
    }

    /// Decode a tag from its base64url wire form.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid base64 or wrong decoded length.
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let bytes = encoding::decode(text)?;
        if bytes.len() != MAC_TAG_SIZE {
            return Err(CryptoError::InvalidTagLength {
                expected: MAC_TAG_SIZE,
                actual: bytes.len(),
            });
        }
        let mut tag = [0u8; MAC_TAG_SIZE];
        tag.copy_from_slice(&bytes);
        Ok(Self(tag))
    }

    /// Encode the tag for embedding in a JSON message.
    #[must_use]
    pub fn to_base64(&self) -> String {
        encoding::encode(&self.0)
    }

    /// Raw tag bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; MAC_TAG_SIZE] {
        &self.0
    }
}

/// Incremental tag computation, for data too large to hold in one buffer.
pub struct TagBuilder {
    hasher: blake3::Hasher,
}

impl TagBuilder {
    /// Start a tag under `key`.
    #[must_use]
    pub fn new(key: &MacKey) -> Self {
        Self {
            hasher: blake3::Hasher::new_keyed(key.as_bytes()),
        }
    }

    /// Absorb the next span of data.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finish and produce the tag.
    #[must_use]
    pub fn finalize(self) -> Tag {
        Tag(*self.hasher.finalize().as_bytes())
    }
}

/// Compute the keyed integrity tag over `data`.
#[must_use]
pub fn compute_tag(key: &MacKey, data: &[u8]) -> Tag {
    let mut builder = TagBuilder::new(key);
    builder.update(data);
    builder.finalize()
}

/// Verify a tag over `data` in constant time.
#[must_use]
pub fn verify_tag(key: &MacKey, data: &[u8], tag: &Tag) -> bool {
    let expected = compute_tag(key, data);
    expected.0.ct_eq(&tag.0).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> MacKey {
        MacKey::new([7u8; 32])
    }

    #[test]
    fn test_compute_verify() {
        let key = test_key();
        let data = b"the quick brown fox";
        let tag = compute_tag(&key, data);
        assert!(verify_tag(&key, data, &tag));
    }

    #[test]
    fn test_single_byte_flip_fails() {
        let key = test_key();
        let mut data = b"the quick brown fox".to_vec();
        let tag = compute_tag(&key, &data);

        for i in 0..data.len() {
            data[i] ^= 0x01;
            assert!(!verify_tag(&key, &data, &tag), "flip at byte {i} accepted");
            data[i] ^= 0x01;
        }
        assert!(verify_tag(&key, &data, &tag));
    }

    #[test]
    fn test_wrong_key_fails() {
        let data = b"data";
        let tag = compute_tag(&test_key(), data);
        assert!(!verify_tag(&MacKey::new([8u8; 32]), data, &tag));
    }

    #[test]
    fn test_tag_base64_roundtrip() {
        let tag = compute_tag(&test_key(), b"x");
        let decoded = Tag::from_base64(&tag.to_base64()).unwrap();
        assert_eq!(tag, decoded);
    }

    #[test]
    fn test_tag_base64_wrong_length() {
        // "AAAA" decodes to 3 bytes, not a tag
        assert_eq!(
            Tag::from_base64("AAAA"),
            Err(CryptoError::InvalidTagLength {
                expected: MAC_TAG_SIZE,
                actual: 3,
            })
        );
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let key = test_key();
        let data = vec![0x5A; 200_000];
        let mut builder = TagBuilder::new(&key);
        for piece in data.chunks(64 * 1024) {
            builder.update(piece);
        }
        assert_eq!(builder.finalize(), compute_tag(&key, &data));
    }
}
