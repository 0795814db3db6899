//! Share links: `{room_id}:{base64url_key}`.
//!
//! The link is the only place the session key travels, and it never touches
//! the signaling server: the host prints it, the guest pastes it.

use crate::error::ClientError;
use partake_crypto::{SessionKey, random};
use partake_proto::valid_room_id;
use rand_core::{CryptoRng, RngCore};
use std::fmt;

/// Room id plus session key, as exchanged out-of-band.
#[derive(Clone)]
pub struct ShareLink {
    /// Room identifier
    pub room: String,
    /// Session key for every peer in the room
    pub key: SessionKey,
}

impl ShareLink {
    /// Generate a fresh room id and session key.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            room: random::room_id(rng),
            key: SessionKey::generate(rng),
        }
    }

    /// Parse a pasted link.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidLink` when the separator is missing, the
    /// room id has the wrong shape, or the key fails to decode.
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        let (room, key_text) = text
            .split_once(':')
            .ok_or_else(|| ClientError::InvalidLink("missing ':' separator".into()))?;
        if !valid_room_id(room) {
            return Err(ClientError::InvalidLink(format!("bad room id {room:?}")));
        }
        let key = SessionKey::from_base64(key_text)
            .map_err(|err| ClientError::InvalidLink(err.to_string()))?;
        Ok(Self {
            room: room.to_owned(),
            key,
        })
    }
}

impl fmt::Display for ShareLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.room, self.key.to_base64())
    }
}

impl fmt::Debug for ShareLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never leak the key through Debug output
        f.debug_struct("ShareLink")
            .field("room", &self.room)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_roundtrip() {
        let link = ShareLink::generate(&mut OsRng);
        let parsed = ShareLink::parse(&link.to_string()).unwrap();
        assert_eq!(parsed.room, link.room);
        assert_eq!(parsed.key.as_bytes(), link.key.as_bytes());
    }

    #[test]
    fn test_rejects_bad_links() {
        assert!(ShareLink::parse("no-separator").is_err());
        assert!(ShareLink::parse(":AAAA").is_err());
        assert!(ShareLink::parse("room!:AAAA").is_err());
        assert!(ShareLink::parse("room:not-base64-!!").is_err());
        // key with the wrong length
        assert!(ShareLink::parse("room:AAAA").is_err());
    }

}
