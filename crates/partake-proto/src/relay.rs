//! The relay envelope carried over the signaling connection.
//!
//! When the direct path is unavailable, encrypted frames travel as binary
//! WebSocket messages: `[1][peer_id_len:u16 BE][peer_id][payload]`. A client
//! addresses the envelope to a target peer; the server re-frames it with the
//! *sender's* id before forwarding, so recipients learn who sent it and
//! identity cannot be spoofed.

use crate::error::ProtoError;

/// Type byte marking a binary relay message.
pub const BINARY_RELAY: u8 = 1;

/// A parsed relay envelope.
///
/// `peer_id` is the target on the client-to-server leg and the sender on
/// the server-to-client leg; the payload is opaque ciphertext either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEnvelope {
    /// Target or sender peer id, depending on direction
    pub peer_id: String,
    /// Opaque encrypted payload
    pub payload: Vec<u8>,
}

impl RelayEnvelope {
    /// Build an envelope addressed to (or attributed to) `peer_id`.
    #[must_use]
    pub fn new(peer_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            peer_id: peer_id.into(),
            payload,
        }
    }

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let id = self.peer_id.as_bytes();
        debug_assert!(id.len() <= u16::MAX as usize);
        let mut out = Vec::with_capacity(3 + id.len() + self.payload.len());
        out.push(BINARY_RELAY);
        out.extend_from_slice(&(id.len() as u16).to_be_bytes());
        out.extend_from_slice(id);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse wire bytes.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::BadEnvelope` when the type byte, length field,
    /// or id encoding is invalid.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtoError> {
        if raw.len() < 3 || raw[0] != BINARY_RELAY {
            return Err(ProtoError::BadEnvelope);
        }
        let id_len = u16::from_be_bytes([raw[1], raw[2]]) as usize;
        let id_end = 3usize.checked_add(id_len).ok_or(ProtoError::BadEnvelope)?;
        if raw.len() < id_end {
            return Err(ProtoError::BadEnvelope);
        }
        let peer_id = std::str::from_utf8(&raw[3..id_end])
            .map_err(|_| ProtoError::BadEnvelope)?
            .to_owned();
        Ok(Self {
            peer_id,
            payload: raw[id_end..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let env = RelayEnvelope::new("peer-abc", vec![1, 2, 3, 4]);
        let raw = env.encode();
        assert_eq!(raw[0], BINARY_RELAY);
        assert_eq!(u16::from_be_bytes([raw[1], raw[2]]), 8);
        assert_eq!(RelayEnvelope::parse(&raw).unwrap(), env);
    }

    #[test]
    fn test_reframe_with_sender() {
        // client addresses target; server re-frames with the sender's id
        let from_client = RelayEnvelope::new("target", vec![9; 16]);
        let parsed = RelayEnvelope::parse(&from_client.encode()).unwrap();
        let to_target = RelayEnvelope::new("sender", parsed.payload.clone());
        let delivered = RelayEnvelope::parse(&to_target.encode()).unwrap();
        assert_eq!(delivered.peer_id, "sender");
        assert_eq!(delivered.payload, vec![9; 16]);
    }

    #[test]
    fn test_bad_inputs() {
        assert!(RelayEnvelope::parse(&[]).is_err());
        assert!(RelayEnvelope::parse(&[0, 0, 0]).is_err());
        // declared id longer than the buffer
        assert!(RelayEnvelope::parse(&[1, 0, 10, b'a']).is_err());
        // non-utf8 id
        assert!(RelayEnvelope::parse(&[1, 0, 1, 0xFF]).is_err());
    }

    #[test]
    fn test_empty_payload() {
        let env = RelayEnvelope::new("p", vec![]);
        assert_eq!(RelayEnvelope::parse(&env.encode()).unwrap(), env);
    }
}
