//! JSON message definitions.
//!
//! Two families share the wire format conventions (kebab-case `type` tag,
//! camelCase fields): [`ControlMessage`]s travel encrypted between peers,
//! [`SignalMessage`]s travel in the clear over the signaling connection and
//! carry nothing sensitive.

use crate::error::ProtoError;
use serde::{Deserialize, Serialize};

/// One entry of a shared folder's file list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Path relative to the share root, `/`-separated
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time, milliseconds since the Unix epoch
    pub modified: u64,
}

/// Control messages exchanged between peers (always encrypted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Host's view of the shared folder
    #[serde(rename = "file-list")]
    #[serde(rename_all = "camelCase")]
    FileList {
        /// All files in the share
        files: Vec<FileEntry>,
        /// Whether the host accepts uploads
        allow_write: bool,
    },

    /// Peer asks the host for one file
    #[serde(rename = "file-request")]
    FileRequest {
        /// Requested path, relative to the share root
        path: String,
    },

    /// Host signals the end of a file's chunk stream
    #[serde(rename = "file-complete")]
    FileComplete {
        /// Path the chunks were sent under
        path: String,
        /// Base file name for saving
        name: String,
        /// Declared byte size
        size: u64,
        /// Per-transfer nonce (base64url)
        nonce: String,
        /// Whole-file integrity tag (base64url)
        hmac: String,
    },

    /// Peer announces an upload
    #[serde(rename = "upload-start")]
    #[serde(rename_all = "camelCase")]
    UploadStart {
        /// Destination path, relative to the share root
        path: String,
        /// Declared byte size
        size: u64,
        /// Declared chunk count
        total_chunks: u32,
    },

    /// Peer signals the end of an upload's chunk stream
    #[serde(rename = "upload-complete")]
    UploadComplete {
        /// Path the chunks were sent under
        path: String,
        /// Per-transfer nonce (base64url)
        nonce: String,
        /// Whole-file integrity tag (base64url)
        hmac: String,
    },

    /// Host reports the outcome of an upload
    #[serde(rename = "upload-response")]
    UploadResponse {
        /// Path the response refers to
        path: String,
        /// Whether the upload was accepted and written
        success: bool,
        /// Human-readable reason
        message: String,
    },
}

impl ControlMessage {
    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::Json` if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::Json` on malformed or unknown messages.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Messages on the signaling connection (UTF-8 text frames).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalMessage {
    /// Client requests to join a room
    #[serde(rename = "join")]
    Join {
        /// Room identifier
        room: String,
    },

    /// Server assigns the connection its peer identity
    #[serde(rename = "peer-id")]
    #[serde(rename_all = "camelCase")]
    PeerId {
        /// Server-generated peer identifier
        peer_id: String,
    },

    /// A peer entered the room
    #[serde(rename = "peer-joined")]
    #[serde(rename_all = "camelCase")]
    PeerJoined {
        /// The peer's identifier
        peer_id: String,
    },

    /// A peer left the room
    #[serde(rename = "peer-left")]
    #[serde(rename_all = "camelCase")]
    PeerLeft {
        /// The peer's identifier
        peer_id: String,
    },

    /// Opaque negotiation payload forwarded between two peers.
    ///
    /// Clients set `target_peer_id`; the server rewrites the message with
    /// `from_peer_id` before forwarding. The payload is never interpreted.
    #[serde(rename = "signal")]
    #[serde(rename_all = "camelCase")]
    Signal {
        /// Destination peer (client to server)
        #[serde(skip_serializing_if = "Option::is_none")]
        target_peer_id: Option<String>,
        /// Originating peer (server to client)
        #[serde(skip_serializing_if = "Option::is_none")]
        from_peer_id: Option<String>,
        /// Opaque negotiation payload
        signal: serde_json::Value,
    },

    /// The room is owned by another server instance
    #[serde(rename = "redirect")]
    Redirect {
        /// Identifier of the owning instance
        instance: String,
    },

    /// Server-side rejection with a reason
    #[serde(rename = "error")]
    Error {
        /// Human-readable reason
        message: String,
    },
}

impl SignalMessage {
    /// Serialize to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::Json` if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::Json` on malformed or unknown messages.
    pub fn from_json(text: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_wire_names() {
        let msg = ControlMessage::FileList {
            files: vec![FileEntry {
                path: "docs/report.pdf".into(),
                size: 1024,
                modified: 1_700_000_000_000,
            }],
            allow_write: true,
        };
        let json = String::from_utf8(msg.to_bytes().unwrap()).unwrap();
        assert!(json.contains(r#""type":"file-list""#));
        assert!(json.contains(r#""allowWrite":true"#));
        assert_eq!(ControlMessage::from_bytes(json.as_bytes()).unwrap(), msg);
    }

    #[test]
    fn test_upload_start_wire_names() {
        let msg = ControlMessage::UploadStart {
            path: "a.bin".into(),
            size: 65537,
            total_chunks: 2,
        };
        let json = String::from_utf8(msg.to_bytes().unwrap()).unwrap();
        assert!(json.contains(r#""type":"upload-start""#));
        assert!(json.contains(r#""totalChunks":2"#));
    }

    #[test]
    fn test_signal_roundtrip() {
        let msg = SignalMessage::Signal {
            target_peer_id: Some("abc".into()),
            from_peer_id: None,
            signal: serde_json::json!({"candidate": {"sdpMid": "0"}}),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""targetPeerId":"abc""#));
        assert!(!json.contains("fromPeerId"));
        assert_eq!(SignalMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(SignalMessage::from_json(r#"{"type":"mystery"}"#).is_err());
        assert!(ControlMessage::from_bytes(br#"{"type":"mystery"}"#).is_err());
    }

    #[test]
    fn test_join_shape() {
        let msg = SignalMessage::from_json(r#"{"type":"join","room":"abc123"}"#).unwrap();
        assert_eq!(
            msg,
            SignalMessage::Join {
                room: "abc123".into()
            }
        );
    }
}
