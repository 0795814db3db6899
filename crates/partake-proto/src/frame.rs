//! Frame encoding and decoding for the Partake wire protocol.
//!
//! Every payload crossing a peer transport is, before encryption, a byte
//! sequence whose first byte is a type tag. Binary chunk headers use
//! little-endian fields.

use crate::error::ProtoError;

/// Frame types as carried in the first byte of every plaintext frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Single JSON control message
    Json = 0,
    /// Chunk of file data being downloaded
    FileChunk = 1,
    /// Chunk of file data being uploaded
    UploadChunk = 2,
    /// Fragment of a JSON message too large for one frame
    JsonChunk = 3,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Json),
            1 => Ok(Self::FileChunk),
            2 => Ok(Self::UploadChunk),
            3 => Ok(Self::JsonChunk),
            _ => Err(ProtoError::InvalidFrameType(value)),
        }
    }
}

/// Header size of a binary chunk frame before the path bytes:
/// type(1) + index(4) + total(4) + path_len(2).
const CHUNK_HEADER_SIZE: usize = 11;

/// Header size of a JSON-chunk frame:
/// type(1) + message_id(4) + index(4) + total(4).
const JSON_CHUNK_HEADER_SIZE: usize = 13;

/// A parsed plaintext frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 JSON document
    Json(Vec<u8>),
    /// File data chunk (download direction)
    FileChunk {
        /// Logical path of the file within the share
        path: String,
        /// Chunk index
        index: u32,
        /// Total chunk count for this file
        total: u32,
        /// Raw chunk bytes
        data: Vec<u8>,
    },
    /// File data chunk (upload direction)
    UploadChunk {
        /// Logical path of the file within the share
        path: String,
        /// Chunk index
        index: u32,
        /// Total chunk count for this file
        total: u32,
        /// Raw chunk bytes
        data: Vec<u8>,
    },
    /// Fragment of an oversized JSON document
    JsonChunk {
        /// Identifier grouping fragments of one message
        message_id: u32,
        /// Fragment index
        index: u32,
        /// Total fragment count
        total: u32,
        /// Fragment bytes
        data: Vec<u8>,
    },
}

impl Frame {
    /// Encode the frame to its wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Json(body) => {
                let mut out = Vec::with_capacity(1 + body.len());
                out.push(FrameType::Json as u8);
                out.extend_from_slice(body);
                out
            }
            Frame::FileChunk {
                path,
                index,
                total,
                data,
            } => encode_chunk(FrameType::FileChunk, path, *index, *total, data),
            Frame::UploadChunk {
                path,
                index,
                total,
                data,
            } => encode_chunk(FrameType::UploadChunk, path, *index, *total, data),
            Frame::JsonChunk {
                message_id,
                index,
                total,
                data,
            } => {
                let mut out = Vec::with_capacity(JSON_CHUNK_HEADER_SIZE + data.len());
                out.push(FrameType::JsonChunk as u8);
                out.extend_from_slice(&message_id.to_le_bytes());
                out.extend_from_slice(&index.to_le_bytes());
                out.extend_from_slice(&total.to_le_bytes());
                out.extend_from_slice(data);
                out
            }
        }
    }

    /// Parse a frame from its wire form.
    ///
    /// # Errors
    ///
    /// Returns a `ProtoError` on an empty buffer, unknown type tag,
    /// truncated header, path overflow, or non-UTF-8 path.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtoError> {
        let tag = *raw.first().ok_or(ProtoError::TooShort {
            expected: 1,
            actual: 0,
        })?;

        match FrameType::try_from(tag)? {
            FrameType::Json => Ok(Frame::Json(raw[1..].to_vec())),
            FrameType::FileChunk => {
                let (path, index, total, data) = parse_chunk(raw)?;
                Ok(Frame::FileChunk {
                    path,
                    index,
                    total,
                    data,
                })
            }
            FrameType::UploadChunk => {
                let (path, index, total, data) = parse_chunk(raw)?;
                Ok(Frame::UploadChunk {
                    path,
                    index,
                    total,
                    data,
                })
            }
            FrameType::JsonChunk => {
                if raw.len() < JSON_CHUNK_HEADER_SIZE {
                    return Err(ProtoError::TooShort {
                        expected: JSON_CHUNK_HEADER_SIZE,
                        actual: raw.len(),
                    });
                }
                let message_id = u32::from_le_bytes(raw[1..5].try_into().unwrap());
                let index = u32::from_le_bytes(raw[5..9].try_into().unwrap());
                let total = u32::from_le_bytes(raw[9..13].try_into().unwrap());
                Ok(Frame::JsonChunk {
                    message_id,
                    index,
                    total,
                    data: raw[JSON_CHUNK_HEADER_SIZE..].to_vec(),
                })
            }
        }
    }
}

fn encode_chunk(kind: FrameType, path: &str, index: u32, total: u32, data: &[u8]) -> Vec<u8> {
    let path_bytes = path.as_bytes();
    debug_assert!(path_bytes.len() <= u16::MAX as usize);
    let mut out = Vec::with_capacity(CHUNK_HEADER_SIZE + path_bytes.len() + data.len());
    out.push(kind as u8);
    out.extend_from_slice(&index.to_le_bytes());
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(&(path_bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(path_bytes);
    out.extend_from_slice(data);
    out
}

fn parse_chunk(raw: &[u8]) -> Result<(String, u32, u32, Vec<u8>), ProtoError> {
    if raw.len() < CHUNK_HEADER_SIZE {
        return Err(ProtoError::TooShort {
            expected: CHUNK_HEADER_SIZE,
            actual: raw.len(),
        });
    }
    let index = u32::from_le_bytes(raw[1..5].try_into().unwrap());
    let total = u32::from_le_bytes(raw[5..9].try_into().unwrap());
    let path_len = u16::from_le_bytes(raw[9..11].try_into().unwrap()) as usize;

    let path_end = CHUNK_HEADER_SIZE
        .checked_add(path_len)
        .ok_or(ProtoError::PathOverflow)?;
    if raw.len() < path_end {
        return Err(ProtoError::PathOverflow);
    }
    let path = std::str::from_utf8(&raw[CHUNK_HEADER_SIZE..path_end])
        .map_err(|_| ProtoError::InvalidPath)?
        .to_owned();

    Ok((path, index, total, raw[path_end..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let frame = Frame::Json(br#"{"type":"file-request","path":"a.txt"}"#.to_vec());
        let raw = frame.encode();
        assert_eq!(raw[0], 0);
        assert_eq!(Frame::parse(&raw).unwrap(), frame);
    }

    #[test]
    fn test_file_chunk_roundtrip() {
        let frame = Frame::FileChunk {
            path: "docs/report.pdf".into(),
            index: 3,
            total: 160,
            data: vec![0xAB; 64 * 1024],
        };
        let raw = frame.encode();
        assert_eq!(raw[0], 1);
        // index u32 LE at offset 1
        assert_eq!(&raw[1..5], &3u32.to_le_bytes());
        // total u32 LE at offset 5
        assert_eq!(&raw[5..9], &160u32.to_le_bytes());
        // path length u16 LE at offset 9
        assert_eq!(&raw[9..11], &(15u16).to_le_bytes());
        assert_eq!(Frame::parse(&raw).unwrap(), frame);
    }

    #[test]
    fn test_upload_chunk_roundtrip() {
        let frame = Frame::UploadChunk {
            path: "in/new.bin".into(),
            index: 0,
            total: 1,
            data: b"payload".to_vec(),
        };
        let raw = frame.encode();
        assert_eq!(raw[0], 2);
        assert_eq!(Frame::parse(&raw).unwrap(), frame);
    }

    #[test]
    fn test_json_chunk_roundtrip() {
        let frame = Frame::JsonChunk {
            message_id: 7,
            index: 2,
            total: 5,
            data: b"fragment".to_vec(),
        };
        let raw = frame.encode();
        assert_eq!(raw[0], 3);
        assert_eq!(&raw[1..5], &7u32.to_le_bytes());
        assert_eq!(Frame::parse(&raw).unwrap(), frame);
    }

    #[test]
    fn test_empty_frame_rejected() {
        assert_eq!(
            Frame::parse(&[]),
            Err(ProtoError::TooShort {
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert_eq!(Frame::parse(&[9, 0, 0]), Err(ProtoError::InvalidFrameType(9)));
    }

    #[test]
    fn test_truncated_chunk_header() {
        assert!(matches!(
            Frame::parse(&[1, 0, 0, 0]),
            Err(ProtoError::TooShort { .. })
        ));
    }

    #[test]
    fn test_path_overflow() {
        // header declares a 100-byte path but only 2 bytes follow
        let mut raw = vec![1u8];
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.extend_from_slice(&100u16.to_le_bytes());
        raw.extend_from_slice(b"ab");
        assert_eq!(Frame::parse(&raw), Err(ProtoError::PathOverflow));
    }

    #[test]
    fn test_non_utf8_path() {
        let mut raw = vec![1u8];
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.extend_from_slice(&2u16.to_le_bytes());
        raw.extend_from_slice(&[0xFF, 0xFE]);
        assert_eq!(Frame::parse(&raw), Err(ProtoError::InvalidPath));
    }
}
