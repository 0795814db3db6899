//! # Partake Client
//!
//! Transfer orchestration for Partake.
//!
//! This crate turns the transport layer into a usable folder share:
//! - Hosting: scan a folder, answer `file-request`s with chunk streams,
//!   gate and persist uploads
//! - Downloading: request files, reassemble out-of-order chunks, verify
//!   whole-file integrity, write atomically
//! - Policy: path validation, per-peer rate limits, size ceilings
//!
//! The [`engine::Session`] wires these pieces to a signaling connection;
//! everything below it is independently testable.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod downloads;
pub mod engine;
pub mod error;
pub mod fsio;
pub mod link;
pub mod paths;
pub mod rate_limit;
pub mod uploads;

pub use downloads::{DownloadManager, FOLDER_FANOUT, FanOut};
pub use engine::{ChannelFactory, ClientEvent, HostOptions, JoinOptions, Session};
pub use error::ClientError;
pub use link::ShareLink;
pub use rate_limit::{DOWNLOAD_RATE_LIMIT, RequestLimiter, UPLOAD_RATE_LIMIT};
pub use uploads::{UPLOAD_INACTIVITY, UploadManager};
