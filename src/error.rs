//! Canonical error and result types for the crate.
//!
//! `RsockError` is the single error surface exposed by connection
//! establishment and request operations. Decode failures carry a structured
//! [`MalformedFrame`] reason; peer-reported failures carry the error code
//! and message from the wire.

use std::io;

use thiserror::Error;

/// Top-level error type exposed by `rsock`.
///
/// Decode errors are connection-fatal: a corrupted frame stream cannot be
/// resynchronized, so the connection transitions to `Errored` and every
/// pending request fails with [`ConnectionLost`](Self::ConnectionLost).
/// Peer-reported errors ([`Peer`](Self::Peer)) are isolated to the stream
/// that owns them; the connection stays open.
#[derive(Debug, Error)]
pub enum RsockError {
    /// Inbound bytes could not be parsed as a frame.
    #[error("malformed frame: {0}")]
    Malformed(#[from] MalformedFrame),
    /// The setup handshake did not complete; no connection was established.
    #[error("setup failed: {reason}")]
    SetupFailed {
        /// Human-readable description of the handshake failure.
        reason: String,
    },
    /// The client-side stream id space was exhausted.
    #[error("stream id space exhausted")]
    StreamSpaceExhausted,
    /// The peer reported an error for a single stream.
    #[error("peer error {code:#06x}: {message}")]
    Peer {
        /// Protocol or application error code carried by the error frame.
        code: u32,
        /// UTF-8 message carried by the error frame.
        message: String,
    },
    /// The connection left the open state while the request was pending.
    #[error("connection lost")]
    ConnectionLost,
    /// Transport-level I/O failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl RsockError {
    /// Build a [`SetupFailed`](Self::SetupFailed) error from any displayable
    /// cause.
    #[must_use]
    pub fn setup_failed(reason: impl std::fmt::Display) -> Self {
        Self::SetupFailed {
            reason: reason.to_string(),
        }
    }
}

/// Reasons a byte buffer failed to decode as a frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MalformedFrame {
    /// The buffer is shorter than the fixed frame header.
    #[error("frame shorter than header: have {have} bytes, need {need}")]
    ShortHeader {
        /// Bytes available in the buffer.
        have: usize,
        /// Bytes required before parsing can proceed.
        need: usize,
    },
    /// The declared metadata length exceeds the remaining buffer.
    #[error("declared metadata length {declared} exceeds remaining {remaining} bytes")]
    MetadataOverrun {
        /// Metadata length declared in the frame.
        declared: usize,
        /// Bytes actually remaining after the header.
        remaining: usize,
    },
    /// The frame type tag is not part of the supported protocol subset.
    #[error("unrecognized frame type tag {0:#04x}")]
    UnknownType(u8),
    /// A typed frame body (setup or error) ended before its fixed fields.
    #[error("truncated {0} body")]
    TruncatedBody(&'static str),
    /// An error frame message was not valid UTF-8.
    #[error("error frame message is not valid UTF-8")]
    InvalidErrorMessage,
    /// A setup MIME type tag was not valid UTF-8.
    #[error("setup MIME type tag is not valid UTF-8")]
    InvalidMimeType,
}

/// Canonical result alias used by `rsock` public APIs.
pub type Result<T> = std::result::Result<T, RsockError>;
