//! Length-delimited codec adapter for [`Frame`] values.
//!
//! [`FrameCodec`] layers the pure frame parse over a four-byte big-endian
//! length prefix so a raw byte stream can be driven through
//! `tokio_util::codec::Framed`. The connection runtime itself consumes
//! whole frame buffers from its transport; this adapter exists for
//! byte-oriented endpoints (and the test harness peer) that speak the same
//! outer framing.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::{error::MalformedFrame, frame::Frame};

/// Number of bytes in the outer length prefix.
const LENGTH_PREFIX_LEN: usize = 4;

/// Default cap on a single frame, matching the protocol's 16 MiB limit.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Errors produced by [`FrameCodec`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// The declared frame length exceeds the configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    Oversized {
        /// Length declared by the prefix.
        size: usize,
        /// Configured maximum frame length.
        max: usize,
    },
    /// The frame body failed to parse.
    #[error(transparent)]
    Malformed(#[from] MalformedFrame),
    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Frame codec combining the outer length prefix with the frame parse.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_frame_length: usize,
}

impl FrameCodec {
    /// Create a codec with the provided frame length cap.
    #[must_use]
    pub const fn new(max_frame_length: usize) -> Self { Self { max_frame_length } }

    /// The configured maximum frame length.
    #[must_use]
    pub const fn max_frame_length(&self) -> usize { self.max_frame_length }
}

impl Default for FrameCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_FRAME_LENGTH) }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }
        let declared = usize::try_from(u32::from_be_bytes([src[0], src[1], src[2], src[3]]))
            .unwrap_or(usize::MAX);
        if declared > self.max_frame_length {
            return Err(CodecError::Oversized {
                size: declared,
                max: self.max_frame_length,
            });
        }
        if src.len() < LENGTH_PREFIX_LEN + declared {
            src.reserve(LENGTH_PREFIX_LEN + declared - src.len());
            return Ok(None);
        }
        src.advance(LENGTH_PREFIX_LEN);
        let body = src.split_to(declared);
        Ok(Some(Frame::decode(&body)?))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.encode();
        if body.len() > self.max_frame_length {
            return Err(CodecError::Oversized {
                size: body.len(),
                max: self.max_frame_length,
            });
        }
        let declared = u32::try_from(body.len()).map_err(|_| CodecError::Oversized {
            size: body.len(),
            max: self.max_frame_length,
        })?;
        dst.reserve(LENGTH_PREFIX_LEN + body.len());
        dst.put_u32(declared);
        dst.put_slice(&body);
        Ok(())
    }
}
