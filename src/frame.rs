//! Frame model and pure wire encoding.
//!
//! A [`Frame`] is one protocol message: a six-byte fixed header (stream id,
//! type tag, flags) followed by an optional length-prefixed metadata region
//! and an opaque data region. [`Frame::encode`] and [`Frame::decode`] are
//! pure transforms over in-memory buffers; stream-aware framing lives in
//! [`crate::codec::FrameCodec`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{config::SetupConfig, error::MalformedFrame};

/// Flag bits carried in the frame header.
pub mod flags {
    /// The frame carries a metadata region.
    pub const METADATA: u8 = 0x01;
    /// More fragments of this logical payload follow.
    pub const FOLLOWS: u8 = 0x02;
    /// Terminal frame for the stream.
    pub const COMPLETE: u8 = 0x04;
    /// The frame carries a payload value.
    pub const NEXT: u8 = 0x08;
    /// A keepalive that requests an acknowledgment.
    pub const RESPOND: u8 = 0x10;
}

/// Length of the fixed frame header: stream id (4), type tag (1), flags (1).
pub const HEADER_LEN: usize = 6;

/// Stream id reserved for connection-level frames.
pub const CONNECTION_STREAM_ID: u32 = 0;

/// Frame type tags for the supported protocol subset.
///
/// The numeric values match the RSocket frame type registry so captures of
/// either side line up with standard tooling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Connection setup handshake, sent once on stream 0.
    Setup = 0x01,
    /// Connection heartbeat, sent on stream 0.
    Keepalive = 0x03,
    /// Initiate a single-response interaction.
    RequestResponse = 0x04,
    /// Initiate a streaming interaction.
    RequestStream = 0x06,
    /// Requester abandons interest in a stream.
    Cancel = 0x09,
    /// Response value and/or stream terminator.
    Payload = 0x0A,
    /// Connection-level (stream 0) or stream-level error.
    Error = 0x0B,
}

impl FrameType {
    /// Map a wire tag to a frame type, if recognized.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Setup),
            0x03 => Some(Self::Keepalive),
            0x04 => Some(Self::RequestResponse),
            0x06 => Some(Self::RequestStream),
            0x09 => Some(Self::Cancel),
            0x0A => Some(Self::Payload),
            0x0B => Some(Self::Error),
            _ => None,
        }
    }

    /// The wire tag for this frame type.
    #[must_use]
    pub const fn tag(self) -> u8 { self as u8 }
}

/// An application payload: opaque data plus an optional metadata region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    /// Opaque payload bytes owned by the application layer.
    pub data: Bytes,
    /// Optional metadata region (for requests, the route tag).
    pub metadata: Option<Bytes>,
}

impl Payload {
    /// Create a payload with no metadata.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata: None,
        }
    }

    /// Attach a metadata region.
    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Append a continuation fragment to this payload.
    ///
    /// Data regions are concatenated; the first non-empty metadata region
    /// wins.
    pub(crate) fn extend(&mut self, fragment: Payload) {
        if !fragment.data.is_empty() {
            if self.data.is_empty() {
                self.data = fragment.data;
            } else {
                let mut merged = BytesMut::with_capacity(self.data.len() + fragment.data.len());
                merged.extend_from_slice(&self.data);
                merged.extend_from_slice(&fragment.data);
                self.data = merged.freeze();
            }
        }
        if self.metadata.is_none() {
            self.metadata = fragment.metadata;
        }
    }
}

/// A decoded protocol frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Stream the frame belongs to; 0 is the connection itself.
    pub stream_id: u32,
    /// The frame type tag.
    pub frame_type: FrameType,
    /// Flag bits; the `METADATA` bit is derived from `metadata` on encode.
    pub flags: u8,
    /// Metadata region, present when the `METADATA` flag is set.
    pub metadata: Option<Bytes>,
    /// Data region: everything after the metadata region.
    pub data: Bytes,
}

impl Frame {
    /// Create a frame with empty regions.
    #[must_use]
    pub fn new(stream_id: u32, frame_type: FrameType, frame_flags: u8) -> Self {
        Self {
            stream_id,
            frame_type,
            flags: frame_flags,
            metadata: None,
            data: Bytes::new(),
        }
    }

    /// Build the setup handshake frame for `config`.
    #[must_use]
    pub fn setup(config: &SetupConfig) -> Self {
        let mut body = BytesMut::new();
        body.put_u32(config.keep_alive_interval_ms());
        body.put_u32(config.lifetime_ms());
        put_mime(&mut body, config.data_mime_type_value());
        put_mime(&mut body, config.metadata_mime_type_value());
        Self {
            data: body.freeze(),
            ..Self::new(CONNECTION_STREAM_ID, FrameType::Setup, 0)
        }
    }

    /// Build the initial frame for a request-response interaction.
    #[must_use]
    pub fn request_response(stream_id: u32, payload: Payload) -> Self {
        Self::with_payload(stream_id, FrameType::RequestResponse, 0, payload)
    }

    /// Build the initial frame for a request-stream interaction.
    #[must_use]
    pub fn request_stream(stream_id: u32, payload: Payload) -> Self {
        Self::with_payload(stream_id, FrameType::RequestStream, 0, payload)
    }

    /// Build a response payload frame carrying `payload` with extra flag
    /// bits (`NEXT`, `COMPLETE`).
    #[must_use]
    pub fn payload(stream_id: u32, payload: Payload, frame_flags: u8) -> Self {
        Self::with_payload(stream_id, FrameType::Payload, frame_flags, payload)
    }

    /// Attach payload regions, keeping the `METADATA` flag bit consistent
    /// with the presence of the metadata region.
    fn with_payload(
        stream_id: u32,
        frame_type: FrameType,
        frame_flags: u8,
        payload: Payload,
    ) -> Self {
        let mut frame = Self::new(stream_id, frame_type, frame_flags);
        frame.data = payload.data;
        if let Some(metadata) = payload.metadata {
            frame.flags |= flags::METADATA;
            frame.metadata = Some(metadata);
        }
        frame
    }

    /// Build a keepalive frame; `respond` requests an acknowledgment.
    #[must_use]
    pub fn keepalive(respond: bool) -> Self {
        let frame_flags = if respond { flags::RESPOND } else { 0 };
        Self::new(CONNECTION_STREAM_ID, FrameType::Keepalive, frame_flags)
    }

    /// Build a cancellation frame for `stream_id`.
    #[must_use]
    pub fn cancel(stream_id: u32) -> Self { Self::new(stream_id, FrameType::Cancel, 0) }

    /// Build an error frame carrying `code` and a UTF-8 `message`.
    #[must_use]
    pub fn error(stream_id: u32, code: u32, message: &str) -> Self {
        let mut body = BytesMut::with_capacity(4 + message.len());
        body.put_u32(code);
        body.put_slice(message.as_bytes());
        Self {
            data: body.freeze(),
            ..Self::new(stream_id, FrameType::Error, 0)
        }
    }

    /// Whether the given flag bit is set.
    #[must_use]
    pub const fn has_flag(&self, bit: u8) -> bool { self.flags & bit != 0 }

    /// Whether this frame terminates its stream.
    #[must_use]
    pub const fn is_complete(&self) -> bool { self.has_flag(flags::COMPLETE) }

    /// Whether this frame carries a payload value.
    #[must_use]
    pub const fn is_next(&self) -> bool { self.has_flag(flags::NEXT) }

    /// Take the payload regions out of this frame.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        Payload {
            data: self.data,
            metadata: self.metadata,
        }
    }

    /// Parse the error code and message from an `Error` frame body.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedFrame::TruncatedBody`] when the body is shorter
    /// than the error code, and [`MalformedFrame::InvalidErrorMessage`] when
    /// the message is not UTF-8.
    pub fn error_body(&self) -> Result<(u32, String), MalformedFrame> {
        let mut cursor = self.data.as_ref();
        if cursor.remaining() < 4 {
            return Err(MalformedFrame::TruncatedBody("error"));
        }
        let code = cursor.get_u32();
        let message = std::str::from_utf8(cursor)
            .map_err(|_| MalformedFrame::InvalidErrorMessage)?
            .to_owned();
        Ok((code, message))
    }

    /// Parse the setup handshake fields from a `Setup` frame body.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedFrame::TruncatedBody`] when any fixed field or
    /// MIME tag is cut short.
    pub fn setup_body(&self) -> Result<SetupFields, MalformedFrame> {
        let mut cursor = self.data.as_ref();
        if cursor.remaining() < 8 {
            return Err(MalformedFrame::TruncatedBody("setup"));
        }
        let keep_alive_ms = cursor.get_u32();
        let lifetime_ms = cursor.get_u32();
        let data_mime_type = take_mime(&mut cursor)?;
        let metadata_mime_type = take_mime(&mut cursor)?;
        Ok(SetupFields {
            keep_alive_ms,
            lifetime_ms,
            data_mime_type,
            metadata_mime_type,
        })
    }

    /// Encode this frame into a byte buffer.
    ///
    /// Encoding never fails for well-formed in-memory frames; the `METADATA`
    /// flag bit is synchronized with the presence of the metadata region.
    ///
    /// # Panics
    ///
    /// Panics if the metadata region exceeds `u32::MAX` bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let metadata_len = self.metadata.as_ref().map_or(0, Bytes::len);
        let mut buf =
            BytesMut::with_capacity(HEADER_LEN + 4 + metadata_len + self.data.len());
        buf.put_u32(self.stream_id);
        buf.put_u8(self.frame_type.tag());
        let mut frame_flags = self.flags & !flags::METADATA;
        if self.metadata.is_some() {
            frame_flags |= flags::METADATA;
        }
        buf.put_u8(frame_flags);
        if let Some(metadata) = &self.metadata {
            let declared =
                u32::try_from(metadata.len()).expect("metadata region exceeds u32 range");
            buf.put_u32(declared);
            buf.put_slice(metadata);
        }
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Decode one frame from `buf`, which must hold exactly one frame.
    ///
    /// # Errors
    ///
    /// Returns a [`MalformedFrame`] when the buffer is shorter than the
    /// fixed header, the declared metadata length overruns the buffer, or
    /// the type tag is unrecognized.
    pub fn decode(buf: &[u8]) -> Result<Self, MalformedFrame> {
        if buf.len() < HEADER_LEN {
            return Err(MalformedFrame::ShortHeader {
                have: buf.len(),
                need: HEADER_LEN,
            });
        }
        let mut cursor = buf;
        let stream_id = cursor.get_u32();
        let tag = cursor.get_u8();
        let frame_type = FrameType::from_tag(tag).ok_or(MalformedFrame::UnknownType(tag))?;
        let frame_flags = cursor.get_u8();
        let metadata = if frame_flags & flags::METADATA == 0 {
            None
        } else {
            if cursor.remaining() < 4 {
                return Err(MalformedFrame::ShortHeader {
                    have: buf.len(),
                    need: HEADER_LEN + 4,
                });
            }
            let declared = usize::try_from(cursor.get_u32()).unwrap_or(usize::MAX);
            if declared > cursor.remaining() {
                return Err(MalformedFrame::MetadataOverrun {
                    declared,
                    remaining: cursor.remaining(),
                });
            }
            Some(cursor.copy_to_bytes(declared))
        };
        let data = cursor.copy_to_bytes(cursor.remaining());
        Ok(Self {
            stream_id,
            frame_type,
            flags: frame_flags,
            metadata,
            data,
        })
    }
}

/// Setup handshake fields decoded from the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupFields {
    /// Keepalive heartbeat period in milliseconds.
    pub keep_alive_ms: u32,
    /// Lifetime before the peer is declared unreachable, in milliseconds.
    pub lifetime_ms: u32,
    /// Content-type tag for the data region.
    pub data_mime_type: String,
    /// Content-type tag for the metadata region.
    pub metadata_mime_type: String,
}

fn put_mime(buf: &mut BytesMut, mime: &str) {
    // MIME tags use a u8 length prefix; oversized tags are truncated at a
    // char boundary rather than corrupting the frame layout.
    let mut tag = mime;
    while tag.len() > usize::from(u8::MAX) {
        let mut cut = usize::from(u8::MAX);
        while !tag.is_char_boundary(cut) {
            cut -= 1;
        }
        tag = &tag[..cut];
    }
    buf.put_u8(u8::try_from(tag.len()).unwrap_or(u8::MAX));
    buf.put_slice(tag.as_bytes());
}

fn take_mime(cursor: &mut &[u8]) -> Result<String, MalformedFrame> {
    if cursor.remaining() < 1 {
        return Err(MalformedFrame::TruncatedBody("setup"));
    }
    let len = usize::from(cursor.get_u8());
    if cursor.remaining() < len {
        return Err(MalformedFrame::TruncatedBody("setup"));
    }
    let mime = std::str::from_utf8(&cursor[..len])
        .map_err(|_| MalformedFrame::InvalidMimeType)?
        .to_owned();
    cursor.advance(len);
    Ok(mime)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Frame::keepalive(true))]
    #[case(Frame::cancel(7))]
    #[case(Frame::error(5, 0x0201, "boom"))]
    #[case(Frame::request_response(1, Payload::new("data").with_metadata("route")))]
    #[case(Frame::request_stream(3, Payload::new("")))]
    #[case(Frame::payload(1, Payload::new("value"), flags::NEXT | flags::COMPLETE))]
    fn encode_decode_round_trip(#[case] frame: Frame) {
        let decoded = Frame::decode(&frame.encode()).expect("round trip");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn setup_frame_round_trips_all_fields() {
        let config = crate::SetupConfig::default();
        let frame = Frame::setup(&config);
        let decoded = Frame::decode(&frame.encode()).expect("decode setup");
        let fields = decoded.setup_body().expect("setup body");
        assert_eq!(fields.keep_alive_ms, 60_000);
        assert_eq!(fields.lifetime_ms, 180_000);
        assert_eq!(fields.data_mime_type, "application/json");
        assert_eq!(fields.metadata_mime_type, "application/json");
    }

    #[test]
    fn short_header_is_rejected() {
        let err = Frame::decode(&[0, 0, 0]).expect_err("short buffer");
        assert_eq!(err, MalformedFrame::ShortHeader { have: 3, need: HEADER_LEN });
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let mut bytes = Frame::keepalive(false).encode().to_vec();
        bytes[4] = 0x7F;
        let err = Frame::decode(&bytes).expect_err("unknown tag");
        assert_eq!(err, MalformedFrame::UnknownType(0x7F));
    }

    #[test]
    fn metadata_overrun_is_rejected() {
        let frame = Frame::request_response(1, Payload::new("d").with_metadata("meta"));
        let bytes = frame.encode().to_vec();
        // Truncate inside the metadata region.
        let err = Frame::decode(&bytes[..bytes.len() - 3]).expect_err("overrun");
        assert!(matches!(err, MalformedFrame::MetadataOverrun { declared: 4, .. }));
    }

    #[test]
    fn non_utf8_mime_tag_is_rejected() {
        let mut body = BytesMut::new();
        body.put_u32(60_000);
        body.put_u32(180_000);
        body.put_u8(2);
        body.put_slice(&[0xFF, 0xFE]);
        body.put_u8(0);
        let mut frame = Frame::new(CONNECTION_STREAM_ID, FrameType::Setup, 0);
        frame.data = body.freeze();
        assert_eq!(
            frame.setup_body().expect_err("invalid mime tag"),
            MalformedFrame::InvalidMimeType
        );
    }

    #[test]
    fn error_body_requires_the_code_field() {
        let mut frame = Frame::error(1, 9, "x");
        frame.data = Bytes::from_static(&[0, 0]);
        assert_eq!(
            frame.error_body().expect_err("truncated"),
            MalformedFrame::TruncatedBody("error")
        );
    }

    #[test]
    fn error_body_round_trips() {
        let frame = Frame::error(9, 0x0202, "rejected by responder");
        let (code, message) = frame.error_body().expect("error body");
        assert_eq!(code, 0x0202);
        assert_eq!(message, "rejected by responder");
    }

    #[test]
    fn metadata_flag_tracks_presence_on_encode() {
        let mut frame = Frame::keepalive(false);
        frame.flags |= flags::METADATA;
        // No metadata region: the stray flag bit must be cleared.
        let decoded = Frame::decode(&frame.encode()).expect("decode");
        assert!(!decoded.has_flag(flags::METADATA));
        assert_eq!(decoded.metadata, None);
    }

    #[test]
    fn payload_extend_concatenates_fragments() {
        let mut first = Payload::new("hel").with_metadata("m");
        first.extend(Payload::new("lo"));
        assert_eq!(first.data.as_ref(), b"hello");
        assert_eq!(first.metadata.as_deref(), Some(b"m".as_ref()));
    }
}
