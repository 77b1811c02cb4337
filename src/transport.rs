//! Transport abstraction and built-in adapters.
//!
//! The runtime consumes an abstract bidirectional message transport: each
//! `send` carries one encoded frame and each received chunk holds exactly
//! one frame's bytes. [`FramedTransport`] adapts any byte stream by adding
//! a four-byte big-endian length prefix; [`TcpFactory`] builds one from a
//! `tcp://host:port` uri. Concrete transports are selected at composition
//! time through [`TransportFactory`], never probed at call time.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::codec::DEFAULT_MAX_FRAME_LENGTH;

/// A bidirectional, message-oriented byte transport.
///
/// Implementations deliver whole frame buffers in both directions; the
/// runtime owns encode and decode. `recv` returning `None` signals a clean
/// transport close.
#[async_trait]
pub trait Transport: Send {
    /// Send one encoded frame to the peer.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the underlying transport fails.
    async fn send(&mut self, frame: Bytes) -> io::Result<()>;

    /// Receive the next frame buffer, or `None` on clean close.
    async fn recv(&mut self) -> Option<io::Result<Bytes>>;

    /// Flush pending writes and close the transport.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the close handshake fails.
    async fn close(&mut self) -> io::Result<()>;
}

/// Builds a [`Transport`] from a uri at connect time.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Transport type produced by this factory.
    type Transport: Transport + 'static;

    /// Open a transport to the endpoint named by `uri`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the uri is unsupported or the endpoint is
    /// unreachable.
    async fn connect(&self, uri: &str) -> io::Result<Self::Transport>;
}

/// Length-prefixed framing over any byte stream.
pub struct FramedTransport<T> {
    framed: Framed<T, LengthDelimitedCodec>,
}

impl<T> FramedTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap `io` with a four-byte big-endian length prefix per frame.
    #[must_use]
    pub fn new(io: T, max_frame_length: usize) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .max_frame_length(max_frame_length)
            .new_codec();
        Self {
            framed: Framed::new(io, codec),
        }
    }

    /// Access the underlying byte stream.
    #[must_use]
    pub fn get_ref(&self) -> &T { self.framed.get_ref() }
}

#[async_trait]
impl<T> Transport for FramedTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: Bytes) -> io::Result<()> { self.framed.send(frame).await }

    async fn recv(&mut self) -> Option<io::Result<Bytes>> {
        self.framed
            .next()
            .await
            .map(|result| result.map(bytes::BytesMut::freeze))
    }

    async fn close(&mut self) -> io::Result<()> { self.framed.close().await }
}

/// Factory for TCP transports addressed as `tcp://host:port`.
///
/// # Examples
///
/// ```no_run
/// use rsock::{RsockClient, TcpFactory};
///
/// # #[tokio::main]
/// # async fn main() -> rsock::Result<()> {
/// let client = RsockClient::builder()
///     .connect(&TcpFactory::default(), "tcp://127.0.0.1:7878")
///     .await?;
/// # drop(client);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Copy, Debug)]
pub struct TcpFactory {
    max_frame_length: usize,
    nodelay: bool,
}

impl Default for TcpFactory {
    fn default() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            nodelay: true,
        }
    }
}

impl TcpFactory {
    /// Cap the size of a single frame in either direction.
    #[must_use]
    pub const fn max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    /// Configure `TCP_NODELAY` on new connections.
    #[must_use]
    pub const fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }
}

#[async_trait]
impl TransportFactory for TcpFactory {
    type Transport = FramedTransport<TcpStream>;

    async fn connect(&self, uri: &str) -> io::Result<Self::Transport> {
        let addr = uri.strip_prefix("tcp://").ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported transport uri: {uri}"),
            )
        })?;
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(self.nodelay)?;
        Ok(FramedTransport::new(stream, self.max_frame_length))
    }
}
