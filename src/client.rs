//! Client facade: connection establishment and per-interaction requests.
//!
//! [`RsockClient`] ties the transport, connection actor, stream registry,
//! and request engine together. Build one with [`RsockClient::builder`],
//! connect through a [`TransportFactory`](crate::transport::TransportFactory)
//! or an already-built transport, then issue concurrent
//! [`request_response`](RsockClient::request_response) and
//! [`request_stream`](RsockClient::request_stream) calls.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use log::info;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    config::SetupConfig,
    connection::{Command, ConnectionActor, ConnectionHandle, ConnectionState, Shared},
    error::{Result, RsockError},
    frame::{Frame, Payload},
    metrics::{self, Direction, MetricEvent},
    request::{self, PayloadStream},
    transport::{Transport, TransportFactory},
};

/// Outbound command queue depth between the facade and the actor.
const COMMAND_QUEUE_CAPACITY: usize = 32;

/// A connected client multiplexing requests over one transport.
///
/// The client is the owner of its connection: dropping it shuts the
/// connection down and fails outstanding requests with
/// [`RsockError::ConnectionLost`].
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
/// let account = client
///     .request_response("AccountService.findById", r#"{"id":1}"#)
///     .await?;
/// println!("account: {:?}", account.data);
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct RsockClient {
    handle: ConnectionHandle,
}

impl RsockClient {
    /// Start building a client with default setup parameters.
    #[must_use]
    pub fn builder() -> RsockClientBuilder { RsockClientBuilder::new() }

    /// Current lifecycle state of the connection.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.handle.state() }

    /// Whether the connection still accepts requests.
    #[must_use]
    pub fn is_open(&self) -> bool { self.handle.state() == ConnectionState::Open }

    /// Number of requests currently awaiting terminal frames.
    #[must_use]
    pub fn pending_requests(&self) -> usize { self.handle.registry().pending() }

    /// Issue a request-response interaction addressed by `route`.
    ///
    /// The route travels in the request frame's metadata region; `data` is
    /// the opaque application payload. Resolves with the single response
    /// payload, exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`RsockError::ConnectionLost`] when the connection leaves the
    /// open state while pending, [`RsockError::Peer`] when the peer reports
    /// an error for this stream, and [`RsockError::StreamSpaceExhausted`]
    /// when the id space is spent.
    pub async fn request_response(
        &self,
        route: &str,
        data: impl Into<Bytes>,
    ) -> Result<Payload> {
        let payload = Payload::new(data).with_metadata(route.as_bytes().to_vec());
        request::request_response(&self.handle, payload).await
    }

    /// Issue a request-stream interaction addressed by `route`.
    ///
    /// Returns a finite, lazy sequence of payloads; see [`PayloadStream`]
    /// for termination and cancellation semantics.
    ///
    /// # Errors
    ///
    /// Returns [`RsockError::ConnectionLost`] when the connection is not
    /// open and [`RsockError::StreamSpaceExhausted`] when the id space is
    /// spent.
    pub async fn request_stream(
        &self,
        route: &str,
        data: impl Into<Bytes>,
    ) -> Result<PayloadStream> {
        let payload = Payload::new(data).with_metadata(route.as_bytes().to_vec());
        request::request_stream(&self.handle, payload).await
    }

    /// Close the connection in an orderly fashion and wait for teardown.
    ///
    /// Pending requests fail with [`RsockError::ConnectionLost`].
    pub async fn close(self) {
        self.handle.request_close().await;
        self.handle.wait_closed().await;
    }

    /// Resolve once the connection has fully closed, for any reason.
    pub async fn closed(&self) { self.handle.wait_closed().await; }
}

impl Drop for RsockClient {
    fn drop(&mut self) { self.handle.abort(); }
}

impl std::fmt::Debug for RsockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsockClient")
            .field("state", &self.state())
            .field("pending_requests", &self.pending_requests())
            .finish()
    }
}

/// Builder for [`RsockClient`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use rsock::RsockClient;
///
/// let builder = RsockClient::builder()
///     .keep_alive_interval(Duration::from_secs(30))
///     .lifetime(Duration::from_secs(90))
///     .data_mime_type("application/cbor");
/// let _ = builder;
/// ```
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct RsockClientBuilder {
    setup: SetupConfig,
}

impl RsockClientBuilder {
    /// Create a builder with default setup parameters.
    pub fn new() -> Self {
        Self {
            setup: SetupConfig::default(),
        }
    }

    /// Replace the whole setup configuration.
    pub fn setup(mut self, setup: SetupConfig) -> Self {
        self.setup = setup;
        self
    }

    /// Set the keepalive heartbeat period.
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.setup = self.setup.keep_alive_interval(interval);
        self
    }

    /// Set the timeout before the peer is declared unreachable.
    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.setup = self.setup.lifetime(lifetime);
        self
    }

    /// Set the content-type tag for the data region.
    pub fn data_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.setup = self.setup.data_mime_type(mime_type);
        self
    }

    /// Set the content-type tag for the metadata region.
    pub fn metadata_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.setup = self.setup.metadata_mime_type(mime_type);
        self
    }

    /// Open a transport through `factory` and establish a connection.
    ///
    /// # Errors
    ///
    /// Returns [`RsockError::SetupFailed`] when the transport cannot be
    /// established or the setup handshake cannot be sent; no connection is
    /// exposed in that case.
    pub async fn connect<F>(self, factory: &F, uri: &str) -> Result<RsockClient>
    where
        F: TransportFactory,
    {
        let transport = factory
            .connect(uri)
            .await
            .map_err(RsockError::setup_failed)?;
        self.connect_transport(transport).await
    }

    /// Establish a connection over an already-built transport.
    ///
    /// Sends the setup handshake, transitions the connection to open, and
    /// spawns the actor that owns the transport from here on.
    ///
    /// # Errors
    ///
    /// Returns [`RsockError::SetupFailed`] when the setup frame cannot be
    /// written.
    pub async fn connect_transport<T>(self, mut transport: T) -> Result<RsockClient>
    where
        T: Transport + 'static,
    {
        transport
            .send(Frame::setup(&self.setup).encode())
            .await
            .map_err(RsockError::setup_failed)?;
        metrics::record(MetricEvent::Frame(Direction::Outbound));

        let shared = Arc::new(Shared::new());
        shared.transition(ConnectionState::Open);
        let (commands_tx, commands_rx) = mpsc::channel::<Command>(COMMAND_QUEUE_CAPACITY);
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();
        let actor = ConnectionActor::new(
            transport,
            commands_rx,
            Arc::clone(&shared),
            shutdown.clone(),
            closed.clone(),
            &self.setup,
        );
        tokio::spawn(actor.run());
        metrics::record(MetricEvent::ConnectionOpened);
        info!(
            "connection opened: keepalive={}ms, lifetime={}ms, data_mime={}",
            self.setup.keep_alive_interval_ms(),
            self.setup.lifetime_ms(),
            self.setup.data_mime_type_value(),
        );

        Ok(RsockClient {
            handle: ConnectionHandle {
                commands: commands_tx,
                shared,
                shutdown,
                closed,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FramedTransport;

    #[tokio::test]
    async fn id_space_exhaustion_closes_the_connection() {
        let (near, _far) = tokio::io::duplex(4096);
        let client = RsockClient::builder()
            .connect_transport(FramedTransport::new(near, 4096))
            .await
            .expect("connect");
        client
            .handle
            .registry()
            .seed_next_raw(u64::from(u32::MAX) + 1);

        let exhausted = client.request_response("Svc.op", "").await;
        assert!(matches!(exhausted, Err(RsockError::StreamSpaceExhausted)));

        client.closed().await;
        assert_eq!(client.state(), ConnectionState::Closed);

        let refused = client.request_response("Svc.op", "").await;
        assert!(matches!(refused, Err(RsockError::ConnectionLost)));
    }
}
