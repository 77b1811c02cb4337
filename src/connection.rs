//! Connection controller: lifecycle state machine and frame demultiplexing.
//!
//! One actor task owns the transport for its connection. It drives a biased
//! `tokio::select!` loop over the shutdown token, the outbound command
//! channel, inbound transport frames, and the keepalive timer, so registry
//! state is only ever mutated from this sequential receive path and from
//! atomic allocations. Keepalive frames are sent at the negotiated interval;
//! a lifetime watchdog fails the connection when the peer stays silent.

use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::SetupConfig,
    error::{MalformedFrame, RsockError},
    frame::{CONNECTION_STREAM_ID, Frame, FrameType, flags},
    metrics::{self, Direction, MetricEvent},
    registry::{Delivery, StreamId, StreamRegistry},
    transport::Transport,
};

/// Lifecycle state of a connection.
///
/// A connection transitions to [`Closed`](Self::Closed) exactly once; no
/// frames are processed after that transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport established, setup handshake in flight.
    Connecting,
    /// Setup sent; requests are accepted and frames flow.
    Open,
    /// Orderly shutdown in progress.
    Closing,
    /// Terminal state; the transport is gone.
    Closed,
    /// A fatal protocol or transport error occurred; closing follows.
    Errored,
}

/// State shared between the client facade and the connection actor.
pub(crate) struct Shared {
    registry: StreamRegistry,
    state: Mutex<ConnectionState>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            registry: StreamRegistry::new(),
            state: Mutex::new(ConnectionState::Connecting),
        }
    }

    pub(crate) fn registry(&self) -> &StreamRegistry { &self.registry }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a state transition. `Closed` is terminal: later transitions are
    /// ignored.
    pub(crate) fn transition(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != ConnectionState::Closed {
            *state = next;
        }
    }
}

/// Instructions accepted by the connection actor.
pub(crate) enum Command {
    /// Encode and send a frame to the peer.
    Send(Frame),
    /// Close the connection in an orderly fashion.
    Close,
}

/// Cheaply clonable handle used by the facade and request engine.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    pub(crate) commands: mpsc::Sender<Command>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) closed: CancellationToken,
}

impl ConnectionHandle {
    pub(crate) fn state(&self) -> ConnectionState { self.shared.state() }

    pub(crate) fn registry(&self) -> &StreamRegistry { self.shared.registry() }

    /// Queue a frame for sending; fails once the connection is gone.
    pub(crate) async fn send_frame(&self, frame: Frame) -> Result<(), RsockError> {
        self.commands
            .send(Command::Send(frame))
            .await
            .map_err(|_| RsockError::ConnectionLost)
    }

    /// Cooperatively cancel a stream: release it locally and signal the
    /// peer. Local resources are freed immediately; the peer's quiescence is
    /// not awaited.
    pub(crate) fn cancel_stream(&self, id: StreamId) {
        self.shared.registry().release(id);
        if self.shared.state() == ConnectionState::Open
            && self
                .commands
                .try_send(Command::Send(Frame::cancel(id.as_u32())))
                .is_err()
        {
            debug!("dropping cancel for {id}: command queue unavailable");
        }
    }

    /// Request an orderly close, falling back to a hard shutdown when the
    /// actor is already gone.
    pub(crate) async fn request_close(&self) {
        if self.commands.send(Command::Close).await.is_err() {
            self.shutdown.cancel();
        }
    }

    /// Hard shutdown: cancel the actor without draining.
    pub(crate) fn abort(&self) { self.shutdown.cancel(); }

    /// Resolve once the actor has fully closed the connection.
    pub(crate) async fn wait_closed(&self) { self.closed.cancelled().await; }
}

/// Why the actor left its event loop.
enum CloseReason {
    LocalClose,
    Shutdown,
    TransportClosed,
    KeepaliveTimeout,
    Decode(MalformedFrame),
    PeerError { code: u32, message: String },
    Io(io::Error),
}

impl CloseReason {
    const fn is_error(&self) -> bool {
        matches!(
            self,
            Self::KeepaliveTimeout | Self::Decode(_) | Self::PeerError { .. } | Self::Io(_)
        )
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalClose => f.write_str("local close"),
            Self::Shutdown => f.write_str("shutdown"),
            Self::TransportClosed => f.write_str("transport closed by peer"),
            Self::KeepaliveTimeout => f.write_str("keepalive timeout"),
            Self::Decode(error) => write!(f, "decode error: {error}"),
            Self::PeerError { code, message } => {
                write!(f, "connection error {code:#06x}: {message}")
            }
            Self::Io(error) => write!(f, "transport error: {error}"),
        }
    }
}

/// One ready event source, selected with biased priority ordering.
enum Event {
    Shutdown,
    Command(Option<Command>),
    Inbound(Option<io::Result<Bytes>>),
    Heartbeat,
}

/// Actor driving one connection.
pub(crate) struct ConnectionActor<T> {
    transport: T,
    commands: mpsc::Receiver<Command>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    closed: CancellationToken,
    keep_alive_interval: Duration,
    lifetime: Duration,
}

impl<T: Transport> ConnectionActor<T> {
    pub(crate) fn new(
        transport: T,
        commands: mpsc::Receiver<Command>,
        shared: Arc<Shared>,
        shutdown: CancellationToken,
        closed: CancellationToken,
        setup: &SetupConfig,
    ) -> Self {
        Self {
            transport,
            commands,
            shared,
            shutdown,
            closed,
            keep_alive_interval: setup.keep_alive_interval_value(),
            lifetime: setup.lifetime_value(),
        }
    }

    /// Drive the connection until a terminal condition, then close it.
    pub(crate) async fn run(mut self) {
        let mut heartbeat = interval_at(
            Instant::now() + self.keep_alive_interval,
            self.keep_alive_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_liveness = Instant::now();

        let reason = loop {
            let event = self.next_event(&mut heartbeat).await;
            match event {
                Event::Shutdown => break CloseReason::Shutdown,
                Event::Command(Some(Command::Send(frame))) => {
                    if let Err(error) = self.send(frame).await {
                        break CloseReason::Io(error);
                    }
                }
                Event::Command(Some(Command::Close) | None) => break CloseReason::LocalClose,
                Event::Inbound(Some(Ok(bytes))) => {
                    if let Err(reason) = self.process_inbound(&bytes, &mut last_liveness).await {
                        break reason;
                    }
                }
                Event::Inbound(Some(Err(error))) => break CloseReason::Io(error),
                Event::Inbound(None) => break CloseReason::TransportClosed,
                Event::Heartbeat => {
                    if last_liveness.elapsed() >= self.lifetime {
                        break CloseReason::KeepaliveTimeout;
                    }
                    if let Err(error) = self.send(Frame::keepalive(true)).await {
                        break CloseReason::Io(error);
                    }
                }
            }
        };
        self.finish(reason).await;
    }

    /// Await the next ready event. Shutdown is observed first, then queued
    /// outbound commands, then inbound frames, and the heartbeat last.
    async fn next_event(&mut self, heartbeat: &mut tokio::time::Interval) -> Event {
        tokio::select! {
            biased;

            () = self.shutdown.cancelled() => Event::Shutdown,
            command = self.commands.recv() => Event::Command(command),
            inbound = self.transport.recv() => Event::Inbound(inbound),
            _ = heartbeat.tick() => Event::Heartbeat,
        }
    }

    async fn send(&mut self, frame: Frame) -> io::Result<()> {
        self.transport.send(frame.encode()).await?;
        metrics::record(MetricEvent::Frame(Direction::Outbound));
        Ok(())
    }

    /// Decode and route one inbound frame. Decode failures are fatal for
    /// the connection: a corrupted frame stream cannot be resynchronized.
    async fn process_inbound(
        &mut self,
        bytes: &[u8],
        last_liveness: &mut Instant,
    ) -> Result<(), CloseReason> {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(error) => return Err(CloseReason::Decode(error)),
        };
        metrics::record(MetricEvent::Frame(Direction::Inbound));
        match frame.frame_type {
            FrameType::Keepalive => {
                *last_liveness = Instant::now();
                if frame.has_flag(flags::RESPOND) {
                    let mut ack = Frame::keepalive(false);
                    ack.data = frame.data;
                    self.send(ack).await.map_err(CloseReason::Io)?;
                }
            }
            FrameType::Error if frame.stream_id == CONNECTION_STREAM_ID => {
                let (code, message) = frame.error_body().map_err(CloseReason::Decode)?;
                return Err(CloseReason::PeerError { code, message });
            }
            FrameType::Error => {
                let (code, message) = frame.error_body().map_err(CloseReason::Decode)?;
                let id = StreamId::new(frame.stream_id);
                if self.shared.registry().deliver_error(id, code, message) == Delivery::Unknown {
                    debug!("error frame for unknown {id}");
                }
            }
            FrameType::Payload => {
                let id = StreamId::new(frame.stream_id);
                let next = frame.is_next();
                let complete = frame.is_complete();
                let outcome = self
                    .shared
                    .registry()
                    .deliver_payload(id, frame.into_payload(), next, complete);
                match outcome {
                    // An unknown id means the stream was released locally
                    // (possibly before a queued cancel could be sent); either
                    // way the peer must stop streaming to it.
                    Delivery::Abandoned | Delivery::Unknown => {
                        if outcome == Delivery::Unknown {
                            debug!("payload frame for unknown {id}");
                        }
                        self.send(Frame::cancel(id.as_u32()))
                            .await
                            .map_err(CloseReason::Io)?;
                    }
                    Delivery::Delivered | Delivery::Terminal => {}
                }
            }
            FrameType::Setup
            | FrameType::RequestResponse
            | FrameType::RequestStream
            | FrameType::Cancel => {
                // Responder-side traffic; this runtime is requester-only.
                warn!(
                    "ignoring unexpected {:?} frame on stream {}",
                    frame.frame_type, frame.stream_id
                );
            }
        }
        Ok(())
    }

    /// Tear the connection down: record the terminal state, fail every
    /// pending stream, and close the transport.
    async fn finish(mut self, reason: CloseReason) {
        let pending = self.shared.registry().pending();
        if reason.is_error() {
            self.shared.transition(ConnectionState::Errored);
            metrics::record(MetricEvent::Failure);
            warn!("connection failed: reason={reason}, pending_streams={pending}");
        } else {
            self.shared.transition(ConnectionState::Closing);
            info!("connection closing: reason={reason}, pending_streams={pending}");
        }
        self.shared.registry().fail_all(|| RsockError::ConnectionLost);
        if let Err(error) = self.transport.close().await {
            debug!("transport close failed: {error}");
        }
        self.shared.transition(ConnectionState::Closed);
        metrics::record(MetricEvent::ConnectionClosed);
        info!("connection closed");
        self.closed.cancel();
    }
}
