//! Request engine: drives individual interactions through their states.
//!
//! A request-response interaction suspends its caller on a oneshot waiter
//! until the receive path demultiplexes a terminal frame for its stream id.
//! A request-stream interaction yields payloads through [`PayloadStream`].
//! Both release their stream id on any terminal outcome, and both cancel
//! cooperatively when the caller abandons interest.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::{
    connection::{ConnectionHandle, ConnectionState},
    error::RsockError,
    frame::{Frame, Payload},
    registry::{StreamEntry, StreamId},
};

/// Releases the stream and signals the peer when a caller gives up before a
/// terminal frame arrives.
struct CancelGuard<'a> {
    handle: &'a ConnectionHandle,
    id: StreamId,
    armed: bool,
}

impl<'a> CancelGuard<'a> {
    fn new(handle: &'a ConnectionHandle, id: StreamId) -> Self {
        Self {
            handle,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) { self.armed = false; }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.handle.cancel_stream(self.id);
        }
    }
}

/// Drive a request-response interaction to its single terminal outcome.
pub(crate) async fn request_response(
    handle: &ConnectionHandle,
    payload: Payload,
) -> Result<Payload, RsockError> {
    if handle.state() != ConnectionState::Open {
        return Err(RsockError::ConnectionLost);
    }
    let (tx, rx) = oneshot::channel();
    let id = allocate_open(handle, StreamEntry::single(tx))?;
    let mut guard = CancelGuard::new(handle, id);
    handle
        .send_frame(Frame::request_response(id.as_u32(), payload))
        .await?;
    let outcome = rx.await;
    guard.disarm();
    match outcome {
        Ok(result) => result,
        // The waiter was dropped without a terminal frame.
        Err(_) => Err(RsockError::ConnectionLost),
    }
}

/// Open a request-stream interaction and return its item sequence.
pub(crate) async fn request_stream(
    handle: &ConnectionHandle,
    payload: Payload,
) -> Result<PayloadStream, RsockError> {
    if handle.state() != ConnectionState::Open {
        return Err(RsockError::ConnectionLost);
    }
    let (tx, rx) = mpsc::unbounded_channel();
    let id = allocate_open(handle, StreamEntry::stream(tx))?;
    let mut guard = CancelGuard::new(handle, id);
    handle
        .send_frame(Frame::request_stream(id.as_u32(), payload))
        .await?;
    guard.disarm();
    Ok(PayloadStream {
        handle: handle.clone(),
        id,
        items: rx,
        terminated: false,
        received: 0,
    })
}

/// Allocate a stream id for an open connection, treating exhaustion as
/// connection-fatal.
///
/// Teardown can interleave with the allocation: the actor transitions out
/// of `Open` before draining the registry, so a waiter registered after the
/// drain would never resolve. Re-checking the state once the entry is in
/// place closes that window.
fn allocate_open(handle: &ConnectionHandle, entry: StreamEntry) -> Result<StreamId, RsockError> {
    let id = match handle.registry().allocate(entry) {
        Ok(id) => id,
        Err(error) => {
            // The id space is spent: nothing sensible can follow on this
            // connection.
            handle.abort();
            return Err(error);
        }
    };
    if handle.state() != ConnectionState::Open {
        handle.registry().release(id);
        return Err(RsockError::ConnectionLost);
    }
    Ok(id)
}

/// A finite, lazy sequence of payloads from a request-stream interaction.
///
/// Items arrive in transport order. The sequence terminates after a frame
/// marked complete (yielding `None`) or after an error frame (yielding one
/// `Err` and then `None`); it is not restartable. Dropping the stream
/// before termination cancels the interaction cooperatively.
///
/// # Examples
///
/// ```no_run
/// use futures::StreamExt;
/// use rsock::{RsockClient, TcpFactory};
///
/// # #[tokio::main]
/// # async fn main() -> rsock::Result<()> {
/// let client = RsockClient::builder()
///     .connect(&TcpFactory::default(), "tcp://127.0.0.1:7878")
///     .await?;
/// let mut quotes = client.request_stream("QuoteService.stream", "{}").await?;
/// while let Some(item) = quotes.next().await {
///     let payload = item?;
///     println!("quote: {:?}", payload.data);
/// }
/// # Ok(())
/// # }
/// ```
pub struct PayloadStream {
    handle: ConnectionHandle,
    id: StreamId,
    items: mpsc::UnboundedReceiver<Result<Payload, RsockError>>,
    terminated: bool,
    received: usize,
}

impl PayloadStream {
    /// The stream id multiplexing this interaction.
    #[must_use]
    pub fn stream_id(&self) -> u32 { self.id.as_u32() }

    /// Whether a terminal frame has been observed.
    #[must_use]
    pub fn is_terminated(&self) -> bool { self.terminated }

    /// Number of payloads yielded so far.
    #[must_use]
    pub fn frames_received(&self) -> usize { self.received }
}

impl Stream for PayloadStream {
    type Item = Result<Payload, RsockError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }
        match this.items.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                this.terminated = true;
                tracing::debug!(
                    stream.frames_total = this.received,
                    stream_id = this.id.as_u32(),
                    "stream terminated"
                );
                Poll::Ready(None)
            }
            Poll::Ready(Some(Ok(payload))) => {
                this.received = this.received.saturating_add(1);
                tracing::debug!(
                    stream.frames_received = this.received,
                    stream_id = this.id.as_u32(),
                    "stream frame received"
                );
                Poll::Ready(Some(Ok(payload)))
            }
            Poll::Ready(Some(Err(error))) => {
                this.terminated = true;
                Poll::Ready(Some(Err(error)))
            }
        }
    }
}

impl Drop for PayloadStream {
    fn drop(&mut self) {
        if !self.terminated {
            self.handle.cancel_stream(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::connection::{Command, Shared};

    fn open_handle() -> (ConnectionHandle, mpsc::Receiver<Command>) {
        let shared = Arc::new(Shared::new());
        shared.transition(ConnectionState::Open);
        let (commands, commands_rx) = mpsc::channel(8);
        let handle = ConnectionHandle {
            commands,
            shared,
            shutdown: CancellationToken::new(),
            closed: CancellationToken::new(),
        };
        (handle, commands_rx)
    }

    #[tokio::test]
    async fn allocation_during_teardown_is_released_not_orphaned() {
        let (handle, _commands_rx) = open_handle();

        // Replay the actor's teardown ordering racing a caller that already
        // passed its open-state check: the state transitions first, then the
        // registry drains.
        handle.shared.transition(ConnectionState::Errored);
        handle.registry().fail_all(|| RsockError::ConnectionLost);

        let (tx, _rx) = oneshot::channel();
        let outcome = allocate_open(&handle, StreamEntry::single(tx));
        assert!(matches!(outcome, Err(RsockError::ConnectionLost)));
        assert_eq!(handle.registry().pending(), 0, "no orphaned waiter");
    }

    #[tokio::test]
    async fn requests_fail_fast_once_the_connection_leaves_open() {
        let (handle, _commands_rx) = open_handle();
        handle.shared.transition(ConnectionState::Closing);

        let single = request_response(&handle, Payload::new("late")).await;
        assert!(matches!(single, Err(RsockError::ConnectionLost)));

        let stream = request_stream(&handle, Payload::new("late")).await;
        assert!(matches!(stream, Err(RsockError::ConnectionLost)));
        assert_eq!(handle.registry().pending(), 0);
    }
}
