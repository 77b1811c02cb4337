//! Stream id allocation and routing of inbound frames to pending requests.
//!
//! `StreamRegistry` owns the set of in-flight streams for one connection.
//! Ids are odd (client-initiated) and monotonically increasing; the id
//! space is never recycled, so exhaustion is a fatal condition rather than
//! a silent reuse. The registry routes demultiplexed `Payload` and `Error`
//! frames to the waiter registered for the owning stream.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::RsockError,
    frame::Payload,
};

/// Identifier multiplexing one request over the shared connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamId(u32);

impl StreamId {
    /// Wrap a raw wire identifier.
    #[must_use]
    pub const fn new(id: u32) -> Self { Self(id) }

    /// The raw wire representation.
    #[must_use]
    pub const fn as_u32(self) -> u32 { self.0 }
}

impl From<u32> for StreamId {
    fn from(value: u32) -> Self { Self(value) }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

/// Interaction mode of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InteractionMode {
    /// Exactly one response value.
    RequestResponse,
    /// Zero or more response values terminated by a complete marker.
    RequestStream,
}

/// Channel the terminal (or streamed) outcome is delivered through.
pub(crate) enum Waiter {
    /// Single-response waiter resolved at most once.
    Single(oneshot::Sender<Result<Payload, RsockError>>),
    /// Streaming waiter; dropping the sender terminates the consumer.
    Stream(mpsc::UnboundedSender<Result<Payload, RsockError>>),
}

/// One in-flight request tracked by the registry.
pub(crate) struct StreamEntry {
    pub(crate) mode: InteractionMode,
    pub(crate) waiter: Waiter,
    /// Accumulated response fragments for single-response mode.
    partial: Option<Payload>,
}

impl StreamEntry {
    pub(crate) fn single(tx: oneshot::Sender<Result<Payload, RsockError>>) -> Self {
        Self {
            mode: InteractionMode::RequestResponse,
            waiter: Waiter::Single(tx),
            partial: None,
        }
    }

    pub(crate) fn stream(tx: mpsc::UnboundedSender<Result<Payload, RsockError>>) -> Self {
        Self {
            mode: InteractionMode::RequestStream,
            waiter: Waiter::Stream(tx),
            partial: None,
        }
    }

    /// Deliver the terminal outcome, consuming the entry.
    fn resolve(self, result: Result<Payload, RsockError>) {
        match self.waiter {
            Waiter::Single(tx) => {
                // The caller may have abandoned the request; nothing to do.
                let _ = tx.send(result);
            }
            Waiter::Stream(tx) => {
                if result.is_err() {
                    let _ = tx.send(result);
                }
                // Dropping the sender closes the stream for the consumer.
            }
        }
    }

    /// Push one item to a streaming waiter; `false` when abandoned.
    fn send_item(&self, item: Result<Payload, RsockError>) -> bool {
        match &self.waiter {
            Waiter::Stream(tx) => tx.send(item).is_ok(),
            Waiter::Single(_) => false,
        }
    }
}

/// Outcome of routing one inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The frame reached its waiter; the stream remains pending.
    Delivered,
    /// The frame was terminal; the stream has been released.
    Terminal,
    /// The consumer abandoned the stream; the entry has been released and
    /// the peer should be cancelled.
    Abandoned,
    /// No pending stream matches the id.
    Unknown,
}

/// First client-initiated stream id; clients use the odd id space.
const FIRST_CLIENT_STREAM_ID: u64 = 1;

/// Registry of pending streams for one connection.
///
/// Allocation and release are safe for concurrent invocation; routing is
/// driven by the connection's sequential receive path.
pub struct StreamRegistry {
    // Widened beyond the wire's u32 so wrap detection is a plain compare.
    next_raw: AtomicU64,
    entries: DashMap<StreamId, StreamEntry>,
}

impl Default for StreamRegistry {
    fn default() -> Self { Self::new() }
}

impl StreamRegistry {
    /// Create an empty registry starting at stream id 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_raw: AtomicU64::new(FIRST_CLIENT_STREAM_ID),
            entries: DashMap::new(),
        }
    }

    #[cfg(test)]
    fn with_next_raw(raw: u64) -> Self {
        Self {
            next_raw: AtomicU64::new(raw),
            entries: DashMap::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn seed_next_raw(&self, raw: u64) {
        self.next_raw.store(raw, Ordering::Relaxed);
    }

    /// Allocate the next odd stream id and register `entry` under it.
    ///
    /// # Errors
    ///
    /// Returns [`RsockError::StreamSpaceExhausted`] once the odd id space
    /// wraps; ids are never reused.
    pub(crate) fn allocate(&self, entry: StreamEntry) -> Result<StreamId, RsockError> {
        let raw = self.next_raw.fetch_add(2, Ordering::Relaxed);
        let Ok(id) = u32::try_from(raw) else {
            return Err(RsockError::StreamSpaceExhausted);
        };
        let id = StreamId::new(id);
        self.entries.insert(id, entry);
        Ok(id)
    }

    /// The interaction mode of the pending stream with `id`, if any.
    #[must_use]
    pub fn lookup(&self, id: StreamId) -> Option<InteractionMode> {
        self.entries.get(&id).map(|entry| entry.mode)
    }

    /// Whether a pending stream with `id` exists.
    #[must_use]
    pub fn contains(&self, id: StreamId) -> bool { self.entries.contains_key(&id) }

    /// Number of pending streams.
    #[must_use]
    pub fn pending(&self) -> usize { self.entries.len() }

    /// Remove the entry for `id`. Idempotent: releasing an absent id is a
    /// no-op.
    pub(crate) fn release(&self, id: StreamId) { self.entries.remove(&id); }

    /// Route a payload frame to the stream's waiter.
    pub(crate) fn deliver_payload(
        &self,
        id: StreamId,
        payload: Payload,
        next: bool,
        complete: bool,
    ) -> Delivery {
        let Some(mode) = self.lookup(id) else {
            return Delivery::Unknown;
        };
        match mode {
            InteractionMode::RequestResponse => {
                self.deliver_single(id, payload, next, complete)
            }
            InteractionMode::RequestStream => {
                self.deliver_stream(id, payload, next, complete)
            }
        }
    }

    fn deliver_single(&self, id: StreamId, payload: Payload, next: bool, complete: bool) -> Delivery {
        if complete {
            let Some((_, mut entry)) = self.entries.remove(&id) else {
                return Delivery::Unknown;
            };
            let mut value = entry.partial.take().unwrap_or_default();
            if next {
                value.extend(payload);
            }
            entry.resolve(Ok(value));
            return Delivery::Terminal;
        }
        if next {
            let Some(mut entry) = self.entries.get_mut(&id) else {
                return Delivery::Unknown;
            };
            match &mut entry.partial {
                Some(accumulated) => accumulated.extend(payload),
                None => entry.partial = Some(payload),
            }
        }
        Delivery::Delivered
    }

    fn deliver_stream(&self, id: StreamId, payload: Payload, next: bool, complete: bool) -> Delivery {
        if next {
            let delivered = match self.entries.get(&id) {
                Some(entry) => entry.send_item(Ok(payload)),
                None => return Delivery::Unknown,
            };
            if !delivered {
                self.release(id);
                return Delivery::Abandoned;
            }
        }
        if complete {
            self.entries.remove(&id);
            return Delivery::Terminal;
        }
        Delivery::Delivered
    }

    /// Route an error frame to the stream's waiter, failing only that
    /// stream.
    pub(crate) fn deliver_error(&self, id: StreamId, code: u32, message: String) -> Delivery {
        let Some((_, entry)) = self.entries.remove(&id) else {
            return Delivery::Unknown;
        };
        entry.resolve(Err(RsockError::Peer { code, message }));
        Delivery::Terminal
    }

    /// Fail every pending stream, draining the registry.
    pub(crate) fn fail_all(&self, make_error: impl Fn() -> RsockError) {
        let ids: Vec<StreamId> = self.entries.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                entry.resolve(Err(make_error()));
            }
        }
    }
}
