//! In-process message bus: the transport substrate between the relay
//! and its peers.
//!
//! Request/response travels over an mpsc channel of JSON envelopes, each
//! carrying a oneshot reply sender; session-update broadcasts fan out on
//! a separate broadcast channel. A closed request channel is the "no
//! receiving end" signal a peer sees when the relay is not alive. The
//! bus itself performs no retries and no timeouts.

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::relay::protocol::SessionUpdate;

/// Default capacity for both the request queue and the broadcast ring.
pub const DEFAULT_BUS_CAPACITY: usize = 32;

/// One inbound request: an opaque JSON payload plus the channel the
/// handler answers on. Dropping `reply` without sending closes the
/// channel and the requester observes an unacknowledged send.
pub struct Envelope {
    pub payload: Value,
    pub reply: oneshot::Sender<Value>,
}

/// Outcome of a peer-initiated request.
#[derive(Debug)]
pub enum SendOutcome {
    /// The relay answered; here is its response payload.
    Delivered(Value),
    /// No one is listening on the request channel (relay dormant or
    /// never started). Expected transient, not a failure.
    NoReceiver,
    /// The relay received the envelope but tore the reply channel down
    /// without answering.
    NoResponse,
}

/// Peer-side bus handle. Cheap to clone; every peer context holds one.
#[derive(Clone)]
pub struct MessageBus {
    requests: mpsc::Sender<Envelope>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl MessageBus {
    /// Send a request payload and wait for the single response.
    pub async fn request(&self, payload: Value) -> SendOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            payload,
            reply: reply_tx,
        };

        if self.requests.send(envelope).await.is_err() {
            return SendOutcome::NoReceiver;
        }

        match reply_rx.await {
            Ok(value) => SendOutcome::Delivered(value),
            Err(_) => SendOutcome::NoResponse,
        }
    }

    /// Subscribe to relay broadcasts. Each subscriber gets every update
    /// sent after the point of subscription.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }
}

/// Relay-side bus end: the single consumer of the request queue and the
/// producer of broadcasts.
pub struct BusListener {
    requests: mpsc::Receiver<Envelope>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl BusListener {
    /// Next inbound envelope. `None` once every peer handle is gone.
    pub async fn next_request(&mut self) -> Option<Envelope> {
        self.requests.recv().await
    }

    /// Detached broadcast handle, usable while the request queue is
    /// being polled.
    pub fn update_handle(&self) -> UpdateBroadcast {
        UpdateBroadcast {
            updates: self.updates.clone(),
        }
    }
}

/// Sender half of the update fan-out.
#[derive(Clone)]
pub struct UpdateBroadcast {
    updates: broadcast::Sender<SessionUpdate>,
}

impl UpdateBroadcast {
    /// Fan an update out to subscribers. Sending with zero subscribers
    /// succeeds silently; broadcasts are fire-and-forget. Returns the
    /// number of receivers the update reached.
    pub fn send(&self, update: SessionUpdate) -> usize {
        self.updates.send(update).unwrap_or(0)
    }
}

/// Build a connected bus pair with the given queue capacity.
pub fn message_bus(capacity: usize) -> (MessageBus, BusListener) {
    let (request_tx, request_rx) = mpsc::channel(capacity);
    let (update_tx, _) = broadcast::channel(capacity);

    (
        MessageBus {
            requests: request_tx,
            updates: update_tx.clone(),
        },
        BusListener {
            requests: request_rx,
            updates: update_tx,
        },
    )
}

// ── Tests ───────────────────────────────────────────────────────
