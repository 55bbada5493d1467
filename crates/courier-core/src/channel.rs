//! The channel seam between routing endpoints and the transport.
//!
//! Endpoints never touch sockets. They hand [`Message`]s to a [`Channel`]
//! for framing and transmission, and receive inbound frames through a
//! pre-dispatch filter installed on the channel at construction time.
//! Frames the filter does not claim are delivered to the endpoint's
//! user-level [`Listeners`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use courier_protocol::Message;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

/// Reserved lifecycle event names raised on an endpoint's listeners.
pub mod event {
    /// Raised once the endpoint is registered and knows its id.
    pub const CONNECT: &str = "connect";
    /// Raised when the underlying connection closes.
    pub const CLOSE: &str = "close";
    /// Raised when the channel hits a transport or protocol error.
    pub const ERROR: &str = "error";
}

/// Callback invoked when a matching acknowledgement frame arrives.
pub type AckCallback = Box<dyn FnOnce(Vec<u8>) + Send + 'static>;

/// Errors surfaced when a message cannot be handed to a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The connection is gone and nothing is accepting messages.
    #[error("channel is closed")]
    Closed,

    /// The channel accepted the message but the transport rejected it.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// A bidirectional message channel as seen by a routing endpoint.
///
/// `send` is a non-blocking hand-off: the channel either enqueues the
/// message for transmission or reports failure. It never blocks the caller;
/// delivery, retries, and correlation are the channel's own concern.
pub trait Channel: Send + Sync {
    /// Hand a message to the channel for framing and transmission.
    fn send(&self, message: Message) -> Result<(), ChannelError>;

    /// Send a message that expects an acknowledgement.
    ///
    /// The channel assigns the correlation id and invokes `ack` when the
    /// matching acknowledgement frame arrives.
    fn send_with_ack(&self, message: Message, ack: AckCallback) -> Result<(), ChannelError>;

    /// Whether the underlying connection is currently established.
    fn is_connected(&self) -> bool;
}

/// Outcome of running the pre-dispatch filter over one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The routing layer consumed the frame; do not deliver it.
    Handled,
    /// Deliver the frame to user-level listeners.
    PassThrough,
}

/// Pre-dispatch filter installed on a channel at construction time.
///
/// The channel runs this over every decoded inbound frame ahead of default
/// user-event delivery.
pub type InterceptFn = Arc<dyn Fn(&Message) -> Dispatch + Send + Sync>;

/// Handle for answering a `DataWithAck` frame.
#[derive(Debug, Clone)]
pub struct Reply {
    outbound: mpsc::UnboundedSender<Message>,
    id: u64,
}

impl Reply {
    /// Create a reply handle for the given correlation id.
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<Message>, id: u64) -> Self {
        Self { outbound, id }
    }

    /// Correlation id of the frame being answered.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Send the acknowledgement payload back to the requester.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is gone.
    pub fn send(&self, payload: impl Into<Vec<u8>>) -> Result<(), ChannelError> {
        self.outbound
            .send(Message::ack(self.id, payload))
            .map_err(|_| ChannelError::Closed)
    }
}

/// An inbound event delivered to user-level listeners.
#[derive(Debug)]
pub struct Incoming {
    /// Event name.
    pub event: String,
    /// Event payload.
    pub payload: Vec<u8>,
    /// Present when the sender asked for an acknowledgement.
    pub reply: Option<Reply>,
}

impl Incoming {
    /// Create an inbound event.
    #[must_use]
    pub fn new(event: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            event: event.into(),
            payload: payload.into(),
            reply: None,
        }
    }

    /// Attach a reply handle.
    #[must_use]
    pub fn with_reply(mut self, reply: Reply) -> Self {
        self.reply = Some(reply);
        self
    }
}

type Handler = Arc<dyn Fn(&Incoming) + Send + Sync>;

/// Registry of user-level event handlers for one endpoint.
///
/// [`Listeners::raise`] delivers an event to this endpoint's own handlers
/// without going through outbound transmission or interception.
#[derive(Default)]
pub struct Listeners {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl Listeners {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event name.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Incoming) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers
                .entry(event.to_string())
                .or_default()
                .push(Arc::new(handler));
        }
    }

    /// Raise an event on this endpoint's own handlers.
    pub fn raise(&self, incoming: &Incoming) {
        // Clone the handler list out of the lock so handlers can register
        // further listeners without deadlocking.
        let handlers: Vec<Handler> = match self.handlers.read() {
            Ok(map) => match map.get(&incoming.event) {
                Some(list) => list.clone(),
                None => {
                    trace!(event = %incoming.event, "no listeners for event");
                    return;
                }
            },
            Err(_) => return,
        };

        for handler in handlers {
            handler(incoming);
        }
    }

    /// Number of handlers registered for an event name.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .map(|map| map.get(event).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Channel double for routing-layer tests.

    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records every message handed off, without any transport behind it.
    pub struct MockChannel {
        sent: Mutex<Vec<Message>>,
        pending: Mutex<Vec<(Message, AckCallback)>>,
        next_id: AtomicU64,
        pub connected: AtomicBool,
    }

    impl MockChannel {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                pending: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                connected: AtomicBool::new(true),
            })
        }

        /// Snapshot of every message sent without an ack.
        pub fn sent(&self) -> Vec<Message> {
            self.sent.lock().unwrap().clone()
        }

        /// Take the pending acknowledged sends, callbacks included.
        pub fn take_pending(&self) -> Vec<(Message, AckCallback)> {
            std::mem::take(&mut self.pending.lock().unwrap())
        }
    }

    impl Channel for MockChannel {
        fn send(&self, message: Message) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        fn send_with_ack(
            &self,
            mut message: Message,
            ack: AckCallback,
        ) -> Result<(), ChannelError> {
            message.id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            self.pending.lock().unwrap().push((message, ack));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }
}
