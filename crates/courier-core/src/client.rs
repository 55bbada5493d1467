//! Client-side routing endpoint.

use std::sync::Arc;

use courier_protocol::{address, Message, MessageType};
use tokio::sync::watch;
use tracing::debug;

use crate::channel::{
    event, AckCallback, Channel, ChannelError, Dispatch, Incoming, InterceptFn, Listeners,
};
use crate::emit::{EmitError, EmitOptions};

/// Shared state behind a client endpoint.
///
/// Holds the identity assigned by the server at registration and the
/// endpoint's listener registry. The id is written only by the channel's
/// read path, on `Register` frames; a reconnecting channel re-registers and
/// replaces it.
pub struct ClientState {
    id: watch::Sender<Option<String>>,
    listeners: Arc<Listeners>,
}

impl ClientState {
    /// Create an unregistered client state.
    #[must_use]
    pub fn new() -> Self {
        let (id, _) = watch::channel(None);
        Self {
            id,
            listeners: Arc::new(Listeners::new()),
        }
    }

    /// The id assigned by the server, if registered.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.id.borrow().clone()
    }

    /// The endpoint's listener registry, shared with its channel.
    #[must_use]
    pub fn listeners(&self) -> &Arc<Listeners> {
        &self.listeners
    }

    /// Build the pre-dispatch filter for this endpoint's channel.
    ///
    /// Recognizes only `Register`: stores the payload as the endpoint id
    /// and raises a single local `connect` event, bypassing interception.
    /// Every other message type passes through to user-level delivery.
    #[must_use]
    pub fn intercept(self: &Arc<Self>) -> InterceptFn {
        let state = Arc::clone(self);
        Arc::new(move |message| match message.message_type {
            MessageType::Register => {
                let id = String::from_utf8_lossy(&message.payload).into_owned();
                debug!(socket = %id, "registered");
                state.id.send_replace(Some(id));
                state
                    .listeners
                    .raise(&Incoming::new(event::CONNECT, message.payload.clone()));
                Dispatch::Handled
            }
            _ => Dispatch::PassThrough,
        })
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-side routing endpoint.
///
/// Classifies emit calls into per-mode sends over its own channel. The
/// server performs the actual fan-out when a targeted or broadcast frame
/// arrives.
pub struct ClientEndpoint {
    channel: Arc<dyn Channel>,
    state: Arc<ClientState>,
}

impl ClientEndpoint {
    /// Assemble an endpoint from a channel and its shared state.
    ///
    /// The channel must have been built with [`ClientState::intercept`] as
    /// its pre-dispatch filter and the state's listener registry.
    #[must_use]
    pub fn new(channel: Arc<dyn Channel>, state: Arc<ClientState>) -> Self {
        Self { channel, state }
    }

    /// The id assigned by the server, if registered.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.state.id()
    }

    /// Whether the underlying connection is currently established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Register a handler for an inbound event.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Incoming) + Send + Sync + 'static,
    {
        self.state.listeners.on(event, handler);
    }

    /// Wait until the server has assigned this endpoint its id.
    pub async fn wait_connected(&self) -> String {
        let mut rx = self.state.id.subscribe();
        let id = match rx.wait_for(Option::is_some).await {
            Ok(id) => id.clone().unwrap_or_default(),
            Err(_) => String::new(),
        };
        id
    }

    /// Emit an event as a single plain data frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel refuses the send.
    pub fn emit(&self, event: &str, payload: impl Into<Vec<u8>>) -> Result<(), ChannelError> {
        self.channel.send(Message::data(event, payload))
    }

    /// Emit an event that expects an acknowledgement.
    ///
    /// Only the message tag and correlation differ from [`emit`](Self::emit);
    /// the ack callback is resolved by the channel when the matching frame
    /// arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel refuses the send.
    pub fn emit_with_ack(
        &self,
        event: &str,
        payload: impl Into<Vec<u8>>,
        ack: AckCallback,
    ) -> Result<(), ChannelError> {
        self.channel
            .send_with_ack(Message::data_with_ack(event, payload), ack)
    }

    /// Emit an event with explicit addressing modes.
    ///
    /// Issues one send per non-empty mode, in the order broadcast, sockets,
    /// rooms. A call with no mode set degrades to a plain data send.
    ///
    /// # Errors
    ///
    /// Returns an error if a composite address cannot be built or the
    /// channel refuses a send.
    pub fn emit_to(
        &self,
        event: &str,
        payload: &[u8],
        options: &EmitOptions,
    ) -> Result<(), EmitError> {
        if options.broadcast {
            self.channel.send(Message::broadcast(event, payload))?;
        }

        if !options.sockets.is_empty() {
            let composite = address::encode(&options.sockets, event)?;
            self.channel
                .send(Message::new(MessageType::DataToSocket, composite, payload))?;
        }

        if !options.rooms.is_empty() {
            let composite = address::encode(&options.rooms, event)?;
            self.channel
                .send(Message::new(MessageType::DataToRoom, composite, payload))?;
        }

        if options.is_empty() {
            self.channel.send(Message::data(event, payload))?;
        }

        Ok(())
    }

    /// Join a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel refuses the send.
    pub fn join(&self, room: &str) -> Result<(), ChannelError> {
        self.channel.send(Message::join_room(room))
    }

    /// Leave a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel refuses the send.
    pub fn leave(&self, room: &str) -> Result<(), ChannelError> {
        self.channel.send(Message::leave_room(room))
    }

    /// Leave all rooms.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel refuses the send.
    pub fn leave_all(&self) -> Result<(), ChannelError> {
        self.channel.send(Message::leave_all_rooms())
    }
}
