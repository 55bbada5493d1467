//! Server-side routing endpoint for one accepted connection.

use std::sync::Arc;

use courier_protocol::{address, Message, MessageType};
use tracing::warn;

use crate::channel::{
    event, AckCallback, Channel, ChannelError, Dispatch, Incoming, InterceptFn, Listeners,
};
use crate::directory::{DirectoryError, EmitScope, RoomDirectory};
use crate::emit::{EmitError, EmitOptions};

/// Server-side routing endpoint.
///
/// One instance per accepted connection. Targeted and broadcast emits are
/// delegated to the shared [`RoomDirectory`] fan-out instead of being
/// re-addressed over this endpoint's own channel; room membership lives in
/// the directory too, never on the endpoint.
#[derive(Clone)]
pub struct ServerEndpoint {
    id: String,
    channel: Arc<dyn Channel>,
    directory: Arc<RoomDirectory>,
    listeners: Arc<Listeners>,
}

impl ServerEndpoint {
    /// Create an endpoint for an accepted connection.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        channel: Arc<dyn Channel>,
        directory: Arc<RoomDirectory>,
        listeners: Arc<Listeners>,
    ) -> Self {
        Self {
            id: id.into(),
            channel,
            directory,
            listeners,
        }
    }

    /// The id this connection was registered under.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
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
        self.listeners.on(event, handler);
    }

    /// Emit an event to this connection as a single plain data frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel refuses the send.
    pub fn emit(&self, event: &str, payload: impl Into<Vec<u8>>) -> Result<(), ChannelError> {
        self.channel.send(Message::data(event, payload))
    }

    /// Emit an event to this connection, expecting an acknowledgement.
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
    /// Broadcast and room modes exclude this endpoint from the fan-out;
    /// the socket mode does not, so listing this endpoint's own id delivers
    /// the message back to it. A call with no mode set sends a single plain
    /// data frame over this endpoint's own channel.
    ///
    /// Returns the number of sockets the directory delivered to.
    ///
    /// # Errors
    ///
    /// Returns an error if the no-mode local send is refused.
    pub fn emit_to(
        &self,
        event: &str,
        payload: &[u8],
        options: &EmitOptions,
    ) -> Result<usize, EmitError> {
        let mut delivered = 0;

        if options.broadcast {
            delivered += self
                .directory
                .emit(event, payload, &EmitScope::all().except(&self.id));
        }

        if !options.sockets.is_empty() {
            // Sender is deliberately not excluded here.
            delivered += self.directory.emit(
                event,
                payload,
                &EmitScope::to_sockets(options.sockets.clone()),
            );
        }

        if !options.rooms.is_empty() {
            delivered += self.directory.emit(
                event,
                payload,
                &EmitScope::to_rooms(options.rooms.clone()).except(&self.id),
            );
        }

        if options.is_empty() {
            self.channel.send(Message::data(event, payload))?;
        }

        Ok(delivered)
    }

    /// Join this connection to a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the room name is invalid or a limit is exceeded.
    pub fn join(&self, room: &str) -> Result<(), DirectoryError> {
        self.directory.join(room, &self.id)
    }

    /// Remove this connection from a room.
    pub fn leave(&self, room: &str) {
        self.directory.leave(room, &self.id);
    }

    /// Remove this connection from every room it joined.
    pub fn leave_all(&self) {
        self.directory.leave_all(&self.id);
    }

    /// Build the pre-dispatch filter for this endpoint's channel.
    ///
    /// Room control frames mutate the directory; targeted and broadcast
    /// data frames re-enter [`emit_to`](Self::emit_to) so the directory
    /// fans them out. Everything else passes through to user-level
    /// delivery.
    #[must_use]
    pub fn intercept(&self) -> InterceptFn {
        let endpoint = self.clone();
        Arc::new(move |message| endpoint.dispatch(message))
    }

    fn dispatch(&self, message: &Message) -> Dispatch {
        match message.message_type {
            MessageType::JoinRoom => {
                if let Some(room) = self.room_name(message) {
                    if let Err(err) = self.join(&room) {
                        self.reject(&err.to_string());
                    }
                }
                Dispatch::Handled
            }
            MessageType::LeaveRoom => {
                if let Some(room) = self.room_name(message) {
                    self.leave(&room);
                }
                Dispatch::Handled
            }
            MessageType::LeaveAllRooms => {
                self.leave_all();
                Dispatch::Handled
            }
            MessageType::DataBroadcast => {
                self.route(&message.address, &message.payload, EmitOptions::to_all());
                Dispatch::Handled
            }
            MessageType::DataToRoom => {
                self.route_composite(message, |targets| EmitOptions::to_rooms(targets));
                Dispatch::Handled
            }
            MessageType::DataToSocket => {
                self.route_composite(message, |targets| EmitOptions::to_sockets(targets));
                Dispatch::Handled
            }
            _ => Dispatch::PassThrough,
        }
    }

    fn route_composite<F>(&self, message: &Message, to_options: F)
    where
        F: FnOnce(Vec<String>) -> EmitOptions,
    {
        match address::decode(&message.address) {
            Ok(composite) => {
                self.route(
                    &composite.event,
                    &message.payload,
                    to_options(composite.targets),
                );
            }
            Err(err) => self.reject(&err.to_string()),
        }
    }

    fn route(&self, event: &str, payload: &[u8], options: EmitOptions) {
        if let Err(err) = self.emit_to(event, payload, &options) {
            self.reject(&err.to_string());
        }
    }

    /// Room control frames carry the room name in the payload.
    fn room_name(&self, message: &Message) -> Option<String> {
        match std::str::from_utf8(&message.payload) {
            Ok(room) => Some(room.to_string()),
            Err(_) => {
                self.reject("room name is not valid UTF-8");
                None
            }
        }
    }

    /// Reject a malformed frame: never routed, never silent.
    fn reject(&self, reason: &str) {
        warn!(socket = %self.id, reason = %reason, "rejecting malformed frame");
        self.listeners
            .raise(&Incoming::new(event::ERROR, reason.as_bytes().to_vec()));
    }
}
