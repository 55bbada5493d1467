//! # courier-core
//!
//! Routing endpoints and the room directory for the Courier socket library.
//!
//! This crate turns one framed, bidirectional channel into a
//! multi-destination facility: unicast to named sockets, multicast to named
//! rooms, broadcast, and request/acknowledgement round trips, all
//! multiplexed through one message-type tag per frame.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐  send   ┌─────────────┐
//! │ ClientEndpoint │────────▶│   Channel   │
//! └────────────────┘         └─────────────┘
//!
//! ┌────────────────┐ fan-out ┌───────────────┐ send ┌─────────────┐
//! │ ServerEndpoint │────────▶│ RoomDirectory │─────▶│ Channel × N │
//! └────────────────┘         └───────────────┘      └─────────────┘
//! ```
//!
//! Inbound frames run through a pre-dispatch filter installed on the
//! channel before ordinary event delivery: protocol frames (registration,
//! room control, targeted data) are consumed by the routing layer, and
//! everything else reaches user-level listeners.

pub mod channel;
pub mod client;
pub mod directory;
pub mod emit;
pub mod server;

pub use channel::{
    event, AckCallback, Channel, ChannelError, Dispatch, Incoming, InterceptFn, Listeners, Reply,
};
pub use client::{ClientEndpoint, ClientState};
pub use directory::{
    DirectoryConfig, DirectoryError, DirectoryStats, EmitScope, RoomDirectory,
};
pub use emit::{EmitError, EmitOptions};
pub use server::ServerEndpoint;
