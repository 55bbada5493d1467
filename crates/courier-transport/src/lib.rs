//! # courier-transport
//!
//! TCP transport for the Courier socket library.
//!
//! Implements the core channel contract over `tokio` TCP streams: framed
//! I/O, acknowledgement correlation, an outbound queue while disconnected,
//! and client-side reconnection. Endpoints from `courier-core` sit on top
//! and never touch the socket directly.

pub mod tcp;

pub use tcp::{connect, TcpChannel, TcpConfig, TransportError};
