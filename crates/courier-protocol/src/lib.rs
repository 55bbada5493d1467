//! # courier-protocol
//!
//! Wire protocol definitions for the Courier socket library.
//!
//! Every frame on the wire is a [`Message`]: a message-type tag, a
//! correlation id, an address string, and an opaque payload. The address is
//! either a bare event name or, for the two targeted modes, a composite
//! `ids:event` string built by the [`address`] module.
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, Message};
//!
//! let message = Message::data("chat", b"Hello, world!".to_vec());
//!
//! let encoded = codec::encode(&message).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(message, decoded);
//! ```

pub mod address;
pub mod codec;
pub mod message;

pub use address::{AddressError, CompositeAddress};
pub use codec::{decode, encode, ProtocolError};
pub use message::{Message, MessageType};
