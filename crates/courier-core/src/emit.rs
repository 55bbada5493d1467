//! Addressing modes for emit calls.

use courier_protocol::AddressError;
use thiserror::Error;

use crate::channel::ChannelError;

/// Addressing flags for one emit call.
///
/// The modes are independent, not mutually exclusive: a single call issues
/// one send per non-empty mode, and a call with no mode at all degrades to a
/// plain data send.
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Socket ids to address directly.
    pub sockets: Vec<String>,
    /// Rooms whose members should receive the event.
    pub rooms: Vec<String>,
    /// Send to every connected socket.
    pub broadcast: bool,
}

impl EmitOptions {
    /// No addressing flags: a plain data send.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Address every connected socket.
    #[must_use]
    pub fn to_all() -> Self {
        Self {
            broadcast: true,
            ..Self::default()
        }
    }

    /// Address the given socket ids.
    #[must_use]
    pub fn to_sockets<I, S>(sockets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sockets: sockets.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Address the members of the given rooms.
    #[must_use]
    pub fn to_rooms<I, S>(rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rooms: rooms.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Whether no addressing mode is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.broadcast && self.sockets.is_empty() && self.rooms.is_empty()
    }
}

/// Errors from classifying and sending one emit call.
#[derive(Debug, Error)]
pub enum EmitError {
    /// A composite address could not be built from the given targets.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// The channel refused the send.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_options() {
        assert!(EmitOptions::new().is_empty());
        assert!(!EmitOptions::to_all().is_empty());
        assert!(!EmitOptions::to_sockets(["a"]).is_empty());
        assert!(!EmitOptions::to_rooms(["r"]).is_empty());
    }

    #[test]
    fn test_combined_modes() {
        let options = EmitOptions {
            sockets: vec!["a".to_string()],
            broadcast: true,
            ..EmitOptions::default()
        };
        assert!(!options.is_empty());
        assert!(options.rooms.is_empty());
    }
}
