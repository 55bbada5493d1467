//! Message types for the Courier protocol.
//!
//! Every frame on the wire is a [`Message`]: one message-type tag, a
//! correlation id, an address string, and an opaque payload.

use serde::{Deserialize, Serialize};

/// Message type identifiers.
///
/// The tag space is shared by client and server and is wire-stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum MessageType {
    /// Server-to-client id assignment, sent once per accepted connection.
    Register = 0x01,
    JoinRoom = 0x02,
    LeaveRoom = 0x03,
    LeaveAllRooms = 0x04,
    Data = 0x05,
    /// Data that expects an [`MessageType::Ack`] correlated by id.
    DataWithAck = 0x06,
    DataBroadcast = 0x07,
    DataToRoom = 0x08,
    DataToSocket = 0x09,
    /// Acknowledgement answering a `DataWithAck` frame.
    Ack = 0x0A,
}

impl From<MessageType> for u8 {
    fn from(mt: MessageType) -> u8 {
        mt as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::Register),
            0x02 => Ok(MessageType::JoinRoom),
            0x03 => Ok(MessageType::LeaveRoom),
            0x04 => Ok(MessageType::LeaveAllRooms),
            0x05 => Ok(MessageType::Data),
            0x06 => Ok(MessageType::DataWithAck),
            0x07 => Ok(MessageType::DataBroadcast),
            0x08 => Ok(MessageType::DataToRoom),
            0x09 => Ok(MessageType::DataToSocket),
            0x0A => Ok(MessageType::Ack),
            _ => Err("Invalid message type"),
        }
    }
}

/// A protocol message.
///
/// The address field carries the event name for data frames and the
/// composite `ids:event` string for the two targeted modes. Control frames
/// (register, join, leave) leave it empty and put their argument in the
/// payload instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message type tag.
    #[serde(rename = "mt")]
    pub message_type: MessageType,
    /// Correlation id for acknowledged sends; 0 when unused.
    pub id: u64,
    /// Event name or composite address.
    pub address: String,
    /// Opaque payload bytes.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message with the given tag, address, and payload.
    #[must_use]
    pub fn new(
        message_type: MessageType,
        address: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            message_type,
            id: 0,
            address: address.into(),
            payload: payload.into(),
        }
    }

    /// Create a plain data message addressed by an event name.
    #[must_use]
    pub fn data(event: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageType::Data, event, payload)
    }

    /// Create a data message that expects an acknowledgement.
    ///
    /// The correlation id stays 0 here; the channel assigns it when the
    /// message is handed off.
    #[must_use]
    pub fn data_with_ack(event: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageType::DataWithAck, event, payload)
    }

    /// Create a broadcast data message.
    #[must_use]
    pub fn broadcast(event: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageType::DataBroadcast, event, payload)
    }

    /// Create a registration message carrying the assigned socket id.
    #[must_use]
    pub fn register(socket_id: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageType::Register, "", socket_id)
    }

    /// Create a join-room control message.
    #[must_use]
    pub fn join_room(room: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageType::JoinRoom, "", room)
    }

    /// Create a leave-room control message.
    #[must_use]
    pub fn leave_room(room: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageType::LeaveRoom, "", room)
    }

    /// Create a leave-all-rooms control message.
    #[must_use]
    pub fn leave_all_rooms() -> Self {
        Self::new(MessageType::LeaveAllRooms, "", Vec::new())
    }

    /// Create an acknowledgement answering the given correlation id.
    #[must_use]
    pub fn ack(id: u64, payload: impl Into<Vec<u8>>) -> Self {
        let mut message = Self::new(MessageType::Ack, "", payload);
        message.id = id;
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_to_u8() {
        assert_eq!(u8::from(MessageType::Register), 0x01);
        assert_eq!(u8::from(MessageType::Ack), 0x0A);
    }

    #[test]
    fn test_message_type_from_u8() {
        assert_eq!(MessageType::try_from(0x05), Ok(MessageType::Data));
        assert_eq!(MessageType::try_from(0x08), Ok(MessageType::DataToRoom));
        assert!(MessageType::try_from(0x0B).is_err());
        assert!(MessageType::try_from(0x00).is_err());
    }

    #[test]
    fn test_data_message() {
        let msg = Message::data("chat", b"hello".to_vec());
        assert_eq!(msg.message_type, MessageType::Data);
        assert_eq!(msg.address, "chat");
        assert_eq!(msg.payload, b"hello");
        assert_eq!(msg.id, 0);
    }

    #[test]
    fn test_control_messages_use_payload() {
        let join = Message::join_room("lobby");
        assert_eq!(join.message_type, MessageType::JoinRoom);
        assert_eq!(join.address, "");
        assert_eq!(join.payload, b"lobby");

        let leave_all = Message::leave_all_rooms();
        assert_eq!(leave_all.message_type, MessageType::LeaveAllRooms);
        assert!(leave_all.payload.is_empty());
    }

    #[test]
    fn test_ack_carries_correlation_id() {
        let msg = Message::ack(42, b"done".to_vec());
        assert_eq!(msg.message_type, MessageType::Ack);
        assert_eq!(msg.id, 42);
        assert_eq!(msg.payload, b"done");
    }
}
