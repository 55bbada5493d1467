//! Serializer for Courier messages.
//!
//! Messages travel as length-prefixed MessagePack: a 4-byte big-endian
//! length followed by the encoded [`Message`] body.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::message::Message;

/// Maximum message size (8 MiB).
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds the maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// Not enough data to decode a message.
    #[error("Incomplete message: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a message to length-prefixed bytes.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a message into an existing buffer.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode_into(message: &Message, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let body = rmp_serde::to_vec_named(message)?;

    if body.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(body.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);

    Ok(())
}

/// Decode a single message from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Message, ProtocolError> {
    let length = body_length(data)?;

    let total = LENGTH_PREFIX_SIZE + length;
    if data.len() < total {
        return Err(ProtocolError::Incomplete(total - data.len()));
    }

    let message = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total])?;
    Ok(message)
}

/// Try to decode a message from a buffer, advancing it on success.
///
/// Returns `Ok(Some(message))` if a complete message was decoded,
/// `Ok(None)` if more data is needed, or `Err` on a protocol error.
///
/// # Errors
///
/// Returns an error if the message is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
    let length = match body_length(buf) {
        Ok(length) => length,
        Err(ProtocolError::Incomplete(_)) => return Ok(None),
        Err(err) => return Err(err),
    };

    if buf.len() < LENGTH_PREFIX_SIZE + length {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let body = buf.split_to(length);
    let message = rmp_serde::from_slice(&body)?;

    Ok(Some(message))
}

/// Read and validate the length prefix.
fn body_length(data: &[u8]) -> Result<usize, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(length));
    }

    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[test]
    fn test_encode_decode_roundtrip() {
        let messages = vec![
            Message::data("chat", b"Hello, world!".to_vec()),
            Message::data_with_ack("query", b"?".to_vec()),
            Message::broadcast("notice", b"all hands".to_vec()),
            Message::new(MessageType::DataToSocket, "a,b:event", b"x".to_vec()),
            Message::register(b"sock-7".to_vec()),
            Message::join_room("lobby"),
            Message::leave_all_rooms(),
            Message::ack(99, b"done".to_vec()),
        ];

        for message in messages {
            let encoded = encode(&message).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(message, decoded);
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&Message::data("event", b"payload".to_vec())).unwrap();

        match decode(&encoded[..3]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
        match decode(&encoded[..encoded.len() - 1]) {
            Err(ProtocolError::Incomplete(1)) => {}
            other => panic!("Expected Incomplete(1), got {:?}", other),
        }
    }

    #[test]
    fn test_message_too_large() {
        let message = Message::data("big", vec![0u8; MAX_MESSAGE_SIZE + 1]);

        match encode(&message) {
            Err(ProtocolError::MessageTooLarge(_)) => {}
            other => panic!("Expected MessageTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage_length_prefix() {
        // A length prefix past the maximum is rejected before any read.
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0x00];
        match decode(&data) {
            Err(ProtocolError::MessageTooLarge(_)) => {}
            other => panic!("Expected MessageTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let first = Message::data("one", b"1".to_vec());
        let second = Message::join_room("two");

        let mut buf = BytesMut::new();
        encode_into(&first, &mut buf).unwrap();
        encode_into(&second, &mut buf).unwrap();

        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), first);
        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), second);
        assert!(decode_from(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_streaming_decode_partial_frame() {
        let message = Message::data("event", b"payload".to_vec());
        let encoded = encode(&message).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..encoded.len() / 2]);
        assert!(decode_from(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[encoded.len() / 2..]);
        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), message);
    }
}
