//! Datagram <-> [`Message`] conversion on top of [`coap_lite::Packet`].

use bytes::Bytes;
use coap_lite::error::MessageError;
use coap_lite::{CoapOption, MessageClass, MessageType, Packet};
use thiserror::Error;

use crate::app::message::{Message, MessageId, MessageOptions, OptionValue, Token, MAX_TOKEN_LEN};

pub const COAP_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 4;
const PAYLOAD_MARKER: u8 = 0xff;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid header")]
    InvalidHeader,

    #[error("token length {0} exceeds 8 bytes")]
    InvalidTokenLength(usize),

    #[error("malformed option")]
    MalformedOption,

    #[error("encoded message is {size} bytes, budget is {budget}")]
    Oversized { size: usize, budget: usize },
}

impl From<MessageError> for DecodeError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::InvalidOptionDelta | MessageError::InvalidOptionLength => {
                DecodeError::MalformedOption
            }
            _ => DecodeError::InvalidHeader,
        }
    }
}

/// Fixed header fields, readable without decoding options or payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaderView {
    pub msg_type: MessageType,
    pub code: MessageClass,
    pub message_id: MessageId,
    pub token_len: usize,
}

pub fn peek_header(datagram: &[u8]) -> Result<HeaderView, DecodeError> {
    if datagram.len() < HEADER_LEN || datagram[0] >> 6 != COAP_VERSION {
        return Err(DecodeError::InvalidHeader);
    }
    let msg_type = match (datagram[0] >> 4) & 0x03 {
        0 => MessageType::Confirmable,
        1 => MessageType::NonConfirmable,
        2 => MessageType::Acknowledgement,
        _ => MessageType::Reset,
    };
    let token_len = usize::from(datagram[0] & 0x0f);
    if token_len > MAX_TOKEN_LEN {
        return Err(DecodeError::InvalidTokenLength(token_len));
    }
    if datagram.len() < HEADER_LEN + token_len {
        return Err(DecodeError::InvalidHeader);
    }
    Ok(HeaderView {
        msg_type,
        code: MessageClass::from(datagram[1]),
        message_id: u16::from_be_bytes([datagram[2], datagram[3]]),
        token_len,
    })
}

pub fn decode(datagram: &[u8]) -> Result<Message, DecodeError> {
    let header = peek_header(datagram)?;
    let packet = Packet::from_bytes(datagram)?;
    // A payload marker must be followed by at least one byte (RFC 7252 §3).
    if packet.payload.is_empty() && has_payload_marker(datagram, HEADER_LEN + header.token_len) {
        return Err(DecodeError::InvalidHeader);
    }

    let token = Token::from_slice(&packet.get_token())?;
    let mut options = MessageOptions::default();
    for (number, values) in packet.options() {
        for value in values {
            options.insert(*number, OptionValue::from_slice(value)?);
        }
    }

    Ok(Message {
        msg_type: header.msg_type,
        code: header.code,
        message_id: header.message_id,
        token,
        options,
        payload: packet.payload,
    })
}

/// Skips over the options starting at `offset` and reports whether they end in a payload
/// marker rather than at the end of the datagram.
fn has_payload_marker(datagram: &[u8], mut offset: usize) -> bool {
    while let Some(&byte) = datagram.get(offset) {
        if byte == PAYLOAD_MARKER {
            return true;
        }
        offset += 1;
        for nibble in [byte >> 4, byte & 0x0f] {
            match nibble {
                13 => offset += 1,
                14 => offset += 2,
                _ => {}
            }
        }
        let length = match byte & 0x0f {
            13 => datagram.get(offset - 1).map(|b| usize::from(*b) + 13),
            14 => datagram
                .get(offset - 2..offset)
                .map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])) + 269),
            n => Some(usize::from(n)),
        };
        match length {
            Some(length) => offset += length,
            None => return false,
        }
    }
    false
}

/// Serializes `message`, refusing anything larger than `budget` bytes.
pub fn encode(message: &Message, budget: usize) -> Result<Bytes, DecodeError> {
    let mut packet = Packet::new();
    packet.header.set_type(message.msg_type);
    packet.header.code = message.code;
    packet.header.message_id = message.message_id;
    packet.set_token(message.token.as_slice().to_vec());
    for (number, value) in message.options.iter() {
        packet.add_option(CoapOption::from(number), value.as_slice().to_vec());
    }
    packet.payload = message.payload.clone();

    let bytes = packet.to_bytes().map_err(|e| match e {
        MessageError::InvalidPacketLength => DecodeError::Oversized {
            size: estimated_len(message),
            budget,
        },
        other => DecodeError::from(other),
    })?;
    if bytes.len() > budget {
        return Err(DecodeError::Oversized {
            size: bytes.len(),
            budget,
        });
    }
    Ok(Bytes::from(bytes))
}

fn estimated_len(message: &Message) -> usize {
    let options: usize = message
        .options
        .iter()
        .map(|(_, value)| value.as_slice().len() + 1)
        .sum();
    HEADER_LEN + message.token.len() + options + 1 + message.payload.len()
}
