use coap_lite::{MessageClass, MessageType, RequestType, ResponseType};

use crate::app::error::CoapError;
use crate::app::message::Message;

#[derive(Debug, Clone)]
pub struct Request<Endpoint> {
    pub message: Message,
    pub peer: Endpoint,
}

impl<Endpoint> Request<Endpoint> {
    pub fn new(message: Message, peer: Endpoint) -> Self {
        Self { message, peer }
    }

    /// Piggybacked ACK for confirmable requests, NON otherwise.
    pub fn response_type(&self) -> MessageType {
        match self.message.msg_type {
            MessageType::Confirmable => MessageType::Acknowledgement,
            _ => MessageType::NonConfirmable,
        }
    }

    /// Empty response echoing the message ID and token, with the usual success code for the
    /// request's method.
    pub fn new_response(&self) -> Message {
        let default_code = match self.message.method() {
            Some(RequestType::Get) => ResponseType::Content,
            Some(RequestType::Post) => ResponseType::Created,
            Some(RequestType::Put) => ResponseType::Changed,
            Some(RequestType::Delete) => ResponseType::Deleted,
            _ => ResponseType::Valid,
        };
        self.response_with_code(default_code)
    }

    pub fn response_with_code(&self, code: ResponseType) -> Message {
        let mut response = Message::new(
            self.response_type(),
            MessageClass::Response(code),
            self.message.message_id,
        );
        response.token = self.message.token.clone();
        response
    }

    /// A 4.15 answering a confirmable request goes out as a Reset; other errors keep the
    /// normal response type and carry the message as a diagnostic payload.
    pub fn error_response(&self, error: CoapError) -> Message {
        let code = error.response_code();
        let mut response = self.response_with_code(code);
        if code == ResponseType::UnsupportedContentFormat
            && self.message.msg_type == MessageType::Confirmable
        {
            response.msg_type = MessageType::Reset;
        } else {
            response.payload = error.message.into_bytes();
        }
        response
    }
}

/// Reset answering an empty Confirmable message ("CoAP ping").
pub fn new_pong_message(ping: &Message) -> Message {
    Message::empty(MessageType::Reset, ping.message_id)
}

/// 5.00 stand-in for a response that couldn't be encoded.
pub fn degraded_response(original: &Message) -> Message {
    let mut response = Message::new(
        original.msg_type,
        MessageClass::Response(ResponseType::InternalServerError),
        original.message_id,
    );
    response.token = original.token.clone();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::message::Token;

    fn request(msg_type: MessageType, method: RequestType) -> Request<()> {
        let mut message = Message::new(msg_type, MessageClass::Request(method), 42);
        message.token = Token::from_slice(&[9, 9]).unwrap();
        Request::new(message, ())
    }

    #[test]
    fn test_response_mirrors_request() {
        let con = request(MessageType::Confirmable, RequestType::Get).new_response();
        assert_eq!(con.msg_type, MessageType::Acknowledgement);
        assert_eq!(con.message_id, 42);
        assert_eq!(con.token.as_slice(), &[9, 9]);
        assert!(matches!(
            con.code,
            MessageClass::Response(ResponseType::Content)
        ));

        let non = request(MessageType::NonConfirmable, RequestType::Put).new_response();
        assert_eq!(non.msg_type, MessageType::NonConfirmable);
        assert!(matches!(
            non.code,
            MessageClass::Response(ResponseType::Changed)
        ));
    }

    #[test]
    fn test_unsupported_content_format_resets() {
        let con = request(MessageType::Confirmable, RequestType::Get);
        let response = con.error_response(CoapError::content_negotiation_failed());
        assert_eq!(response.msg_type, MessageType::Reset);
        assert!(response.payload.is_empty());

        let non = request(MessageType::NonConfirmable, RequestType::Get);
        let response = non.error_response(CoapError::content_negotiation_failed());
        assert_eq!(response.msg_type, MessageType::NonConfirmable);

        let response = con.error_response(CoapError::not_found());
        assert_eq!(response.msg_type, MessageType::Acknowledgement);
        assert_eq!(response.payload, b"Not found");
    }
}
