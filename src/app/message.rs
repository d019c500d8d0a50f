//! Owned value model of a single CoAP message.
//!
//! Tokens and option values are small fixed-capacity buffers so that a response never aliases
//! the buffers of the request it answers.  See [RFC 7252](https://datatracker.ietf.org/doc/html/rfc7252#section-3)
//! for the wire layout these map onto.

use std::collections::HashMap;

use coap_lite::{CoapOption, MessageClass, MessageType, RequestType};

use crate::app::codec::DecodeError;
use crate::app::content_type::ContentType;
use crate::app::u24::u24;
use crate::app::CoapError;

pub type MessageId = u16;

pub const MAX_TOKEN_LEN: usize = 8;

/// Longest option value we accept.  Covers every option this engine consumes (Uri-Path and
/// Uri-Query segments are themselves capped at 255 bytes by RFC 7252).
pub const MAX_OPTION_VALUE_LEN: usize = 255;

/// Observe option value asking the server to add an observer (RFC 7641 §2).
pub const OBSERVE_REGISTER: u32 = 0;

/// Observe option value asking the server to remove an observer.
pub const OBSERVE_DEREGISTER: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Token(heapless::Vec<u8, MAX_TOKEN_LEN>);

impl Token {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        heapless::Vec::from_slice(bytes)
            .map(Self)
            .map_err(|_| DecodeError::InvalidTokenLength(bytes.len()))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OptionValue(heapless::Vec<u8, MAX_OPTION_VALUE_LEN>);

impl OptionValue {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        heapless::Vec::from_slice(bytes)
            .map(Self)
            .map_err(|_| DecodeError::MalformedOption)
    }

    /// Minimal big-endian encoding of a `uint` option, so zero becomes the empty value.
    pub fn from_uint(value: u32) -> Self {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        Self(heapless::Vec::from_slice(&bytes[skip..]).unwrap_or_default())
    }

    pub fn as_uint(&self) -> Option<u32> {
        if self.0.len() > 4 {
            return None;
        }
        Some(self.0.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
    }

    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.0).ok()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&str> for OptionValue {
    type Error = DecodeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_slice(value.as_bytes())
    }
}

/// Options sorted by ascending option number.  Repeated options (Uri-Path, Accept, ...) keep
/// their insertion order within the same number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageOptions {
    entries: Vec<(u16, OptionValue)>,
}

impl MessageOptions {
    pub fn insert(&mut self, number: u16, value: OptionValue) {
        let at = self.entries.partition_point(|(n, _)| *n <= number);
        self.entries.insert(at, (number, value));
    }

    /// Replaces every existing value for `number` with `value`.
    pub fn set(&mut self, number: u16, value: OptionValue) {
        self.remove(number);
        self.insert(number, value);
    }

    pub fn remove(&mut self, number: u16) {
        self.entries.retain(|(n, _)| *n != number);
    }

    pub fn get(&self, number: u16) -> Option<&OptionValue> {
        self.get_all(number).next()
    }

    pub fn get_all(&self, number: u16) -> impl Iterator<Item = &OptionValue> + '_ {
        self.entries
            .iter()
            .filter(move |(n, _)| *n == number)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &OptionValue)> + '_ {
        self.entries.iter().map(|(n, value)| (*n, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub msg_type: MessageType,
    pub code: MessageClass,
    pub message_id: MessageId,
    pub token: Token,
    pub options: MessageOptions,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(msg_type: MessageType, code: MessageClass, message_id: MessageId) -> Self {
        Self {
            msg_type,
            code,
            message_id,
            token: Token::default(),
            options: MessageOptions::default(),
            payload: Vec::new(),
        }
    }

    pub fn empty(msg_type: MessageType, message_id: MessageId) -> Self {
        Self::new(msg_type, MessageClass::Empty, message_id)
    }

    pub fn method(&self) -> Option<RequestType> {
        match self.code {
            MessageClass::Request(method) => Some(method),
            _ => None,
        }
    }

    pub fn add_option(&mut self, option: CoapOption, value: OptionValue) {
        self.options.insert(u16::from(option), value);
    }

    pub fn set_uint_option(&mut self, option: CoapOption, value: u32) {
        self.options.set(u16::from(option), OptionValue::from_uint(value));
    }

    pub fn uint_option(&self, option: CoapOption) -> Option<u32> {
        self.options.get(u16::from(option)).and_then(OptionValue::as_uint)
    }

    pub fn observe(&self) -> Option<u32> {
        self.uint_option(CoapOption::Observe)
    }

    pub fn set_observe(&mut self, sequence: u24) {
        self.set_uint_option(CoapOption::Observe, u32::from(sequence));
    }

    pub fn max_age(&self) -> Option<u32> {
        self.uint_option(CoapOption::MaxAge)
    }

    pub fn set_max_age(&mut self, seconds: u32) {
        self.set_uint_option(CoapOption::MaxAge, seconds);
    }

    pub fn content_format(&self) -> Option<u16> {
        self.uint_option(CoapOption::ContentFormat)
            .and_then(|n| u16::try_from(n).ok())
    }

    pub fn set_content_format(&mut self, content_type: ContentType) {
        self.set_uint_option(CoapOption::ContentFormat, u32::from(content_type.number()));
    }

    /// Every Accept option in the order the peer sent them.
    pub fn accept(&self) -> impl Iterator<Item = u16> + '_ {
        self.options
            .get_all(u16::from(CoapOption::Accept))
            .filter_map(OptionValue::as_uint)
            .filter_map(|n| u16::try_from(n).ok())
    }

    pub fn uri_path(&self) -> Result<Vec<String>, CoapError> {
        self.options
            .get_all(u16::from(CoapOption::UriPath))
            .map(|segment| {
                segment
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CoapError::bad_request("Uri-Path is not UTF-8"))
            })
            .collect()
    }

    /// Sets Uri-Path options from a `/`-separated path, dropping empty segments.
    pub fn set_uri_path(&mut self, path: &str) -> Result<(), DecodeError> {
        let number = u16::from(CoapOption::UriPath);
        self.options.remove(number);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.options.insert(number, OptionValue::try_from(segment)?);
        }
        Ok(())
    }

    /// `key=value` pairs from Uri-Query.  Segments without `=` or that aren't UTF-8 are skipped.
    pub fn uri_queries(&self) -> HashMap<String, String> {
        self.options
            .get_all(u16::from(CoapOption::UriQuery))
            .filter_map(OptionValue::as_str)
            .filter_map(|query| query.split_once('='))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }
}
