use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use coap_lite::{MessageClass, MessageType, RequestType};

use crate::app::codec;
use crate::app::content_type::ContentType;
use crate::app::context::CoapContext;
use crate::app::error::CoapError;
use crate::app::handler::{ResourceEvent, ResourceHandler, ResourceReply};
use crate::app::message::{Message, MessageId, Token};
use crate::app::permissions::Permissions;
use crate::app::resource_builder::ResourceBuilder;
use crate::app::resource_tree::{ResourceHandle, ResourceTree};
use crate::app::AppBuilder;
use crate::transport::{Completion, TransmissionOutcome, Transmitter, TransportError};

pub const COMMAND_OFF: u8 = 0x30;
pub const COMMAND_ON: u8 = 0x31;
pub const COMMAND_TOGGLE: u8 = 0x32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestEndpoint(pub u32);

/// Single LED accepting the `0`/`1`/`2` (off/on/toggle) command bytes.
#[derive(Debug, Default, Clone)]
pub struct TestLed {
    pub state: Arc<AtomicBool>,
}

impl<Endpoint> ResourceHandler<Endpoint> for TestLed {
    fn on_event(&mut self, event: ResourceEvent<'_, Endpoint>) -> Result<ResourceReply, CoapError> {
        match event {
            ResourceEvent::Read { content_type, .. } => {
                let on = self.state.load(Ordering::SeqCst);
                let payload = match content_type {
                    ContentType::Json => format!("{{\"led3\": {on}}}"),
                    _ => String::from(if on { "1" } else { "0" }),
                };
                Ok(ResourceReply::Content(payload.into_bytes()))
            }
            ResourceEvent::Write { payload, .. } => {
                match payload {
                    [COMMAND_OFF] => self.state.store(false, Ordering::SeqCst),
                    [COMMAND_ON] => self.state.store(true, Ordering::SeqCst),
                    [COMMAND_TOGGLE] => {
                        self.state.fetch_xor(true, Ordering::SeqCst);
                    }
                    _ => return Err(CoapError::bad_request("Unknown command")),
                }
                Ok(ResourceReply::Changed { notify: true })
            }
            ResourceEvent::NotificationCompleted { .. } => Ok(ResourceReply::Done),
        }
    }
}

/// `/lights/led3` as a GET/PUT/OBSERVE resource with a 15 second Max-Age.
pub fn led_context(
    observer_capacity: usize,
) -> (CoapContext<TestEndpoint>, ResourceHandle, Arc<AtomicBool>) {
    let led = TestLed::default();
    let state = led.state.clone();
    let mut tree = ResourceTree::new();
    let lights = tree.create(ResourceBuilder::new("lights"));
    let led3 = tree.create(
        ResourceBuilder::new("led3")
            .permissions(Permissions::GET | Permissions::PUT | Permissions::OBSERVE)
            .content_types(ContentType::Json | ContentType::TextPlain)
            .max_age(15)
            .handler(led),
    );
    let root = tree.root();
    tree.add_child(root, lights).unwrap();
    tree.add_child(lights, led3).unwrap();
    let context = AppBuilder::new()
        .observer_capacity(observer_capacity)
        .build(tree)
        .unwrap();
    (context, led3, state)
}

pub fn request(msg_type: MessageType, method: RequestType, path: &str, token: u8) -> Message {
    let mut message = Message::new(msg_type, MessageClass::Request(method), 0x100 + u16::from(token));
    message.token = Token::from_slice(&[token]).unwrap();
    message.set_uri_path(path).unwrap();
    message
}

#[derive(Debug)]
pub struct Sent<Endpoint> {
    pub peer: Endpoint,
    pub message: Message,
    pub confirmable: bool,
}

/// Decodes and records every datagram.  Completions can be queued by hand or generated on
/// send for selected peers.
pub struct RecordingTransmitter<Endpoint> {
    pub sent: Vec<Sent<Endpoint>>,
    pub completions: VecDeque<Completion<Endpoint>>,
    pub failing_peers: Vec<Endpoint>,
    pub reset_on_confirmable: Vec<Endpoint>,
}

impl<Endpoint: Clone + PartialEq> RecordingTransmitter<Endpoint> {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            completions: VecDeque::new(),
            failing_peers: Vec::new(),
            reset_on_confirmable: Vec::new(),
        }
    }

    pub fn take(&mut self) -> Vec<Sent<Endpoint>> {
        std::mem::take(&mut self.sent)
    }

    pub fn complete(&mut self, message_id: MessageId, peer: Endpoint, outcome: TransmissionOutcome) {
        self.completions.push_back(Completion {
            message_id,
            peer,
            outcome,
        });
    }

    fn record(
        &mut self,
        peer: &Endpoint,
        datagram: Bytes,
        confirmable: bool,
    ) -> Result<(), TransportError> {
        if self.failing_peers.contains(peer) {
            return Err(TransportError::Unspecified("unreachable".to_string()));
        }
        let message = codec::decode(&datagram)
            .map_err(|e| TransportError::Unspecified(e.to_string()))?;
        self.sent.push(Sent {
            peer: peer.clone(),
            message,
            confirmable,
        });
        Ok(())
    }
}

impl<Endpoint: Clone + PartialEq> Transmitter<Endpoint> for RecordingTransmitter<Endpoint> {
    fn send(&mut self, peer: &Endpoint, datagram: Bytes) -> Result<(), TransportError> {
        self.record(peer, datagram, false)
    }

    fn send_confirmable(
        &mut self,
        peer: &Endpoint,
        datagram: Bytes,
        message_id: MessageId,
    ) -> Result<(), TransportError> {
        self.record(peer, datagram, true)?;
        if self.reset_on_confirmable.contains(peer) {
            self.complete(message_id, peer.clone(), TransmissionOutcome::ResetByPeer);
        }
        Ok(())
    }

    fn poll_completion(&mut self) -> Option<Completion<Endpoint>> {
        self.completions.pop_front()
    }
}
