use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use coap_lite::MessageType;
use log::{debug, warn};
use rand::Rng;
use tokio::time::Instant;

use crate::app::message::MessageId;
use crate::transport::{Completion, TransmissionOutcome};

/// Applies appropriate ack timeouts and retry policies for Confirmable messages that are
/// sent through it.  Time is supplied by the caller, so the manager itself never sleeps.
pub struct RetransmissionManager<Endpoint: Debug + Clone + Eq + Hash> {
    unacknowledged_messages: HashMap<MessageKey<Endpoint>, PendingMessage>,
    parameters: TransmissionParameters,
}

#[derive(Debug, Clone, Copy)]
pub struct TransmissionParameters {
    ack_timeout: Duration,
    ack_random_factor: f32,
    max_retransmit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Hash)]
struct MessageKey<Endpoint: Debug + Clone + Eq + Hash> {
    message_id: MessageId,
    peer: Endpoint,
}

#[derive(Debug)]
struct PendingMessage {
    datagram: Bytes,
    retransmits: usize,
    timeout: Duration,
    deadline: Instant,
}

/// Result of [`RetransmissionManager::poll_expired`].
#[derive(Debug)]
pub struct Expired<Endpoint> {
    pub retransmit: Vec<(Bytes, Endpoint)>,
    pub completions: Vec<Completion<Endpoint>>,
}

impl<Endpoint: Debug + Clone + Eq + Hash> RetransmissionManager<Endpoint> {
    pub fn new(parameters: TransmissionParameters) -> Self {
        Self {
            unacknowledged_messages: Default::default(),
            parameters,
        }
    }

    /// Starts tracking a Confirmable datagram the caller has just put on the wire.
    pub fn send_reliably(
        &mut self,
        datagram: Bytes,
        peer: Endpoint,
        message_id: MessageId,
        now: Instant,
    ) {
        let timeout = rand::thread_rng().gen_range(self.parameters.ack_timeout_range());
        let key = MessageKey { message_id, peer };
        let pending = PendingMessage {
            datagram,
            retransmits: 0,
            timeout,
            deadline: now + timeout,
        };
        if self
            .unacknowledged_messages
            .insert(key.clone(), pending)
            .is_some()
        {
            warn!("Re-used message key {key:?} by another send!");
        }
    }

    /// Attempts to handle either the Acknowledgement or Reset message that we expect as a reply
    /// to our Confirmable message send attempts.  Returns `None` if the reply doesn't match
    /// anything in flight.
    pub fn maybe_handle_reply(
        &mut self,
        msg_type: MessageType,
        message_id: MessageId,
        peer: &Endpoint,
    ) -> Option<Completion<Endpoint>> {
        let outcome = match msg_type {
            MessageType::Acknowledgement => TransmissionOutcome::Acked,
            MessageType::Reset => TransmissionOutcome::ResetByPeer,
            _ => return None,
        };
        let key = MessageKey {
            message_id,
            peer: peer.clone(),
        };
        self.unacknowledged_messages
            .remove(&key)
            .map(|_| Completion {
                message_id,
                peer: key.peer,
                outcome,
            })
    }

    /// Doubles the timeout of every message whose deadline has passed and hands it back for
    /// retransmission, or gives up once `max_retransmit` retransmissions went unanswered.
    pub fn poll_expired(&mut self, now: Instant) -> Expired<Endpoint> {
        let mut retransmit = Vec::new();
        let mut given_up = Vec::new();
        for (key, pending) in self.unacknowledged_messages.iter_mut() {
            if pending.deadline > now {
                continue;
            }
            if pending.retransmits >= self.parameters.max_retransmit {
                given_up.push(key.clone());
                continue;
            }
            pending.retransmits += 1;
            pending.timeout *= 2;
            pending.deadline = now + pending.timeout;
            let retransmits = pending.retransmits;
            let message_id = key.message_id;
            let peer = &key.peer;
            debug!("Attempting retransmission #{retransmits} of message ID {message_id} to {peer:?}");
            retransmit.push((pending.datagram.clone(), key.peer.clone()));
        }

        let completions = given_up
            .into_iter()
            .map(|key| {
                self.unacknowledged_messages.remove(&key);
                let attempts = self.parameters.max_retransmit + 1;
                debug!(
                    "No remote reply after {attempts} attempts for message ID {} to {:?}",
                    key.message_id, key.peer
                );
                Completion {
                    message_id: key.message_id,
                    peer: key.peer,
                    outcome: TransmissionOutcome::TimedOut,
                }
            })
            .collect();

        Expired {
            retransmit,
            completions,
        }
    }

    pub fn len(&self) -> usize {
        self.unacknowledged_messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unacknowledged_messages.is_empty()
    }
}

/// Default values come from the
/// [CoAP RFC](https://datatracker.ietf.org/doc/html/rfc7252#section-4.8.2).
impl Default for TransmissionParameters {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_retransmit: 4,
        }
    }
}

impl TransmissionParameters {
    pub fn new(
        ack_timeout: Duration,
        ack_random_factor: f32,
        max_retransmit: usize,
    ) -> anyhow::Result<Self> {
        if ack_random_factor < 1.0 {
            return Err(anyhow!("Invalid ack_random_factor={ack_random_factor}"));
        }
        if ack_timeout.is_zero() {
            return Err(anyhow!("Invalid ack_timeout={ack_timeout:?}"));
        }
        Ok(Self {
            ack_timeout,
            ack_random_factor,
            max_retransmit,
        })
    }

    pub fn ack_timeout_range(&self) -> RangeInclusive<Duration> {
        let timeout_low = self.ack_timeout;
        if self.ack_random_factor != 1.0 {
            let timeout_high = timeout_low.mul_f32(self.ack_random_factor);
            timeout_low..=timeout_high
        } else {
            timeout_low..=timeout_low
        }
    }
}
