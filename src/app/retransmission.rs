//! Bookkeeping for confirmable notifications awaiting an outcome from the transport.

use std::collections::HashMap;
use std::hash::Hash;

use crate::app::message::MessageId;
use crate::app::observers::ObserverHandle;
use crate::app::resource_tree::ResourceHandle;

/// What to act on once a confirmable notification completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedNotification {
    pub observer: ObserverHandle,
    pub resource: ResourceHandle,
}

#[derive(Debug)]
pub struct RetransmissionTracker<Endpoint> {
    in_flight: HashMap<(MessageId, Endpoint), TrackedNotification>,
}

impl<Endpoint> Default for RetransmissionTracker<Endpoint> {
    fn default() -> Self {
        Self {
            in_flight: HashMap::new(),
        }
    }
}

impl<Endpoint: Clone + Eq + Hash> RetransmissionTracker<Endpoint> {
    /// Returns the entry previously tracked under the same key, if any.
    pub fn track(
        &mut self,
        message_id: MessageId,
        peer: Endpoint,
        notification: TrackedNotification,
    ) -> Option<TrackedNotification> {
        self.in_flight.insert((message_id, peer), notification)
    }

    pub fn complete(
        &mut self,
        message_id: MessageId,
        peer: &Endpoint,
    ) -> Option<TrackedNotification> {
        self.in_flight.remove(&(message_id, peer.clone()))
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}
