//! The engine: a resource tree plus everything needed to serve and observe it.
//!
//! All entry points take `&mut self` and run to completion, so the context can be driven by any
//! single-threaded loop.  [`crate::server::CoapServer`] is the tokio one.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use coap_lite::{MessageClass, ResponseType};
use log::{debug, trace, warn};
use rand::Rng;
use thiserror::Error;

use crate::app::app_builder::Config;
use crate::app::codec::{self, DecodeError};
use crate::app::content_type::ContentType;
use crate::app::error::CoapError;
use crate::app::handler::{ResourceEvent, ResourceReply};
use crate::app::message::{Message, MessageId};
use crate::app::observers::{ObserverHandle, ObserverRegistry};
use crate::app::resource_tree::{ResourceHandle, ResourceTree};
use crate::app::retransmission::{RetransmissionTracker, TrackedNotification};
use crate::app::scheduler::{Delivery, NotificationScheduler};
use crate::app::u24::{u24, SequenceCounter};
use crate::transport::{Completion, TransmissionOutcome, Transmitter, TransportError};

/// Running totals, mostly useful to tests and diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ContextStats {
    pub datagrams_dropped: u64,
    pub notifications_sent: u64,
    pub notification_failures: u64,
    pub observers_cancelled: u64,
    pub registrations_rejected: u64,
}

#[derive(Debug, Error)]
enum NotifyError {
    #[error("observer vanished")]
    Gone,

    #[error(transparent)]
    Render(#[from] CoapError),

    #[error(transparent)]
    Encode(#[from] DecodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct CoapContext<Endpoint> {
    pub(crate) config: Config,
    pub(crate) tree: ResourceTree<Endpoint>,
    pub(crate) observers: ObserverRegistry<Endpoint>,
    pub(crate) scheduler: NotificationScheduler,
    pub(crate) tracker: RetransmissionTracker<Endpoint>,
    pub(crate) sequence: SequenceCounter,
    pub(crate) next_message_id: MessageId,
    pub(crate) stats: ContextStats,
}

impl<Endpoint: Debug + Clone + Eq + Hash + 'static> CoapContext<Endpoint> {
    pub(crate) fn new(config: Config, tree: ResourceTree<Endpoint>) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            observers: ObserverRegistry::with_capacity(config.observer_capacity),
            scheduler: NotificationScheduler::new(
                config.notify_low_water_mark,
                config.confirmable_every,
            ),
            tracker: RetransmissionTracker::default(),
            sequence: SequenceCounter::new(u24::from_le_bytes(rng.gen())),
            next_message_id: rng.gen(),
            stats: ContextStats::default(),
            config,
            tree,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tree(&self) -> &ResourceTree<Endpoint> {
        &self.tree
    }

    pub fn observers(&self) -> &ObserverRegistry<Endpoint> {
        &self.observers
    }

    pub fn stats(&self) -> ContextStats {
        self.stats
    }

    /// Observe value most recently put on the wire.
    pub fn sequence(&self) -> u24 {
        self.sequence.current()
    }

    /// Confirmable notifications still waiting for an outcome.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Shrinks the datagram budget to fit a link MTU.
    pub(crate) fn limit_datagram_size(&mut self, mtu: usize) {
        if mtu < self.config.max_datagram_size {
            debug!(
                "Limiting datagram size from {} to link MTU {mtu}",
                self.config.max_datagram_size
            );
            self.config.max_datagram_size = mtu;
        }
    }

    /// Entry point for every inbound datagram.  Undecodable input is dropped without reply.
    pub fn handle_datagram<T: Transmitter<Endpoint>>(
        &mut self,
        datagram: &[u8],
        peer: Endpoint,
        tx: &mut T,
    ) {
        match codec::decode(datagram) {
            Ok(message) => self.handle_message(message, peer, tx),
            Err(e) => {
                self.stats.datagrams_dropped += 1;
                debug!("Dropping malformed datagram from {peer:?}: {e}");
            }
        }
    }

    /// One scheduler period has elapsed.
    pub fn tick<T: Transmitter<Endpoint>>(&mut self, tx: &mut T) {
        self.process_completions(tx);
        for pass in self.scheduler.tick(&mut self.tree) {
            self.notification_pass(pass.resource, pass.delivery, tx);
        }
    }

    /// Immediately notifies every observer of `resource` with a non-confirmable message, for
    /// state changes that didn't come through a request (a button press, a sensor edge).
    /// Returns false if `resource` doesn't exist or isn't observable.
    pub fn notify_now<T: Transmitter<Endpoint>>(
        &mut self,
        resource: ResourceHandle,
        tx: &mut T,
    ) -> bool {
        match self.tree.get(resource) {
            Some(r) if r.is_observable() => {}
            _ => {
                warn!("Ignoring change notification for unobservable resource {resource:?}");
                return false;
            }
        }
        self.notification_pass(resource, Delivery::NonConfirmable, tx);
        true
    }

    /// Drains completions the transmitter has ready.
    pub fn process_completions<T: Transmitter<Endpoint>>(&mut self, tx: &mut T) {
        while let Some(completion) = tx.poll_completion() {
            self.handle_completion(completion);
        }
    }

    /// Applies the final outcome of a confirmable notification: failures cancel the
    /// observation, and the resource's handler is told either way.
    pub fn handle_completion(&mut self, completion: Completion<Endpoint>) {
        let Completion {
            message_id,
            peer,
            outcome,
        } = completion;
        let tracked = match self.tracker.complete(message_id, &peer) {
            Some(tracked) => tracked,
            None => {
                trace!("Ignoring completion for untracked message ID {message_id} to {peer:?}");
                return;
            }
        };

        match outcome {
            TransmissionOutcome::Acked => {
                trace!("Notification {message_id} acknowledged by {peer:?}");
            }
            TransmissionOutcome::TimedOut | TransmissionOutcome::ResetByPeer => {
                if self.observers.unregister(tracked.observer).is_some() {
                    self.stats.observers_cancelled += 1;
                    let path = self.tree.path_of(tracked.resource);
                    debug!("Cancelled observer {peer:?} of {path} after {outcome:?}");
                }
            }
        }

        if let Some(handler) = self
            .tree
            .get_mut(tracked.resource)
            .and_then(|r| r.handler_mut())
        {
            let event = ResourceEvent::NotificationCompleted {
                peer: &peer,
                outcome,
            };
            if let Err(e) = handler.on_event(event) {
                debug!("Handler rejected completion for {peer:?}: {e}");
            }
        }
    }

    pub(crate) fn next_message_id(&mut self) -> MessageId {
        let message_id = self.next_message_id;
        self.next_message_id = message_id.wrapping_add(1);
        message_id
    }

    /// Current representation of `resource` in `content_type`.
    pub(crate) fn render(
        &mut self,
        resource: ResourceHandle,
        content_type: ContentType,
        query: &HashMap<String, String>,
    ) -> Result<Vec<u8>, CoapError> {
        let handler = self
            .tree
            .get_mut(resource)
            .and_then(|r| r.handler_mut())
            .ok_or_else(CoapError::method_not_allowed)?;
        match handler.on_event(ResourceEvent::Read {
            content_type,
            query,
        })? {
            ResourceReply::Content(payload) => Ok(payload),
            ResourceReply::Done => Ok(Vec::new()),
            other => Err(CoapError::internal(format!(
                "unexpected reply to read: {other:?}"
            ))),
        }
    }

    /// Sends one notification to every observer of `resource`.  A failure for one observer
    /// doesn't stop the pass, and completions reported synchronously by the transmitter are
    /// applied between sends.
    pub(crate) fn notification_pass<T: Transmitter<Endpoint>>(
        &mut self,
        resource: ResourceHandle,
        delivery: Delivery,
        tx: &mut T,
    ) {
        let max_age = match self.tree.get(resource) {
            Some(r) => r.max_age(),
            None => return,
        };
        let no_query = HashMap::new();
        let mut cursor = self.observers.cursor(resource);
        let mut sent = 0usize;
        while let Some(handle) = cursor.advance(&self.observers) {
            match self.notify_observer(handle, resource, max_age, delivery, &no_query, tx) {
                Ok(()) => {
                    sent += 1;
                    self.stats.notifications_sent += 1;
                }
                Err(e) => {
                    self.stats.notification_failures += 1;
                    warn!("Failed to notify observer {handle:?}: {e}");
                }
            }
            self.process_completions(tx);
        }
        if sent > 0 {
            debug!(
                "Notified {sent} observers of {} ({delivery:?})",
                self.tree.path_of(resource)
            );
        }
    }

    fn notify_observer<T: Transmitter<Endpoint>>(
        &mut self,
        handle: ObserverHandle,
        resource: ResourceHandle,
        max_age: u32,
        delivery: Delivery,
        query: &HashMap<String, String>,
        tx: &mut T,
    ) -> Result<(), NotifyError> {
        let observer = self.observers.get(handle).cloned().ok_or(NotifyError::Gone)?;
        let payload = self.render(resource, observer.content_type, query)?;

        let message_id = self.next_message_id();
        let mut message = Message::new(
            delivery.message_type(),
            MessageClass::Response(ResponseType::Content),
            message_id,
        );
        message.token = observer.token;
        message.set_observe(self.sequence.next());
        message.set_content_format(observer.content_type);
        message.set_max_age(max_age);
        message.payload = payload;
        let datagram = codec::encode(&message, self.config.max_datagram_size)?;

        match delivery {
            Delivery::NonConfirmable => tx.send(&observer.peer, datagram)?,
            Delivery::Confirmable => {
                tx.send_confirmable(&observer.peer, datagram, message_id)?;
                let tracked = TrackedNotification {
                    observer: handle,
                    resource,
                };
                if self
                    .tracker
                    .track(message_id, observer.peer, tracked)
                    .is_some()
                {
                    warn!("Message ID {message_id} re-used while still in flight");
                }
            }
        }
        Ok(())
    }
}
