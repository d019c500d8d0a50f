//! Request routing: every decoded message ends up here.

use std::fmt::Debug;
use std::hash::Hash;

use coap_lite::{MessageClass, MessageType, RequestType, ResponseType};
use log::{debug, error, warn};

use crate::app::codec;
use crate::app::content_type::{ContentType, ContentTypeMask};
use crate::app::context::CoapContext;
use crate::app::error::CoapError;
use crate::app::handler::{ResourceEvent, ResourceReply};
use crate::app::message::{Message, OBSERVE_DEREGISTER, OBSERVE_REGISTER};
use crate::app::request::{self, Request};
use crate::app::resource_tree::ResourceHandle;
use crate::app::scheduler::Delivery;
use crate::transport::Transmitter;

/// Picks the response representation: the first Accept option the resource supports, else
/// the request's own Content-Format, else the resource's preferred type.
pub fn negotiate(request: &Message, supported: ContentTypeMask) -> Result<ContentType, CoapError> {
    let accepted: Vec<u16> = request.accept().collect();
    let selected = if !accepted.is_empty() {
        supported.select(accepted)
    } else if let Some(content_format) = request.content_format() {
        supported.select([content_format])
    } else {
        supported.preferred()
    };
    selected.ok_or_else(CoapError::content_negotiation_failed)
}

struct Handled {
    response: Message,
    notify: Option<ResourceHandle>,
}

impl Handled {
    fn respond(response: Message) -> Self {
        Self {
            response,
            notify: None,
        }
    }
}

impl<Endpoint: Debug + Clone + Eq + Hash + 'static> CoapContext<Endpoint> {
    pub fn handle_message<T: Transmitter<Endpoint>>(
        &mut self,
        message: Message,
        peer: Endpoint,
        tx: &mut T,
    ) {
        match message.code {
            MessageClass::Request(method) => self.handle_request(method, message, peer, tx),
            MessageClass::Response(_) => {
                warn!("Spurious response message from {peer:?}, ignoring...");
            }
            MessageClass::Empty => match message.msg_type {
                MessageType::Confirmable => {
                    let pong = request::new_pong_message(&message);
                    self.send_response(&pong, &peer, tx);
                }
                MessageType::NonConfirmable => {
                    debug!("Ignoring Non-Confirmable Empty message from {peer:?}");
                }
                t @ (MessageType::Acknowledgement | MessageType::Reset) => {
                    debug!(
                        "Got unexpected {t:?} for message ID {} from {peer:?}",
                        message.message_id
                    );
                }
            },
            code => warn!("Unhandled message code {code:?} from {peer:?}, ignoring..."),
        }
    }

    fn handle_request<T: Transmitter<Endpoint>>(
        &mut self,
        method: RequestType,
        message: Message,
        peer: Endpoint,
        tx: &mut T,
    ) {
        if !matches!(
            message.msg_type,
            MessageType::Confirmable | MessageType::NonConfirmable
        ) {
            warn!(
                "Ignoring request with type {:?} from {peer:?}",
                message.msg_type
            );
            return;
        }
        let request = Request::new(message, peer);
        let handled = match self.route(method, &request) {
            Ok(handled) => handled,
            Err(e) => {
                debug!("Request from {:?} failed: {e}", request.peer);
                Handled::respond(request.error_response(e))
            }
        };
        self.send_response(&handled.response, &request.peer, tx);
        if let Some(resource) = handled.notify {
            self.notification_pass(resource, Delivery::NonConfirmable, tx);
        }
    }

    fn route(&mut self, method: RequestType, request: &Request<Endpoint>) -> Result<Handled, CoapError> {
        let path = request.message.uri_path()?;
        if log::log_enabled!(log::Level::Debug) {
            let peer = &request.peer;
            debug!("Received from [{peer:?}]: {method:?} /{}", path.join("/"));
        }
        let resource = self.tree.lookup(path.as_slice()).ok_or_else(CoapError::not_found)?;
        let permissions = self
            .tree
            .get(resource)
            .map(|r| r.permissions())
            .unwrap_or_default();
        if !permissions.allows(method) {
            return Err(CoapError::permission_denied());
        }
        match method {
            RequestType::Get => self.handle_get(resource, request).map(Handled::respond),
            _ => self.handle_write(method, resource, request),
        }
    }

    fn handle_get(
        &mut self,
        resource: ResourceHandle,
        request: &Request<Endpoint>,
    ) -> Result<Message, CoapError> {
        let (supported, max_age, observable) = {
            let r = self.tree.get(resource).ok_or_else(CoapError::not_found)?;
            (r.content_types(), r.max_age(), r.is_observable())
        };
        let content_type = negotiate(&request.message, supported)?;
        let payload = self.render(resource, content_type, &request.message.uri_queries())?;

        let mut response = request.new_response();
        match request.message.observe() {
            Some(OBSERVE_REGISTER) if observable => {
                match self.observers.register(
                    resource,
                    request.peer.clone(),
                    request.message.token.clone(),
                    content_type,
                ) {
                    Ok(_) => {
                        response.set_observe(self.sequence.next());
                        response.set_max_age(max_age);
                        debug!(
                            "Registered observer {:?} of {}",
                            request.peer,
                            self.tree.path_of(resource)
                        );
                    }
                    Err(full) => {
                        self.stats.registrations_rejected += 1;
                        warn!("{full}, answering {:?} without Observe", request.peer);
                    }
                }
            }
            Some(OBSERVE_DEREGISTER) if observable => {
                if let Some(handle) = self.observers.search(&request.peer, resource) {
                    self.observers.unregister(handle);
                    debug!(
                        "Deregistered observer {:?} of {}",
                        request.peer,
                        self.tree.path_of(resource)
                    );
                }
            }
            _ => {}
        }
        response.set_content_format(content_type);
        response.payload = payload;
        Ok(response)
    }

    fn handle_write(
        &mut self,
        method: RequestType,
        resource: ResourceHandle,
        request: &Request<Endpoint>,
    ) -> Result<Handled, CoapError> {
        let (observable, handler) = match self.tree.get_mut(resource) {
            Some(r) => (r.is_observable(), r.handler_mut()),
            None => return Err(CoapError::not_found()),
        };
        let handler = handler.ok_or_else(CoapError::method_not_allowed)?;
        let reply = handler.on_event(ResourceEvent::Write {
            method,
            payload: &request.message.payload,
            peer: &request.peer,
        })?;

        let (code, notify, payload) = match reply {
            ResourceReply::Changed { notify } => (ResponseType::Changed, notify, Vec::new()),
            ResourceReply::Created => (ResponseType::Created, false, Vec::new()),
            ResourceReply::Deleted => (ResponseType::Deleted, false, Vec::new()),
            ResourceReply::Done => (ResponseType::Changed, false, Vec::new()),
            ResourceReply::Content(payload) => (ResponseType::Changed, false, payload),
        };
        let mut response = request.response_with_code(code);
        response.payload = payload;
        Ok(Handled {
            response,
            notify: (notify && observable).then_some(resource),
        })
    }

    /// Encodes and sends `response`, falling back to a bare 5.00 when it doesn't fit.
    pub(crate) fn send_response<T: Transmitter<Endpoint>>(
        &mut self,
        response: &Message,
        peer: &Endpoint,
        tx: &mut T,
    ) {
        let budget = self.config.max_datagram_size;
        let datagram = match codec::encode(response, budget) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!("Unable to encode response to {peer:?}: {e}");
                match codec::encode(&request::degraded_response(response), budget) {
                    Ok(datagram) => datagram,
                    Err(e) => {
                        error!("Unable to encode fallback response to {peer:?}: {e}");
                        return;
                    }
                }
            }
        };
        if let Err(e) = tx.send(peer, datagram) {
            warn!("Error sending response to {peer:?}: {e}");
        }
    }
}
