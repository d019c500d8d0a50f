use std::collections::HashMap;

use coap_lite::RequestType;

use crate::app::content_type::ContentType;
use crate::app::error::CoapError;
use crate::transport::TransmissionOutcome;

/// What the engine asks of a resource's application handler.
#[derive(Debug)]
pub enum ResourceEvent<'a, Endpoint> {
    /// Produce the current representation, for a GET response or a notification.  `query` is
    /// empty for notifications.
    Read {
        content_type: ContentType,
        query: &'a HashMap<String, String>,
    },

    /// Apply a PUT, POST or DELETE.
    Write {
        method: RequestType,
        payload: &'a [u8],
        peer: &'a Endpoint,
    },

    /// A confirmable notification sent from this resource has finished one way or another.
    NotificationCompleted {
        peer: &'a Endpoint,
        outcome: TransmissionOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceReply {
    Content(Vec<u8>),

    /// State was updated.  When `notify` is set, observers get an immediate notification
    /// after the response is sent.
    Changed {
        notify: bool,
    },

    Created,
    Deleted,

    /// Acknowledges an event that needs no payload.
    Done,
}

/// Application logic attached to a resource.  Handlers run synchronously on the engine's
/// thread; an `Err` becomes the error response for the request being served.
pub trait ResourceHandler<Endpoint>: Send + 'static {
    fn on_event(&mut self, event: ResourceEvent<'_, Endpoint>) -> Result<ResourceReply, CoapError>;
}
