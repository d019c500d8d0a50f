use coap_lite::link_format::LINK_ATTR_OBSERVABLE;

use crate::app::content_type::{ContentType, ContentTypeMask};
use crate::app::core_link::LinkAttributeValue;
use crate::app::handler::ResourceHandler;
use crate::app::permissions::Permissions;

/// CoAP's default Max-Age (RFC 7252 §5.10.5).
pub const DEFAULT_MAX_AGE: u32 = 60;

/// Configure a single node of the resource tree.  Nodes without a handler are pure path
/// segments (`lights` in `/lights/led3`).
pub struct ResourceBuilder<Endpoint> {
    pub(crate) name: String,
    pub(crate) permissions: Permissions,
    pub(crate) content_types: ContentTypeMask,
    pub(crate) max_age: u32,
    pub(crate) discoverable: Option<bool>,
    pub(crate) attributes: Vec<(&'static str, LinkAttributeValue)>,
    pub(crate) handler: Option<Box<dyn ResourceHandler<Endpoint>>>,
}

impl<Endpoint> ResourceBuilder<Endpoint> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            permissions: Permissions::NONE,
            content_types: ContentType::TextPlain.into(),
            max_age: DEFAULT_MAX_AGE,
            discoverable: None,
            attributes: Vec::new(),
            handler: None,
        }
    }

    pub fn permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Grants [`Permissions::OBSERVE`] in addition to whatever was already set.
    ///
    /// For more information, see [RFC 7641](https://datatracker.ietf.org/doc/html/rfc7641)
    pub fn observable(mut self) -> Self {
        self.permissions |= Permissions::OBSERVE;
        self
    }

    /// Representations the handler can produce.  Defaults to `text/plain`.
    pub fn content_types(mut self, content_types: impl Into<ContentTypeMask>) -> Self {
        self.content_types = content_types.into();
        self
    }

    /// Freshness lifetime in seconds.  Also the notification period for observable resources;
    /// zero disables periodic notifications.
    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = seconds;
        self
    }

    pub fn handler(mut self, handler: impl ResourceHandler<Endpoint>) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// See [`crate::app::AppBuilder::not_discoverable`].
    pub fn not_discoverable(mut self) -> Self {
        self.discoverable = Some(false);
        self
    }

    pub fn discoverable(mut self) -> Self {
        self.discoverable = Some(true);
        self
    }

    /// Add a new attribute to the CoRE Link response, assuming that this resource will be
    /// discoverable.  `ct` and `obs` are derived from the resource itself and need not be set
    /// here.  For more information, see
    /// [RFC 6690](https://datatracker.ietf.org/doc/html/rfc6690)
    pub fn link_attr(
        mut self,
        attr_name: &'static str,
        value: impl Into<LinkAttributeValue>,
    ) -> Self {
        if attr_name != LINK_ATTR_OBSERVABLE {
            self.attributes.push((attr_name, value.into()));
        }
        self
    }
}
