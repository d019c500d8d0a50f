pub use app_builder::{AppBuilder, BuildError, Config};
pub use content_type::{ContentType, ContentTypeMask};
pub use context::{CoapContext, ContextStats};
pub use error::CoapError;
pub use handler::{ResourceEvent, ResourceHandler, ResourceReply};
pub use message::{Message, MessageId, OptionValue, Token};
pub use observers::{Observer, ObserverHandle, ObserverRegistry, RegistrationFull};
pub use permissions::Permissions;
pub use request::Request;
pub use resource_builder::ResourceBuilder;
pub use resource_tree::{Resource, ResourceHandle, ResourceTree, TreeError};
pub use retransmission_manager::TransmissionParameters;

pub mod app_builder;
pub mod codec;
pub mod content_type;
pub mod context;
mod core_handler;
pub mod core_link;
mod dispatcher;
pub mod error;
pub mod handler;
pub mod message;
pub mod observers;
pub mod permissions;
pub mod request;
pub mod resource_builder;
pub mod resource_tree;
pub mod retransmission;
pub mod retransmission_manager;
pub mod scheduler;
#[cfg(test)]
pub(crate) mod test_util;
pub mod u24;

pub use dispatcher::negotiate;

pub fn new() -> AppBuilder {
    AppBuilder::new()
}

pub fn resource<Endpoint>(name: &str) -> ResourceBuilder<Endpoint> {
    ResourceBuilder::new(name)
}
