use std::collections::HashMap;

use log::warn;

use crate::app::content_type::ContentType;
use crate::app::core_link::{CoreLink, DiscoverableResource};
use crate::app::error::CoapError;
use crate::app::handler::{ResourceEvent, ResourceHandler, ResourceReply};
use crate::app::permissions::Permissions;
use crate::app::resource_builder::ResourceBuilder;
use crate::app::resource_tree::{ResourceHandle, ResourceTree, TreeError};

pub const WELL_KNOWN: &str = ".well-known";
pub const CORE: &str = "core";

/// Serves `/.well-known/core` from a document rendered once, when the tree is frozen.
pub struct CoreRequestHandler {
    resources: Vec<DiscoverableResource>,
    document: String,
}

impl CoreRequestHandler {
    pub(crate) fn new(resources: Vec<DiscoverableResource>) -> Self {
        let document = resources
            .iter()
            .map(|r| r.link_str.as_str())
            .collect::<Vec<_>>()
            .join(",");
        Self {
            resources,
            document,
        }
    }

    fn render(&self, queries: &HashMap<String, String>) -> String {
        if queries.is_empty() {
            return self.document.clone();
        }
        self.resources
            .iter()
            .filter(|&r| filter_by_query(r, queries))
            .map(|r| r.link_str.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<Endpoint> ResourceHandler<Endpoint> for CoreRequestHandler {
    fn on_event(&mut self, event: ResourceEvent<'_, Endpoint>) -> Result<ResourceReply, CoapError> {
        match event {
            ResourceEvent::Read { query, .. } => {
                Ok(ResourceReply::Content(self.render(query).into_bytes()))
            }
            ResourceEvent::Write { .. } => Err(CoapError::method_not_allowed()),
            ResourceEvent::NotificationCompleted { .. } => Ok(ResourceReply::Done),
        }
    }
}

/// Snapshots every discoverable resource and mounts the result at `/.well-known/core`.
pub(crate) fn install<Endpoint>(
    tree: &mut ResourceTree<Endpoint>,
) -> Result<ResourceHandle, TreeError> {
    let resources = tree
        .walk()
        .into_iter()
        .filter_map(|handle| CoreLink::for_resource(tree, handle))
        .filter_map(|link| match DiscoverableResource::try_from(link) {
            Ok(resource) => Some(resource),
            Err(e) => {
                warn!("Unable to format link: {e}");
                None
            }
        })
        .collect();

    let root = tree.root();
    let well_known = match tree.lookup(&[WELL_KNOWN]) {
        Some(handle) => handle,
        None => {
            let handle = tree.create(ResourceBuilder::new(WELL_KNOWN).not_discoverable());
            tree.add_child(root, handle)?;
            handle
        }
    };
    let core = tree.create(
        ResourceBuilder::new(CORE)
            .permissions(Permissions::GET)
            .content_types(ContentType::LinkFormat)
            .not_discoverable()
            .handler(CoreRequestHandler::new(resources)),
    );
    tree.add_child(well_known, core)?;
    Ok(core)
}

fn filter_by_query(resource: &DiscoverableResource, queries: &HashMap<String, String>) -> bool {
    for (key, value) in queries {
        if Some(value) != resource.attributes_as_string.get(key.as_str()) {
            return false;
        }
    }
    true
}
