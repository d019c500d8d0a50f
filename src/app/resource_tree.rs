//! Statically configured hierarchy of named resources.
//!
//! Nodes live in an arena and refer to each other by [`ResourceHandle`], so observers and
//! scheduled notifications can name a resource without borrowing the tree.

use thiserror::Error;

use crate::app::content_type::ContentTypeMask;
use crate::app::core_link::LinkAttributeValue;
use crate::app::handler::ResourceHandler;
use crate::app::permissions::Permissions;
use crate::app::resource_builder::ResourceBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(usize);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("unknown resource {0:?}")]
    UnknownResource(ResourceHandle),

    #[error("resource {0:?} already has a parent")]
    AlreadyAttached(ResourceHandle),

    #[error("the root cannot be attached to another resource")]
    RootNotAttachable,

    #[error("{parent} already has a child named {name:?}")]
    DuplicateName { parent: String, name: String },

    #[error("attaching {0:?} would create a cycle")]
    Cycle(ResourceHandle),
}

pub struct Resource<Endpoint> {
    name: String,
    parent: Option<ResourceHandle>,
    children: Vec<ResourceHandle>,
    permissions: Permissions,
    content_types: ContentTypeMask,
    max_age: u32,
    countdown: u32,
    discoverable: bool,
    attributes: Vec<(&'static str, LinkAttributeValue)>,
    handler: Option<Box<dyn ResourceHandler<Endpoint>>>,
}

impl<Endpoint> Resource<Endpoint> {
    fn from_builder(builder: ResourceBuilder<Endpoint>) -> Self {
        Self {
            name: builder.name,
            parent: None,
            children: Vec::new(),
            permissions: builder.permissions,
            content_types: builder.content_types,
            max_age: builder.max_age,
            countdown: builder.max_age,
            discoverable: builder.discoverable.unwrap_or(true),
            attributes: builder.attributes,
            handler: builder.handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<ResourceHandle> {
        self.parent
    }

    pub fn children(&self) -> &[ResourceHandle] {
        &self.children
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn content_types(&self) -> ContentTypeMask {
        self.content_types
    }

    pub fn max_age(&self) -> u32 {
        self.max_age
    }

    /// Seconds until the next scheduled notification pass.
    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn is_observable(&self) -> bool {
        self.permissions.is_observable()
    }

    pub fn is_discoverable(&self) -> bool {
        self.discoverable && self.has_handler()
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub(crate) fn attributes(&self) -> &[(&'static str, LinkAttributeValue)] {
        &self.attributes
    }

    pub(crate) fn handler_mut(&mut self) -> Option<&mut (dyn ResourceHandler<Endpoint> + 'static)> {
        self.handler.as_deref_mut()
    }

    /// One second elapsed.  Returns true, and restarts the countdown at `max_age`, once the
    /// remaining time drops to `low_water_mark` or below.
    pub(crate) fn advance_countdown(&mut self, low_water_mark: u32) -> bool {
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown <= low_water_mark {
            self.countdown = self.max_age;
            true
        } else {
            false
        }
    }
}

pub struct ResourceTree<Endpoint> {
    resources: Vec<Resource<Endpoint>>,
}

impl<Endpoint> Default for ResourceTree<Endpoint> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Endpoint> ResourceTree<Endpoint> {
    const ROOT: ResourceHandle = ResourceHandle(0);

    pub fn new() -> Self {
        let root = Resource::from_builder(ResourceBuilder::new("").not_discoverable());
        Self {
            resources: vec![root],
        }
    }

    pub fn root(&self) -> ResourceHandle {
        Self::ROOT
    }

    /// Adds a detached resource.  It becomes reachable once attached with [`Self::add_child`].
    pub fn create(&mut self, builder: ResourceBuilder<Endpoint>) -> ResourceHandle {
        let handle = ResourceHandle(self.resources.len());
        self.resources.push(Resource::from_builder(builder));
        handle
    }

    pub fn add_child(
        &mut self,
        parent: ResourceHandle,
        child: ResourceHandle,
    ) -> Result<(), TreeError> {
        let name = self.get(child).ok_or(TreeError::UnknownResource(child))?.name.clone();
        let parent_resource = self.get(parent).ok_or(TreeError::UnknownResource(parent))?;
        if child == Self::ROOT {
            return Err(TreeError::RootNotAttachable);
        }
        if self.resources[child.0].parent.is_some() {
            return Err(TreeError::AlreadyAttached(child));
        }
        if parent_resource
            .children
            .iter()
            .any(|c| self.resources[c.0].name == name)
        {
            return Err(TreeError::DuplicateName {
                parent: self.path_of(parent),
                name,
            });
        }
        let mut ancestor = Some(parent);
        while let Some(handle) = ancestor {
            if handle == child {
                return Err(TreeError::Cycle(child));
            }
            ancestor = self.resources[handle.0].parent;
        }

        self.resources[child.0].parent = Some(parent);
        self.resources[parent.0].children.push(child);
        Ok(())
    }

    pub fn get(&self, handle: ResourceHandle) -> Option<&Resource<Endpoint>> {
        self.resources.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: ResourceHandle) -> Option<&mut Resource<Endpoint>> {
        self.resources.get_mut(handle.0)
    }

    /// Exact segment-by-segment match from the root.  An empty path names the root itself.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<ResourceHandle> {
        path.iter().try_fold(Self::ROOT, |current, segment| {
            self.resources[current.0]
                .children
                .iter()
                .copied()
                .find(|c| self.resources[c.0].name == segment.as_ref())
        })
    }

    /// Absolute path such as `/lights/led3`.
    pub fn path_of(&self, handle: ResourceHandle) -> String {
        let mut segments = Vec::new();
        let mut current = Some(handle);
        while let Some(h) = current {
            match self.resources.get(h.0) {
                Some(resource) if h != Self::ROOT => {
                    segments.push(resource.name.as_str());
                    current = resource.parent;
                }
                _ => break,
            }
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    /// Resources reachable from the root, depth-first in insertion order.
    pub fn walk(&self) -> Vec<ResourceHandle> {
        let mut order = Vec::new();
        let mut stack = vec![Self::ROOT];
        while let Some(handle) = stack.pop() {
            order.push(handle);
            stack.extend(self.resources[handle.0].children.iter().rev().copied());
        }
        order
    }

    pub fn handles(&self) -> impl Iterator<Item = ResourceHandle> {
        (0..self.resources.len()).map(ResourceHandle)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
