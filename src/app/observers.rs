//! Bounded registry of active observation relationships.
//!
//! Entries occupy fixed slots so that a notification pass can hold a position in the registry
//! while observers are being added and removed underneath it.  Handles carry a generation so a
//! stale handle never resolves to an observer that later reused the slot.

use thiserror::Error;

use crate::app::content_type::ContentType;
use crate::app::message::Token;
use crate::app::resource_tree::ResourceHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observer<Endpoint> {
    pub resource: ResourceHandle,
    pub peer: Endpoint,
    pub token: Token,
    pub content_type: ContentType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("observer registry is full ({capacity} entries)")]
pub struct RegistrationFull {
    pub capacity: usize,
}

#[derive(Debug)]
enum Slot<Endpoint> {
    Vacant {
        generation: u32,
    },
    Occupied {
        generation: u32,
        observer: Observer<Endpoint>,
    },
}

impl<Endpoint> Slot<Endpoint> {
    fn generation(&self) -> u32 {
        match self {
            Slot::Vacant { generation } | Slot::Occupied { generation, .. } => *generation,
        }
    }

    fn live(&self, index: usize) -> Option<(ObserverHandle, &Observer<Endpoint>)> {
        match self {
            Slot::Occupied {
                generation,
                observer,
            } => Some((
                ObserverHandle {
                    index,
                    generation: *generation,
                },
                observer,
            )),
            Slot::Vacant { .. } => None,
        }
    }
}

#[derive(Debug)]
pub struct ObserverRegistry<Endpoint> {
    slots: Vec<Slot<Endpoint>>,
    len: usize,
}

impl<Endpoint: PartialEq> ObserverRegistry<Endpoint> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::Vacant { generation: 0 }).collect(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds an observer, or refreshes the content type of an existing entry for the same
    /// resource, peer and token.
    pub fn register(
        &mut self,
        resource: ResourceHandle,
        peer: Endpoint,
        token: Token,
        content_type: ContentType,
    ) -> Result<ObserverHandle, RegistrationFull> {
        let existing = self.find(|o| o.resource == resource && o.peer == peer && o.token == token);
        if let Some(handle) = existing {
            if let Some(Slot::Occupied { observer, .. }) = self.slots.get_mut(handle.index) {
                observer.content_type = content_type;
            }
            return Ok(handle);
        }

        let capacity = self.capacity();
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| matches!(slot, Slot::Vacant { .. }))
            .ok_or(RegistrationFull { capacity })?;
        let generation = slot.generation();
        *slot = Slot::Occupied {
            generation,
            observer: Observer {
                resource,
                peer,
                token,
                content_type,
            },
        };
        self.len += 1;
        Ok(ObserverHandle { index, generation })
    }

    /// First observer of `resource` registered by `peer`, in slot order.
    pub fn search(&self, peer: &Endpoint, resource: ResourceHandle) -> Option<ObserverHandle> {
        self.find(|o| o.resource == resource && &o.peer == peer)
    }

    pub fn get(&self, handle: ObserverHandle) -> Option<&Observer<Endpoint>> {
        match self.slots.get(handle.index) {
            Some(Slot::Occupied {
                generation,
                observer,
            }) if *generation == handle.generation => Some(observer),
            _ => None,
        }
    }

    /// Removes the observer `handle` refers to.  Returns `None` if it was already removed.
    pub fn unregister(&mut self, handle: ObserverHandle) -> Option<Observer<Endpoint>> {
        let slot = self.slots.get_mut(handle.index)?;
        if !matches!(slot, Slot::Occupied { generation, .. } if *generation == handle.generation)
        {
            return None;
        }
        let vacant = Slot::Vacant {
            generation: handle.generation.wrapping_add(1),
        };
        match std::mem::replace(slot, vacant) {
            Slot::Occupied { observer, .. } => {
                self.len -= 1;
                Some(observer)
            }
            Slot::Vacant { .. } => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObserverHandle, &Observer<Endpoint>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.live(index))
    }

    pub fn iter_resource(
        &self,
        resource: ResourceHandle,
    ) -> impl Iterator<Item = (ObserverHandle, &Observer<Endpoint>)> {
        self.iter()
            .filter(move |(_, observer)| observer.resource == resource)
    }

    /// Starts a walk over the observers of `resource`.
    pub fn cursor(&self, resource: ResourceHandle) -> ObserverCursor {
        ObserverCursor {
            resource,
            next_index: 0,
        }
    }

    fn find(&self, predicate: impl Fn(&Observer<Endpoint>) -> bool) -> Option<ObserverHandle> {
        self.iter()
            .find(|(_, observer)| predicate(observer))
            .map(|(handle, _)| handle)
    }
}

/// Position in a walk over one resource's observers.  The cursor doesn't borrow the registry,
/// so observers may be removed (including the one just yielded) between calls to
/// [`ObserverCursor::advance`]; removed entries are skipped and no live entry is yielded twice.
#[derive(Debug, Clone)]
pub struct ObserverCursor {
    resource: ResourceHandle,
    next_index: usize,
}

impl ObserverCursor {
    pub fn advance<Endpoint>(
        &mut self,
        registry: &ObserverRegistry<Endpoint>,
    ) -> Option<ObserverHandle> {
        while let Some(slot) = registry.slots.get(self.next_index) {
            let index = self.next_index;
            self.next_index += 1;
            if let Some((handle, observer)) = slot.live(index) {
                if observer.resource == self.resource {
                    return Some(handle);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::resource_builder::ResourceBuilder;
    use crate::app::resource_tree::ResourceTree;
    use crate::app::test_util::TestEndpoint;

    fn resources() -> (ResourceHandle, ResourceHandle) {
        let mut tree = ResourceTree::<TestEndpoint>::new();
        (
            tree.create(ResourceBuilder::new("a")),
            tree.create(ResourceBuilder::new("b")),
        )
    }

    fn token(b: u8) -> Token {
        Token::from_slice(&[b]).unwrap()
    }

    #[test]
    fn test_register_is_idempotent() {
        let (a, _) = resources();
        let mut registry = ObserverRegistry::with_capacity(4);
        let first = registry
            .register(a, TestEndpoint(1), token(1), ContentType::TextPlain)
            .unwrap();
        let again = registry
            .register(a, TestEndpoint(1), token(1), ContentType::Json)
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(first).unwrap().content_type, ContentType::Json);

        registry
            .register(a, TestEndpoint(1), token(2), ContentType::Json)
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_full() {
        let (a, _) = resources();
        let mut registry = ObserverRegistry::with_capacity(2);
        registry
            .register(a, TestEndpoint(1), token(1), ContentType::TextPlain)
            .unwrap();
        registry
            .register(a, TestEndpoint(2), token(1), ContentType::TextPlain)
            .unwrap();
        assert_eq!(
            registry.register(a, TestEndpoint(3), token(1), ContentType::TextPlain),
            Err(RegistrationFull { capacity: 2 })
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unregister_once() {
        let (a, b) = resources();
        let mut registry = ObserverRegistry::with_capacity(2);
        let handle = registry
            .register(a, TestEndpoint(1), token(1), ContentType::TextPlain)
            .unwrap();
        assert_eq!(registry.search(&TestEndpoint(1), b), None);
        assert_eq!(registry.search(&TestEndpoint(1), a), Some(handle));

        assert!(registry.unregister(handle).is_some());
        assert!(registry.unregister(handle).is_none());
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.search(&TestEndpoint(1), a), None);
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let (a, _) = resources();
        let mut registry = ObserverRegistry::with_capacity(1);
        let old = registry
            .register(a, TestEndpoint(1), token(1), ContentType::TextPlain)
            .unwrap();
        registry.unregister(old);
        let new = registry
            .register(a, TestEndpoint(2), token(1), ContentType::TextPlain)
            .unwrap();
        assert_ne!(old, new);
        assert!(registry.get(old).is_none());
        assert!(registry.unregister(old).is_none());
        assert_eq!(registry.get(new).unwrap().peer, TestEndpoint(2));
    }

    #[test]
    fn test_cursor_survives_removal() {
        let (a, b) = resources();
        let mut registry = ObserverRegistry::with_capacity(4);
        let first = registry
            .register(a, TestEndpoint(1), token(1), ContentType::TextPlain)
            .unwrap();
        registry
            .register(b, TestEndpoint(2), token(1), ContentType::TextPlain)
            .unwrap();
        let third = registry
            .register(a, TestEndpoint(3), token(1), ContentType::TextPlain)
            .unwrap();
        let fourth = registry
            .register(a, TestEndpoint(4), token(1), ContentType::TextPlain)
            .unwrap();

        let observing_a: Vec<_> = registry.iter_resource(a).map(|(h, _)| h).collect();
        assert_eq!(observing_a, vec![first, third, fourth]);

        let mut cursor = registry.cursor(a);
        assert_eq!(cursor.advance(&registry), Some(first));

        // Drop the current entry and the next one; the walk continues with what's left.
        registry.unregister(first);
        registry.unregister(third);
        assert_eq!(cursor.advance(&registry), Some(fourth));

        // A registration landing in an already-visited slot isn't revisited.
        registry
            .register(a, TestEndpoint(5), token(1), ContentType::TextPlain)
            .unwrap();
        assert_eq!(cursor.advance(&registry), None);
    }
}
