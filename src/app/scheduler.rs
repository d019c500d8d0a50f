use std::collections::HashMap;

use coap_lite::MessageType;

use crate::app::resource_tree::{ResourceHandle, ResourceTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Confirmable,
    NonConfirmable,
}

impl Delivery {
    pub fn message_type(self) -> MessageType {
        match self {
            Delivery::Confirmable => MessageType::Confirmable,
            Delivery::NonConfirmable => MessageType::NonConfirmable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledPass {
    pub resource: ResourceHandle,
    pub delivery: Delivery,
}

/// Drives periodic notifications from a one-second tick.  Each observable resource with a
/// non-zero Max-Age gets a pass whenever its countdown reaches the low water mark, so
/// observers hear from the server shortly before their cached representation goes stale.
/// Every `confirmable_every`-th scheduled pass of a resource, starting with the first, is
/// confirmable; the rest are not.
#[derive(Debug)]
pub struct NotificationScheduler {
    low_water_mark: u32,
    confirmable_every: u32,
    passes: HashMap<ResourceHandle, u32>,
}

impl NotificationScheduler {
    pub fn new(low_water_mark: u32, confirmable_every: u32) -> Self {
        Self {
            low_water_mark,
            confirmable_every: confirmable_every.max(1),
            passes: HashMap::new(),
        }
    }

    pub fn tick<Endpoint>(&mut self, tree: &mut ResourceTree<Endpoint>) -> Vec<ScheduledPass> {
        let mut due = Vec::new();
        for handle in tree.handles().collect::<Vec<_>>() {
            let fired = match tree.get_mut(handle) {
                Some(resource) if resource.is_observable() && resource.max_age() > 0 => {
                    resource.advance_countdown(self.low_water_mark)
                }
                _ => false,
            };
            if fired {
                due.push(ScheduledPass {
                    resource: handle,
                    delivery: self.next_delivery(handle),
                });
            }
        }
        due
    }

    /// Scheduled passes fired so far for `resource`.
    pub fn passes(&self, resource: ResourceHandle) -> u32 {
        self.passes.get(&resource).copied().unwrap_or(0)
    }

    fn next_delivery(&mut self, resource: ResourceHandle) -> Delivery {
        let count = self.passes.entry(resource).or_insert(0);
        let delivery = if *count % self.confirmable_every == 0 {
            Delivery::Confirmable
        } else {
            Delivery::NonConfirmable
        };
        *count = count.wrapping_add(1);
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::permissions::Permissions;
    use crate::app::resource_builder::ResourceBuilder;
    use crate::app::test_util::TestEndpoint;

    fn tree_with(max_age: u32, permissions: Permissions) -> (ResourceTree<TestEndpoint>, ResourceHandle) {
        let mut tree = ResourceTree::new();
        let handle = tree.create(
            ResourceBuilder::new("led3")
                .permissions(permissions)
                .max_age(max_age),
        );
        let root = tree.root();
        tree.add_child(root, handle).unwrap();
        (tree, handle)
    }

    #[test]
    fn test_fires_at_low_water_mark() {
        let (mut tree, led3) = tree_with(15, Permissions::GET | Permissions::OBSERVE);
        let mut scheduler = NotificationScheduler::new(2, 4);

        for _ in 0..12 {
            assert!(scheduler.tick(&mut tree).is_empty());
        }
        assert_eq!(
            scheduler.tick(&mut tree),
            vec![ScheduledPass {
                resource: led3,
                delivery: Delivery::Confirmable
            }]
        );
        assert_eq!(tree.get(led3).unwrap().countdown(), 15);
    }

    #[test]
    fn test_confirmable_cadence() {
        let (mut tree, led3) = tree_with(15, Permissions::GET | Permissions::OBSERVE);
        let mut scheduler = NotificationScheduler::new(2, 4);

        let deliveries: Vec<_> = (0..13 * 8)
            .flat_map(|_| scheduler.tick(&mut tree))
            .map(|pass| pass.delivery)
            .collect();
        use Delivery::*;
        assert_eq!(
            deliveries,
            vec![
                Confirmable,
                NonConfirmable,
                NonConfirmable,
                NonConfirmable,
                Confirmable,
                NonConfirmable,
                NonConfirmable,
                NonConfirmable
            ]
        );
        assert_eq!(scheduler.passes(led3), 8);
    }

    #[test]
    fn test_short_max_age_fires_every_tick() {
        let (mut tree, _) = tree_with(2, Permissions::GET | Permissions::OBSERVE);
        let mut scheduler = NotificationScheduler::new(2, 4);
        for _ in 0..5 {
            assert_eq!(scheduler.tick(&mut tree).len(), 1);
        }
    }

    #[test]
    fn test_unobservable_or_zero_max_age_never_fires() {
        let (mut tree, _) = tree_with(15, Permissions::GET);
        let mut scheduler = NotificationScheduler::new(2, 4);
        assert!((0..60).all(|_| scheduler.tick(&mut tree).is_empty()));

        let (mut tree, _) = tree_with(0, Permissions::GET | Permissions::OBSERVE);
        assert!((0..60).all(|_| scheduler.tick(&mut tree).is_empty()));
    }
}
