use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use thiserror::Error;

use crate::app::codec::HEADER_LEN;
use crate::app::context::CoapContext;
use crate::app::core_handler;
use crate::app::resource_tree::{ResourceTree, TreeError};

pub const DEFAULT_DISCOVERABLE: bool = true;
pub const DEFAULT_OBSERVER_CAPACITY: usize = 8;
pub const DEFAULT_NOTIFY_LOW_WATER_MARK: u32 = 2;
pub const DEFAULT_CONFIRMABLE_EVERY: u32 = 4;

/// Recommended upper bound on a CoAP datagram (RFC 7252 §4.6).
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1152;

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Main builder API to configure how the engine serves a resource tree.
#[derive(Debug, Default, Clone)]
pub struct AppBuilder {
    pub(crate) config: ConfigBuilder,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct ConfigBuilder {
    pub discoverable: Option<bool>,
    pub observer_capacity: Option<usize>,
    pub notify_low_water_mark: Option<u32>,
    pub confirmable_every: Option<u32>,
    pub max_datagram_size: Option<usize>,
    pub tick_period: Option<Duration>,
}

/// Resolved engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub discoverable: bool,
    pub observer_capacity: usize,
    pub notify_low_water_mark: u32,
    pub confirmable_every: u32,
    pub max_datagram_size: usize,
    pub tick_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discoverable: DEFAULT_DISCOVERABLE,
            observer_capacity: DEFAULT_OBSERVER_CAPACITY,
            notify_low_water_mark: DEFAULT_NOTIFY_LOW_WATER_MARK,
            confirmable_every: DEFAULT_CONFIRMABLE_EVERY,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            tick_period: DEFAULT_TICK_PERIOD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("confirmable_every must be at least 1")]
    ZeroConfirmableCadence,

    #[error("tick period must be non-zero")]
    ZeroTickPeriod,

    #[error("max datagram size {0} cannot hold a CoAP header")]
    DatagramTooSmall(usize),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl ConfigBuilder {
    fn resolve(self) -> Result<Config, BuildError> {
        let defaults = Config::default();
        let config = Config {
            discoverable: self.discoverable.unwrap_or(defaults.discoverable),
            observer_capacity: self.observer_capacity.unwrap_or(defaults.observer_capacity),
            notify_low_water_mark: self
                .notify_low_water_mark
                .unwrap_or(defaults.notify_low_water_mark),
            confirmable_every: self.confirmable_every.unwrap_or(defaults.confirmable_every),
            max_datagram_size: self.max_datagram_size.unwrap_or(defaults.max_datagram_size),
            tick_period: self.tick_period.unwrap_or(defaults.tick_period),
        };
        if config.confirmable_every == 0 {
            return Err(BuildError::ZeroConfirmableCadence);
        }
        if config.tick_period.is_zero() {
            return Err(BuildError::ZeroTickPeriod);
        }
        if config.max_datagram_size <= HEADER_LEN {
            return Err(BuildError::DatagramTooSmall(config.max_datagram_size));
        }
        Ok(config)
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Serve `/.well-known/core` listing every discoverable resource (the default).  To hide
    /// a single resource, see [`crate::app::ResourceBuilder::not_discoverable`].
    ///
    /// For more information refer to [RFC 6690](https://datatracker.ietf.org/doc/html/rfc6690).
    pub fn discoverable(mut self) -> Self {
        self.config.discoverable = Some(true);
        self
    }

    /// Don't mount `/.well-known/core` at all.
    ///
    /// See [`AppBuilder::discoverable`].
    pub fn not_discoverable(mut self) -> Self {
        self.config.discoverable = Some(false);
        self
    }

    /// Maximum number of simultaneous observation relationships across all resources.
    /// Registrations beyond this are answered as plain GETs.
    pub fn observer_capacity(mut self, capacity: usize) -> Self {
        self.config.observer_capacity = Some(capacity);
        self
    }

    /// Seconds before a resource's Max-Age runs out at which its observers are notified.
    pub fn notify_low_water_mark(mut self, seconds: u32) -> Self {
        self.config.notify_low_water_mark = Some(seconds);
        self
    }

    /// Every `n`-th scheduled notification pass of a resource is sent confirmable, which is
    /// how silently departed observers get detected and dropped.
    ///
    /// For more information refer to [RFC 7641 §4.5](https://datatracker.ietf.org/doc/html/rfc7641#section-4.5).
    pub fn confirmable_every(mut self, n: u32) -> Self {
        self.config.confirmable_every = Some(n);
        self
    }

    pub fn max_datagram_size(mut self, bytes: usize) -> Self {
        self.config.max_datagram_size = Some(bytes);
        self
    }

    /// Period of the scheduler tick.  Max-Age countdowns assume one second.
    pub fn tick_period(mut self, period: Duration) -> Self {
        self.config.tick_period = Some(period);
        self
    }

    /// Freezes `tree` and produces the engine that serves it.
    pub fn build<Endpoint>(
        self,
        mut tree: ResourceTree<Endpoint>,
    ) -> Result<CoapContext<Endpoint>, BuildError>
    where
        Endpoint: Debug + Clone + Eq + Hash + 'static,
    {
        let config = self.config.resolve()?;
        if config.discoverable {
            core_handler::install(&mut tree)?;
        }
        Ok(CoapContext::new(config, tree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::core_handler::{CORE, WELL_KNOWN};
    use crate::app::test_util::TestEndpoint;

    #[test]
    fn test_defaults() {
        let context = AppBuilder::new()
            .build(ResourceTree::<TestEndpoint>::new())
            .unwrap();
        assert_eq!(context.config(), &Config::default());
        assert!(context.tree().lookup(&[WELL_KNOWN, CORE]).is_some());
        assert_eq!(context.observers().capacity(), DEFAULT_OBSERVER_CAPACITY);
    }

    #[test]
    fn test_not_discoverable() {
        let context = AppBuilder::new()
            .not_discoverable()
            .observer_capacity(2)
            .build(ResourceTree::<TestEndpoint>::new())
            .unwrap();
        assert!(context.tree().lookup(&[WELL_KNOWN, CORE]).is_none());
        assert_eq!(context.observers().capacity(), 2);
    }

    #[test]
    fn test_invalid() {
        assert_eq!(
            AppBuilder::new()
                .confirmable_every(0)
                .build(ResourceTree::<TestEndpoint>::new())
                .err(),
            Some(BuildError::ZeroConfirmableCadence)
        );
        assert_eq!(
            AppBuilder::new()
                .max_datagram_size(4)
                .build(ResourceTree::<TestEndpoint>::new())
                .err(),
            Some(BuildError::DatagramTooSmall(4))
        );
        assert_eq!(
            AppBuilder::new()
                .tick_period(Duration::ZERO)
                .build(ResourceTree::<TestEndpoint>::new())
                .err(),
            Some(BuildError::ZeroTickPeriod)
        );
    }
}
