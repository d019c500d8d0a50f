//! 24-bit wrapping integers carried in the Observe option.
//!
//! Notification ordering on the client side relies on the freshness rule of
//! [RFC 7641 §3.4](https://datatracker.ietf.org/doc/html/rfc7641#section-3.4), which
//! [`u24::is_fresher_than`] implements so that the server's own sequence can be checked against it.

use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;

use thiserror::Error;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
#[allow(non_camel_case_types)]
pub struct u24(u32);

/// Past this much time a notification is fresher regardless of its sequence number.
pub const FRESHNESS_ESCAPE: Duration = Duration::from_secs(128);

impl u24 {
    pub const MIN: u24 = u24(0);
    pub const MAX: u24 = u24(Self::MASK);
    pub const BITS: u32 = 24;

    const MASK: u32 = 0x00ff_ffff;
    const HALF: u32 = 1 << 23;

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0
            .checked_add(rhs.0)
            .and_then(|x| u24::try_from(x).ok())
    }

    pub const fn wrapping_add(self, rhs: Self) -> Self {
        u24(self.0.wrapping_add(rhs.0) & Self::MASK)
    }

    pub const fn wrapping_sub(self, rhs: Self) -> Self {
        u24(self.0.wrapping_sub(rhs.0) & Self::MASK)
    }

    /// Keeps the low 24 bits of `value`.
    pub const fn truncate(value: u32) -> Self {
        u24(value & Self::MASK)
    }

    pub const fn from_le_bytes(bytes: [u8; 3]) -> Self {
        u24(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
    }

    /// Whether a notification numbered `self` supersedes one numbered `earlier` that arrived
    /// `elapsed` ago.
    pub fn is_fresher_than(self, earlier: u24, elapsed: Duration) -> bool {
        let (v1, v2) = (earlier.0, self.0);
        (v1 < v2 && v2 - v1 < Self::HALF)
            || (v1 > v2 && v1 - v2 > Self::HALF)
            || elapsed > FRESHNESS_ESCAPE
    }
}

impl Display for u24 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for u24 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl From<u8> for u24 {
    fn from(value: u8) -> Self {
        u24(u32::from(value))
    }
}

impl From<u16> for u24 {
    fn from(value: u16) -> Self {
        u24(u32::from(value))
    }
}

impl TryFrom<u32> for u24 {
    type Error = TryFromCustomIntError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value > u24::MAX.0 {
            Err(TryFromCustomIntError)
        } else {
            Ok(u24(value))
        }
    }
}

impl From<u24> for u32 {
    fn from(value: u24) -> Self {
        value.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("out of range integral type conversion attempted")]
pub struct TryFromCustomIntError;

/// Server-wide Observe sequence.  Every notification, and every response that confirms a
/// registration, takes the next value.
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    current: u24,
}

impl SequenceCounter {
    pub fn new(start: u24) -> Self {
        Self { current: start }
    }

    pub fn current(&self) -> u24 {
        self.current
    }

    pub fn next(&mut self) -> u24 {
        self.current = self.current.wrapping_add(u24::from(1u8));
        self.current
    }
}
