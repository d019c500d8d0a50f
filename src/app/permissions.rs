use std::ops::{BitOr, BitOrAssign};

use coap_lite::RequestType;

/// Methods a resource accepts, plus whether it may be observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Permissions(u8);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const GET: Permissions = Permissions(1);
    pub const POST: Permissions = Permissions(1 << 1);
    pub const PUT: Permissions = Permissions(1 << 2);
    pub const DELETE: Permissions = Permissions(1 << 3);
    pub const OBSERVE: Permissions = Permissions(1 << 4);

    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn allows(self, method: RequestType) -> bool {
        match method {
            RequestType::Get => self.contains(Self::GET),
            RequestType::Post => self.contains(Self::POST),
            RequestType::Put => self.contains(Self::PUT),
            RequestType::Delete => self.contains(Self::DELETE),
            _ => false,
        }
    }

    pub const fn is_observable(self) -> bool {
        self.contains(Self::OBSERVE)
    }
}

impl BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Self) -> Self::Output {
        Permissions(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
