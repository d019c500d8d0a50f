//! Content-Format registry subset and per-resource support masks.

use std::ops::BitOr;

/// Representations a resource can produce, listed in the order used to pick a default when
/// the peer expresses no preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    TextPlain,
    LinkFormat,
    Xml,
    OctetStream,
    Exi,
    Json,
    Cbor,
}

impl ContentType {
    pub const ALL: [ContentType; 7] = [
        ContentType::TextPlain,
        ContentType::LinkFormat,
        ContentType::Xml,
        ContentType::OctetStream,
        ContentType::Exi,
        ContentType::Json,
        ContentType::Cbor,
    ];

    /// IANA CoAP Content-Format number.
    pub const fn number(self) -> u16 {
        match self {
            ContentType::TextPlain => 0,
            ContentType::LinkFormat => 40,
            ContentType::Xml => 41,
            ContentType::OctetStream => 42,
            ContentType::Exi => 47,
            ContentType::Json => 50,
            ContentType::Cbor => 60,
        }
    }

    pub fn from_number(number: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|ct| ct.number() == number)
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ContentTypeMask(u8);

impl ContentTypeMask {
    pub const EMPTY: ContentTypeMask = ContentTypeMask(0);

    pub const fn with(self, content_type: ContentType) -> Self {
        Self(self.0 | content_type.bit())
    }

    pub const fn contains(self, content_type: ContentType) -> bool {
        self.0 & content_type.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = ContentType> {
        ContentType::ALL
            .into_iter()
            .filter(move |ct| self.contains(*ct))
    }

    pub fn preferred(self) -> Option<ContentType> {
        self.iter().next()
    }

    /// First entry of `acceptable` (Content-Format numbers, in the peer's order) that this mask
    /// supports.  Unknown numbers are skipped.
    pub fn select<I>(self, acceptable: I) -> Option<ContentType>
    where
        I: IntoIterator<Item = u16>,
    {
        acceptable
            .into_iter()
            .filter_map(ContentType::from_number)
            .find(|ct| self.contains(*ct))
    }
}

impl From<ContentType> for ContentTypeMask {
    fn from(content_type: ContentType) -> Self {
        ContentTypeMask::EMPTY.with(content_type)
    }
}

impl BitOr for ContentTypeMask {
    type Output = ContentTypeMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        ContentTypeMask(self.0 | rhs.0)
    }
}

impl BitOr for ContentType {
    type Output = ContentTypeMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        ContentTypeMask::from(self).with(rhs)
    }
}

impl BitOr<ContentType> for ContentTypeMask {
    type Output = ContentTypeMask;

    fn bitor(self, rhs: ContentType) -> Self::Output {
        self.with(rhs)
    }
}
