//! Tagged-optional wire formats and encoding/protocol version pairs
//! (spec.md §4.1, §4.2).

use core::fmt;

/// `(major, minor)` version pair, used for both the protocol version and
/// the encoding version (spec.md §3 Reference, §4.2 header).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionPair {
    pub major: u8,
    pub minor: u8,
}

impl VersionPair {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for VersionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Protocol version this implementation speaks (spec.md §4.2 header).
pub const PROTOCOL_VERSION: VersionPair = VersionPair::new(1, 0);
/// Default encoding version for new encapsulations (spec.md §6 Default.EncodingVersion).
pub const ENCODING_VERSION: VersionPair = VersionPair::new(1, 1);

/// The seven tagged-optional wire formats (spec.md §4.1). A reader that
/// does not recognize a tag uses the format alone to know how many bytes
/// to skip, without understanding the value's type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Format {
    F1 = 0,
    F2 = 1,
    F4 = 2,
    F8 = 3,
    Size = 4,
    VSize = 5,
    FSize = 6,
    Class = 7,
}

impl Format {
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => Format::F1,
            1 => Format::F2,
            2 => Format::F4,
            3 => Format::F8,
            4 => Format::Size,
            5 => Format::VSize,
            6 => Format::FSize,
            7 => Format::Class,
            _ => return None,
        })
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Fixed-width formats have a statically known skip size; the
    /// variable-width ones (`Size`/`VSize`/`FSize`/`Class`) require reading
    /// a length (or, for `Class`, fully decoding/skipping the instance).
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Format::F1 => Some(1),
            Format::F2 => Some(2),
            Format::F4 => Some(4),
            Format::F8 => Some(8),
            _ => None,
        }
    }
}
