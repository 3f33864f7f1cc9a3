//! Protocol versions: the finite, ordered set of wire format revisions.
//!
//! A [`ProtocolVersion`] is a dense ordinal into a fixed table. The ordinal
//! is what caches index by (an array slot per version, no hashing on the
//! hot path), while the *protocol number* is what peers announce on the
//! wire during their handshake.

use std::fmt;
use std::iter::FusedIterator;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// One row of the version table.
struct VersionInfo {
    protocol: i32,
    name: &'static str,
}

/// Every known version, oldest first. The index of a row is its ordinal.
const VERSIONS: [VersionInfo; 42] = [
    VersionInfo { protocol: 4, name: "1.7.2" },
    VersionInfo { protocol: 5, name: "1.7.6" },
    VersionInfo { protocol: 47, name: "1.8" },
    VersionInfo { protocol: 107, name: "1.9" },
    VersionInfo { protocol: 108, name: "1.9.1" },
    VersionInfo { protocol: 109, name: "1.9.2" },
    VersionInfo { protocol: 110, name: "1.9.4" },
    VersionInfo { protocol: 210, name: "1.10" },
    VersionInfo { protocol: 315, name: "1.11" },
    VersionInfo { protocol: 316, name: "1.11.1" },
    VersionInfo { protocol: 335, name: "1.12" },
    VersionInfo { protocol: 338, name: "1.12.1" },
    VersionInfo { protocol: 340, name: "1.12.2" },
    VersionInfo { protocol: 393, name: "1.13" },
    VersionInfo { protocol: 401, name: "1.13.1" },
    VersionInfo { protocol: 404, name: "1.13.2" },
    VersionInfo { protocol: 477, name: "1.14" },
    VersionInfo { protocol: 480, name: "1.14.1" },
    VersionInfo { protocol: 485, name: "1.14.2" },
    VersionInfo { protocol: 490, name: "1.14.3" },
    VersionInfo { protocol: 498, name: "1.14.4" },
    VersionInfo { protocol: 573, name: "1.15" },
    VersionInfo { protocol: 575, name: "1.15.1" },
    VersionInfo { protocol: 578, name: "1.15.2" },
    VersionInfo { protocol: 735, name: "1.16" },
    VersionInfo { protocol: 736, name: "1.16.1" },
    VersionInfo { protocol: 751, name: "1.16.2" },
    VersionInfo { protocol: 753, name: "1.16.3" },
    VersionInfo { protocol: 754, name: "1.16.4" },
    VersionInfo { protocol: 755, name: "1.17" },
    VersionInfo { protocol: 756, name: "1.17.1" },
    VersionInfo { protocol: 757, name: "1.18" },
    VersionInfo { protocol: 758, name: "1.18.2" },
    VersionInfo { protocol: 759, name: "1.19" },
    VersionInfo { protocol: 760, name: "1.19.1" },
    VersionInfo { protocol: 761, name: "1.19.3" },
    VersionInfo { protocol: 762, name: "1.19.4" },
    VersionInfo { protocol: 763, name: "1.20" },
    VersionInfo { protocol: 764, name: "1.20.2" },
    VersionInfo { protocol: 765, name: "1.20.3" },
    VersionInfo { protocol: 766, name: "1.20.5" },
    VersionInfo { protocol: 767, name: "1.21" },
];

/// The oldest version whose framing supports compression.
pub const MINIMUM_COMPRESSION_VERSION: ProtocolVersion = ProtocolVersion::V1_8;

// ---------------------------------------------------------------------------
// ProtocolVersion
// ---------------------------------------------------------------------------

/// A protocol version, stored as its ordinal in the version table.
///
/// Versions are totally ordered (older < newer), so they can be used as
/// range bounds. On the wire and in config files a version is written as
/// its protocol number, e.g. `47` for 1.8.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "i32", into = "i32")]
pub struct ProtocolVersion(u8);

impl ProtocolVersion {
    pub const V1_7_2: Self = Self(0);
    pub const V1_7_6: Self = Self(1);
    pub const V1_8: Self = Self(2);
    pub const V1_9: Self = Self(3);
    pub const V1_9_1: Self = Self(4);
    pub const V1_9_2: Self = Self(5);
    pub const V1_9_4: Self = Self(6);
    pub const V1_10: Self = Self(7);
    pub const V1_11: Self = Self(8);
    pub const V1_11_1: Self = Self(9);
    pub const V1_12: Self = Self(10);
    pub const V1_12_1: Self = Self(11);
    pub const V1_12_2: Self = Self(12);
    pub const V1_13: Self = Self(13);
    pub const V1_13_1: Self = Self(14);
    pub const V1_13_2: Self = Self(15);
    pub const V1_14: Self = Self(16);
    pub const V1_14_1: Self = Self(17);
    pub const V1_14_2: Self = Self(18);
    pub const V1_14_3: Self = Self(19);
    pub const V1_14_4: Self = Self(20);
    pub const V1_15: Self = Self(21);
    pub const V1_15_1: Self = Self(22);
    pub const V1_15_2: Self = Self(23);
    pub const V1_16: Self = Self(24);
    pub const V1_16_1: Self = Self(25);
    pub const V1_16_2: Self = Self(26);
    pub const V1_16_3: Self = Self(27);
    pub const V1_16_4: Self = Self(28);
    pub const V1_17: Self = Self(29);
    pub const V1_17_1: Self = Self(30);
    pub const V1_18: Self = Self(31);
    pub const V1_18_2: Self = Self(32);
    pub const V1_19: Self = Self(33);
    pub const V1_19_1: Self = Self(34);
    pub const V1_19_3: Self = Self(35);
    pub const V1_19_4: Self = Self(36);
    pub const V1_20: Self = Self(37);
    pub const V1_20_2: Self = Self(38);
    pub const V1_20_3: Self = Self(39);
    pub const V1_20_5: Self = Self(40);
    pub const V1_21: Self = Self(41);

    /// The oldest known version.
    pub const MINIMUM: Self = Self::V1_7_2;

    /// The newest known version.
    pub const MAXIMUM: Self = Self::V1_21;

    /// How many versions exist. Tables indexed by ordinal have this length.
    pub const COUNT: usize = VERSIONS.len();

    /// Returns the version at `ordinal`, or `None` past the end of the table.
    pub fn from_ordinal(ordinal: usize) -> Option<Self> {
        if ordinal < Self::COUNT {
            Some(Self(ordinal as u8))
        } else {
            None
        }
    }

    /// Looks up a version by the protocol number a peer announced.
    pub fn from_protocol(protocol: i32) -> Option<Self> {
        VERSIONS
            .iter()
            .position(|info| info.protocol == protocol)
            .map(|ordinal| Self(ordinal as u8))
    }

    /// The dense index of this version, `0..COUNT`.
    pub const fn ordinal(self) -> usize {
        self.0 as usize
    }

    /// The number this version announces on the wire.
    pub fn protocol(self) -> i32 {
        VERSIONS[self.ordinal()].protocol
    }

    /// The human-readable release name, e.g. `"1.12.2"`.
    pub fn name(self) -> &'static str {
        VERSIONS[self.ordinal()].name
    }

    /// Whether this version's framing has a compression stage.
    pub fn supports_compression(self) -> bool {
        self >= MINIMUM_COMPRESSION_VERSION
    }

    /// Iterates every version, oldest first.
    pub fn all() -> VersionRange {
        Self::range(Self::MINIMUM, Self::MAXIMUM)
    }

    /// Iterates the inclusive range `from..=to`, oldest first.
    ///
    /// An inverted range (`from > to`) is empty rather than an error.
    pub fn range(from: Self, to: Self) -> VersionRange {
        VersionRange {
            next: from.ordinal(),
            end: to.ordinal() + 1,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<i32> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(protocol: i32) -> Result<Self, Self::Error> {
        Self::from_protocol(protocol).ok_or(ProtocolError::UnknownVersion(protocol))
    }
}

impl From<ProtocolVersion> for i32 {
    fn from(version: ProtocolVersion) -> Self {
        version.protocol()
    }
}

// ---------------------------------------------------------------------------
// VersionRange
// ---------------------------------------------------------------------------

/// An iterator over a contiguous, inclusive run of versions.
#[derive(Debug, Clone)]
pub struct VersionRange {
    next: usize,
    end: usize,
}

impl Iterator for VersionRange {
    type Item = ProtocolVersion;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let version = ProtocolVersion(self.next as u8);
        self.next += 1;
        Some(version)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for VersionRange {}

impl FusedIterator for VersionRange {}
