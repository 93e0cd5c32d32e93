// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! VLAN validation and manipulation.

use core::fmt::{Display, Formatter};
use core::num::NonZero;
use core::str::FromStr;
use tracing::instrument;

/// A VLAN Identifier.
///
/// This type is marked `#[repr(transparent)]` to ensure that it has the same memory layout
/// as a [`NonZero<u16>`].
/// This means that [`Option<Vid>`] should always have the same size and alignment as
/// [`Option<NonZero<u16>>`], and thus the same size and alignment as `u16`.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u16", into = "u16"))]
pub struct Vid(NonZero<u16>);

/// Errors which can occur when converting a `u16` to a validated [`Vid`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[must_use]
pub enum InvalidVid {
    /// 0 is a reserved [`Vid`] which basically means "the native vlan."
    #[error("Zero is a reserved Vid")]
    Zero,
    /// 4095 is a reserved [`Vid`] in IEEE 802.1Q.
    #[error("4095 is a reserved Vid")]
    Reserved,
    /// The value is too large to be a legal [`Vid`] (12-bit max).
    #[error("{0} is too large to be a legal Vid ({MAX} is max legal value)", MAX = Vid::MAX)]
    TooLarge(u16),
}

impl InvalidVid {
    /// The raw `u16` value of the reserved (4095) [`Vid`]
    pub const RESERVED: u16 = 4095;
    /// The raw `u16` value of the first truly nonsensical [`Vid`] (4096)
    pub const TOO_LARGE: u16 = Self::RESERVED + 1;
}

impl Vid {
    /// The minimum legal [`Vid`] value (1).
    pub const MIN: Vid = Vid(NonZero::<u16>::MIN);

    /// The maximum legal [`Vid`] value (2^12 - 2).
    #[allow(unsafe_code)] // safe due to const eval
    pub const MAX: Vid = Vid(unsafe { NonZero::new_unchecked(4094) });

    /// Create a new [`Vid`] from a `u16`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is 0, 4095 (reserved), or greater than [`Vid::MAX`].
    #[instrument(level = "trace")]
    pub fn new(vid: u16) -> Result<Self, InvalidVid> {
        match NonZero::new(vid) {
            None => Err(InvalidVid::Zero),
            Some(val) if val.get() == InvalidVid::RESERVED => Err(InvalidVid::Reserved),
            Some(val) if val.get() > InvalidVid::RESERVED => Err(InvalidVid::TooLarge(val.get())),
            Some(val) => Ok(Vid(val)),
        }
    }

    /// Get the value of the [`Vid`] as a `u16`.
    #[must_use]
    pub fn to_u16(self) -> u16 {
        self.0.get()
    }
}

impl From<Vid> for u16 {
    fn from(vid: Vid) -> u16 {
        vid.to_u16()
    }
}

impl TryFrom<u16> for Vid {
    type Error = InvalidVid;

    fn try_from(vid: u16) -> Result<Vid, Self::Error> {
        Vid::new(vid)
    }
}

impl Display for Vid {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.to_u16())
    }
}

/// The VLAN a VF tags its traffic with.
///
/// Unlike [`Vid`], zero is legal here: it is how the kernel reports (and how one requests) an
/// untagged VF.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u16", into = "u16"))]
pub struct VfVlan(u16);

impl VfVlan {
    /// No VLAN tagging.
    pub const UNTAGGED: VfVlan = VfVlan(0);

    /// Validate a VF VLAN id (`0..=4094`).
    ///
    /// # Errors
    ///
    /// Returns an error if `vlan` is 4095 or larger.
    pub fn new(vlan: u16) -> Result<Self, InvalidVid> {
        match Vid::new(vlan) {
            Ok(vid) => Ok(VfVlan(vid.to_u16())),
            Err(InvalidVid::Zero) => Ok(VfVlan::UNTAGGED),
            Err(err) => Err(err),
        }
    }

    /// The tagging [`Vid`], or `None` if untagged.
    #[must_use]
    pub fn vid(self) -> Option<Vid> {
        Vid::new(self.0).ok()
    }

    /// The raw value handed to the kernel.
    #[must_use]
    pub fn to_u16(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for VfVlan {
    type Error = InvalidVid;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        VfVlan::new(value)
    }
}

impl From<VfVlan> for u16 {
    fn from(value: VfVlan) -> Self {
        value.0
    }
}

impl Display for VfVlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Priority Code Point (the VLAN `QoS` field).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct Pcp(u8);

/// Returned when a priority code point does not fit in three bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0} is not a legal priority code point (max 7)")]
pub struct InvalidPcp(pub u8);

impl Pcp {
    /// The default priority.
    pub const ZERO: Pcp = Pcp(0);
    /// The highest legal priority.
    pub const MAX: Pcp = Pcp(7);

    /// Validate a priority code point.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPcp`] if `pcp` is larger than 7.
    pub fn new(pcp: u8) -> Result<Self, InvalidPcp> {
        if pcp > Pcp::MAX.0 {
            return Err(InvalidPcp(pcp));
        }
        Ok(Pcp(pcp))
    }

    /// The raw value.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Pcp {
    type Error = InvalidPcp;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Pcp::new(value)
    }
}

impl From<Pcp> for u8 {
    fn from(value: Pcp) -> Self {
        value.0
    }
}

/// The tag protocol a VF uses for its VLAN.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub enum VlanProto {
    /// Customer tag (`802.1q`, ethertype `0x8100`).
    #[default]
    Dot1Q,
    /// Service tag (`802.1ad`, ethertype `0x88a8`).
    Dot1Ad,
}

/// Returned when a VLAN protocol is neither `802.1q` nor `802.1ad`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid vlan protocol '{0}': expected 802.1q or 802.1ad")]
pub struct InvalidVlanProto(pub String);

impl VlanProto {
    /// Ethertype of an `802.1q` tag.
    pub const DOT1Q_ETHERTYPE: u16 = 0x8100;
    /// Ethertype of an `802.1ad` tag.
    pub const DOT1AD_ETHERTYPE: u16 = 0x88a8;

    /// The tag ethertype handed to the kernel.
    #[must_use]
    pub fn ethertype(self) -> u16 {
        match self {
            VlanProto::Dot1Q => Self::DOT1Q_ETHERTYPE,
            VlanProto::Dot1Ad => Self::DOT1AD_ETHERTYPE,
        }
    }

    /// Map a kernel reported ethertype back to a protocol.
    #[must_use]
    pub fn from_ethertype(ethertype: u16) -> Option<VlanProto> {
        match ethertype {
            Self::DOT1Q_ETHERTYPE => Some(VlanProto::Dot1Q),
            Self::DOT1AD_ETHERTYPE => Some(VlanProto::Dot1Ad),
            _ => None,
        }
    }
}

impl FromStr for VlanProto {
    type Err = InvalidVlanProto;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "802.1q" => Ok(VlanProto::Dot1Q),
            "802.1ad" => Ok(VlanProto::Dot1Ad),
            _ => Err(InvalidVlanProto(s.to_string())),
        }
    }
}

impl TryFrom<String> for VlanProto {
    type Error = InvalidVlanProto;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VlanProto::from_str(&value)
    }
}

impl From<VlanProto> for String {
    fn from(value: VlanProto) -> Self {
        value.to_string()
    }
}

impl Display for VlanProto {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            VlanProto::Dot1Q => f.write_str("802.1q"),
            VlanProto::Dot1Ad => f.write_str("802.1ad"),
        }
    }
}

/// An inclusive range of [`Vid`]s.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VidRange {
    start: Vid,
    end: Vid,
}

impl VidRange {
    /// Build a range.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidVlanTrunk::Inverted`] if `start > end`.
    pub fn new(start: Vid, end: Vid) -> Result<Self, InvalidVlanTrunk> {
        if start > end {
            return Err(InvalidVlanTrunk::Inverted(start, end));
        }
        Ok(VidRange { start, end })
    }

    /// First [`Vid`] of the range.
    #[must_use]
    pub fn start(&self) -> Vid {
        self.start
    }

    /// Last [`Vid`] of the range.
    #[must_use]
    pub fn end(&self) -> Vid {
        self.end
    }
}

impl Display for VidRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// The set of VLANs a VF is allowed to carry in trunk mode, e.g. `1,4-6,10`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct VlanTrunk(Vec<VidRange>);

/// Errors which can occur while parsing a [`VlanTrunk`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidVlanTrunk {
    /// The trunk string is empty.
    #[error("vlan trunk must not be empty")]
    Empty,
    /// An element is not a number or a `a-b` range of numbers.
    #[error("invalid vlan trunk element '{0}'")]
    Syntax(String),
    /// An element is not a legal [`Vid`].
    #[error("invalid vlan in trunk: {0}")]
    Vid(#[from] InvalidVid),
    /// A range whose start is above its end.
    #[error("vlan trunk range {0}-{1} is inverted")]
    Inverted(Vid, Vid),
}

impl VlanTrunk {
    /// The ranges in the order they were given.
    #[must_use]
    pub fn ranges(&self) -> &[VidRange] {
        &self.0
    }
}

fn parse_trunk_vid(element: &str) -> Result<Vid, InvalidVlanTrunk> {
    if element.is_empty() || !element.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InvalidVlanTrunk::Syntax(element.to_string()));
    }
    let raw = element
        .parse::<u16>()
        .map_err(|_| InvalidVlanTrunk::Syntax(element.to_string()))?;
    Ok(Vid::new(raw)?)
}

impl FromStr for VlanTrunk {
    type Err = InvalidVlanTrunk;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(InvalidVlanTrunk::Empty);
        }
        s.split(',')
            .map(|element| match element.split_once('-') {
                Some((start, end)) => {
                    VidRange::new(parse_trunk_vid(start)?, parse_trunk_vid(end)?)
                }
                None => {
                    let vid = parse_trunk_vid(element)?;
                    VidRange::new(vid, vid)
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(VlanTrunk)
    }
}

impl TryFrom<String> for VlanTrunk {
    type Error = InvalidVlanTrunk;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VlanTrunk::from_str(&value)
    }
}

impl From<VlanTrunk> for String {
    fn from(value: VlanTrunk) -> Self {
        value.to_string()
    }
}

impl Display for VlanTrunk {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        for (i, range) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}
