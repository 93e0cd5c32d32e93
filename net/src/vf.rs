// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Virtual function attributes.

use core::fmt::{Display, Formatter};
use core::str::FromStr;

/// Index of a virtual function on its physical function.
pub type VfId = u32;

/// The administrative link state the physical function enforces on a VF.
///
/// The kernel encodes this as a plain integer; values the driver reports that we do not know
/// are kept as [`VfLinkState::Other`] so they can be restored unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "u32", into = "u32"))]
pub enum VfLinkState {
    /// Follow the link state of the physical function.
    #[default]
    Auto,
    /// Force the VF link up.
    Enable,
    /// Force the VF link down.
    Disable,
    /// A driver specific value.
    Other(u32),
}

/// Returned when a requested link state is not one of `auto`, `enable` or `disable`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid link state '{0}': expected auto, enable or disable")]
pub struct InvalidVfLinkState(pub String);

impl From<u32> for VfLinkState {
    fn from(value: u32) -> Self {
        match value {
            0 => VfLinkState::Auto,
            1 => VfLinkState::Enable,
            2 => VfLinkState::Disable,
            other => VfLinkState::Other(other),
        }
    }
}

impl From<VfLinkState> for u32 {
    fn from(value: VfLinkState) -> Self {
        match value {
            VfLinkState::Auto => 0,
            VfLinkState::Enable => 1,
            VfLinkState::Disable => 2,
            VfLinkState::Other(other) => other,
        }
    }
}

impl FromStr for VfLinkState {
    type Err = InvalidVfLinkState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(VfLinkState::Auto),
            "enable" => Ok(VfLinkState::Enable),
            "disable" => Ok(VfLinkState::Disable),
            _ => Err(InvalidVfLinkState(s.to_string())),
        }
    }
}

impl Display for VfLinkState {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            VfLinkState::Auto => f.write_str("auto"),
            VfLinkState::Enable => f.write_str("enable"),
            VfLinkState::Disable => f.write_str("disable"),
            VfLinkState::Other(other) => write!(f, "{other}"),
        }
    }
}

/// Transmit rate limits of a VF in Mbps.  Zero means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VfRate {
    /// Guaranteed minimum rate.
    pub min_tx_rate: u32,
    /// Maximum rate.
    pub max_tx_rate: u32,
}
