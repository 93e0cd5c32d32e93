// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use net::eth::mac::MacParseError;
use net::pci::{InvalidPciAddress, PciAddress};
use net::vf::InvalidVfLinkState;
use net::vlan::{InvalidVlanProto, InvalidVlanTrunk};
use sysfs::{Driver, SysfsError};

/// Errors found while decoding or validating the network configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to decode network configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("deviceID is required")]
    MissingDeviceId,
    #[error("invalid deviceID: {0}")]
    DeviceId(#[from] InvalidPciAddress),
    #[error("vlan {0} is out of range (0..=4094)")]
    Vlan(i64),
    #[error("vlanQoS {0} is out of range (0..=7)")]
    Qos(i64),
    #[error("vlanQoS requires vlan to be set")]
    QosWithoutVlan,
    #[error("vlanProto requires vlan to be set")]
    ProtoWithoutVlan,
    #[error("non-zero vlanQoS requires a non-zero vlan")]
    QosOnUntagged,
    #[error("802.1ad requires a non-zero vlan")]
    ServiceTagOnUntagged,
    #[error(transparent)]
    VlanProto(#[from] InvalidVlanProto),
    #[error("vlanTrunk: {0}")]
    VlanTrunk(#[from] InvalidVlanTrunk),
    #[error("vlanTrunk and a non-zero vlan are mutually exclusive")]
    TrunkWithVlan,
    #[error("invalid mac: {0}")]
    Mac(#[from] MacParseError),
    #[error("{field} must not be negative (got {value})")]
    NegativeRate { field: &'static str, value: i64 },
    #[error("{field} {value} is too large")]
    RateTooLarge { field: &'static str, value: i64 },
    #[error("max_tx_rate {max} is lower than min_tx_rate {min}")]
    RateOrder { min: u32, max: u32 },
    #[error("{field} must be 'on' or 'off' (got '{value}')")]
    OnOff { field: &'static str, value: String },
    #[error(transparent)]
    LinkState(#[from] InvalidVfLinkState),
    #[error("failed to resolve VF {device}: {source}")]
    Sysfs {
        device: PciAddress,
        #[source]
        source: SysfsError,
    },
    #[error("VF {device} has no network interface and is bound to {driver}, not a userspace driver")]
    NoInterface { device: PciAddress, driver: Driver },
}
