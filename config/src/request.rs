// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{ConfigError, NetConf};
use net::eth::mac::Mac;
use net::pci::PciAddress;
use net::vf::{VfLinkState, VfRate};
use net::vlan::{Pcp, VfVlan, VlanProto, VlanTrunk};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// The VF properties a user asked for.
///
/// `None` means "leave alone": the property is neither set on attach nor restored on detach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VfRequest {
    pub device_id: PciAddress,
    pub vlan: Option<VfVlan>,
    pub qos: Option<Pcp>,
    pub proto: Option<VlanProto>,
    pub trunk: Option<VlanTrunk>,
    pub mac: Option<Mac>,
    pub min_tx_rate: Option<u32>,
    pub max_tx_rate: Option<u32>,
    pub spoofchk: Option<bool>,
    pub trust: Option<bool>,
    pub link_state: Option<VfLinkState>,
}

fn on_off(field: &'static str, value: Option<&str>) -> Result<Option<bool>, ConfigError> {
    match value {
        None => Ok(None),
        Some("on") => Ok(Some(true)),
        Some("off") => Ok(Some(false)),
        Some(other) => Err(ConfigError::OnOff {
            field,
            value: other.to_string(),
        }),
    }
}

fn rate(field: &'static str, value: Option<i64>) -> Result<Option<u32>, ConfigError> {
    value
        .map(|value| {
            if value < 0 {
                return Err(ConfigError::NegativeRate { field, value });
            }
            u32::try_from(value).map_err(|_| ConfigError::RateTooLarge { field, value })
        })
        .transpose()
}

impl VfRequest {
    /// Validate `conf`.
    ///
    /// `cni_args_mac` is the `MAC` key of `CNI_ARGS`; it loses to `runtimeConfig.mac` and wins
    /// over the `mac` key of the configuration.
    pub fn from_net_conf(conf: &NetConf, cni_args_mac: Option<Mac>) -> Result<Self, ConfigError> {
        let device_id = PciAddress::from_str(
            conf.device_id
                .as_deref()
                .ok_or(ConfigError::MissingDeviceId)?,
        )?;

        let (vlan, qos, proto) = match conf.vlan {
            None => {
                if conf.vlan_qos.is_some() {
                    return Err(ConfigError::QosWithoutVlan);
                }
                if conf.vlan_proto.is_some() {
                    return Err(ConfigError::ProtoWithoutVlan);
                }
                (None, None, None)
            }
            Some(raw) => {
                let vlan = u16::try_from(raw)
                    .ok()
                    .and_then(|vlan| VfVlan::new(vlan).ok())
                    .ok_or(ConfigError::Vlan(raw))?;
                let raw_qos = conf.vlan_qos.unwrap_or(0);
                let qos = u8::try_from(raw_qos)
                    .ok()
                    .and_then(|qos| Pcp::new(qos).ok())
                    .ok_or(ConfigError::Qos(raw_qos))?;
                let proto = match &conf.vlan_proto {
                    None => VlanProto::default(),
                    Some(proto) => VlanProto::from_str(proto)?,
                };
                if vlan == VfVlan::UNTAGGED && qos != Pcp::ZERO {
                    return Err(ConfigError::QosOnUntagged);
                }
                if vlan == VfVlan::UNTAGGED && proto == VlanProto::Dot1Ad {
                    return Err(ConfigError::ServiceTagOnUntagged);
                }
                (Some(vlan), Some(qos), Some(proto))
            }
        };

        let trunk = conf
            .vlan_trunk
            .as_deref()
            .map(VlanTrunk::from_str)
            .transpose()?;
        if trunk.is_some() && vlan.is_some_and(|vlan| vlan != VfVlan::UNTAGGED) {
            return Err(ConfigError::TrunkWithVlan);
        }

        let mac = match (&conf.runtime_config.mac, cni_args_mac, &conf.mac) {
            (Some(runtime), _, _) => Some(Mac::from_str(runtime)?),
            (None, Some(mac), _) => Some(mac),
            (None, None, Some(mac)) => Some(Mac::from_str(mac)?),
            (None, None, None) => None,
        };

        let min_tx_rate = rate("min_tx_rate", conf.min_tx_rate)?;
        let max_tx_rate = rate("max_tx_rate", conf.max_tx_rate)?;
        if let (Some(min), Some(max)) = (min_tx_rate, max_tx_rate)
            && max != 0
            && max < min
        {
            return Err(ConfigError::RateOrder { min, max });
        }

        let request = VfRequest {
            device_id,
            vlan,
            qos,
            proto,
            trunk,
            mac,
            min_tx_rate,
            max_tx_rate,
            spoofchk: on_off("spoofchk", conf.spoofchk.as_deref())?,
            trust: on_off("trust", conf.trust.as_deref())?,
            link_state: conf
                .link_state
                .as_deref()
                .map(VfLinkState::from_str)
                .transpose()?,
        };
        debug!("validated request: {request:?}");
        Ok(request)
    }

    /// True if either rate limit was requested.
    #[must_use]
    pub fn wants_rate(&self) -> bool {
        self.min_tx_rate.is_some() || self.max_tx_rate.is_some()
    }

    /// The rate limits to program, taking unset sides from `current`.
    #[must_use]
    pub fn rate_over(&self, current: VfRate) -> VfRate {
        VfRate {
            min_tx_rate: self.min_tx_rate.unwrap_or(current.min_tx_rate),
            max_tx_rate: self.max_tx_rate.unwrap_or(current.max_tx_rate),
        }
    }
}
