// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::{ConfigError, VfRequest};
use net::eth::mac::Mac;
use net::interface::InterfaceName;
use net::vf::{VfId, VfLinkState, VfRate};
use net::vlan::{Pcp, VfVlan, VlanProto};
use serde::{Deserialize, Serialize};
use sysfs::{Driver, SriovFacts};
use tracing::{debug, instrument};

/// A VF as it was before we touched it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrigVfState {
    /// Name of the VF netdev in the host namespace.
    pub host_if_name: Option<InterfaceName>,
    /// The runtime MAC of the VF netdev.
    pub effective_mac: Option<Mac>,
    /// The MAC the PF enforces on the VF.
    pub admin_mac: Mac,
    pub vlan: VfVlan,
    pub qos: Pcp,
    /// Some drivers do not report a protocol.
    pub proto: Option<VlanProto>,
    pub rate: VfRate,
    pub spoofchk: bool,
    pub trust: bool,
    pub link_state: VfLinkState,
}

/// A request resolved against the host, plus the state needed to undo it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VfConfig {
    pub request: VfRequest,
    pub pf_name: InterfaceName,
    pub vf_id: VfId,
    /// The VF is bound to a userspace driver and has no netdev to move.
    pub dpdk_mode: bool,
    pub orig: OrigVfState,
}

impl VfConfig {
    /// Resolve the PF, VF id and host netdev of the requested device.
    ///
    /// A VF without a netdev is only acceptable if it is bound to one of `userspace_drivers`, in
    /// which case the config is switched to DPDK mode.
    #[instrument(level = "debug", skip(facts, userspace_drivers))]
    pub fn resolve(
        request: VfRequest,
        facts: &impl SriovFacts,
        userspace_drivers: &[Driver],
    ) -> Result<Self, ConfigError> {
        let device = request.device_id;
        let sysfs = |source| ConfigError::Sysfs { device, source };
        let pf_name = facts.pf_name(device).map_err(sysfs)?;
        let vf_id = facts.vf_id(device).map_err(sysfs)?;
        let netdevs = facts.netdevs(device).map_err(sysfs)?;
        let mut orig = OrigVfState::default();
        let dpdk_mode = match netdevs.into_iter().next() {
            Some(name) => {
                orig.host_if_name = Some(name);
                false
            }
            None => {
                let driver = facts.driver(device).map_err(sysfs)?;
                if !userspace_drivers.contains(&driver) {
                    return Err(ConfigError::NoInterface { device, driver });
                }
                debug!("{device} is bound to {driver}, using dpdk mode");
                true
            }
        };
        Ok(VfConfig {
            request,
            pf_name,
            vf_id,
            dpdk_mode,
            orig,
        })
    }

    /// The MAC to report for the interface in the CNI result.
    #[must_use]
    pub fn result_mac(&self) -> Option<Mac> {
        if let Some(mac) = self.request.mac {
            return Some(mac);
        }
        if self.dpdk_mode {
            Some(self.orig.admin_mac).filter(|mac| !mac.is_zero())
        } else {
            self.orig.effective_mac
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{ConfigError, NetConf, OrigVfState, VfConfig, VfRequest};
    use net::eth::mac::Mac;
    use net::pci::PciAddress;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;
    use sysfs::Driver;
    use sysfs::fake::FakeSysfs;

    fn request(device: &str) -> VfRequest {
        let conf = NetConf::from_slice(format!(r#"{{"deviceID":"{device}"}}"#).as_bytes()).unwrap();
        VfRequest::from_net_conf(&conf, None).unwrap()
    }

    fn tree() -> FakeSysfs {
        let fake = FakeSysfs::new().unwrap();
        let pci = |s| PciAddress::from_str(s).unwrap();
        fake.add_pf("enp175s0f1", pci("0000:af:00.1")).unwrap();
        fake.add_vf("enp175s0f1", 0, pci("0000:af:06.0"), Some("enp175s0f1v0"), "iavf")
            .unwrap();
        fake.add_vf("enp175s0f1", 3, pci("0000:af:06.3"), None, "vfio-pci")
            .unwrap();
        fake.add_vf("enp175s0f1", 4, pci("0000:af:06.4"), None, "iavf")
            .unwrap();
        fake
    }

    #[test]
    fn resolves_kernel_mode_vf() {
        let fake = tree();
        let config =
            VfConfig::resolve(request("0000:af:06.0"), &fake.sysfs(), &Driver::userspace())
                .unwrap();
        assert_eq!(config.pf_name.as_str(), "enp175s0f1");
        assert_eq!(config.vf_id, 0);
        assert!(!config.dpdk_mode);
        assert_eq!(
            config.orig.host_if_name.as_ref().map(|n| n.as_str()),
            Some("enp175s0f1v0")
        );
    }

    #[test]
    fn resolves_dpdk_mode_vf() {
        let fake = tree();
        let config =
            VfConfig::resolve(request("0000:af:06.3"), &fake.sysfs(), &Driver::userspace())
                .unwrap();
        assert!(config.dpdk_mode);
        assert_eq!(config.vf_id, 3);
        assert!(config.orig.host_if_name.is_none());
    }

    #[test]
    fn rejects_vf_without_netdev_or_userspace_driver() {
        let fake = tree();
        assert!(matches!(
            VfConfig::resolve(request("0000:af:06.4"), &fake.sysfs(), &Driver::userspace()),
            Err(ConfigError::NoInterface {
                driver: Driver::Iavf,
                ..
            })
        ));
        assert!(matches!(
            VfConfig::resolve(request("0000:af:09.0"), &fake.sysfs(), &Driver::userspace()),
            Err(ConfigError::Sysfs { .. })
        ));
    }

    #[test]
    fn result_mac_selection() {
        let requested = Mac::from_str("02:00:00:00:00:01").unwrap();
        let effective = Mac::from_str("02:00:00:00:00:02").unwrap();
        let admin = Mac::from_str("02:00:00:00:00:03").unwrap();
        let mut config = VfConfig {
            request: request("0000:af:06.0"),
            pf_name: "enp175s0f1".try_into().unwrap(),
            vf_id: 0,
            dpdk_mode: false,
            orig: OrigVfState {
                effective_mac: Some(effective),
                admin_mac: admin,
                ..OrigVfState::default()
            },
        };
        assert_eq!(config.result_mac(), Some(effective));
        config.dpdk_mode = true;
        assert_eq!(config.result_mac(), Some(admin));
        config.orig.admin_mac = Mac::ZERO;
        assert_eq!(config.result_mac(), None);
        config.request.mac = Some(requested);
        assert_eq!(config.result_mac(), Some(requested));
    }
}
