// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! ADD, DEL and CHECK against the in-memory kernel and a fake sysfs tree.

use config::{NetConf, PluginConfig, PluginConfigBuilder};
use interface_manager::mock::{HOST, LinkCall, LinkOp, MockNamespaces};
use interface_manager::{LinkOps, NamespaceOps, Route, VfState};
use ipnet::IpNet;
use net::eth::mac::Mac;
use net::interface::InterfaceName;
use net::pci::PciAddress;
use net::vf::{VfLinkState, VfRate};
use net::vlan::{Pcp, VfVlan, VlanProto};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use sriov::cni::{CniError, CniResult};
use sriov::{
    AllocatorError, Invocation, IpamDelegate, IpamError, OpenTransmit, Plugin, PluginError,
    StateStore, Transmit, VfError,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use sysfs::Sysfs;
use sysfs::fake::FakeSysfs;
use tempfile::TempDir;

const PF: &str = "enp175s0f1";
const PF_MAC: Mac = Mac([0x3c, 0xfd, 0xfe, 0, 0, 1]);
const VF_NETDEV: &str = "enp175s0f1v2";
const VF_PCI: &str = "0000:af:06.2";
const VF_MAC: Mac = Mac([0x02, 0xaa, 0, 0, 0, 2]);
const DPDK_PCI: &str = "0000:af:06.3";
const CONTAINER: &str = "4f1c0a2b9d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IpamCall {
    Add,
    Del,
    Check,
}

/// Hands out one fixed result and remembers what it was asked.
#[derive(Debug, Default)]
struct FakeIpam {
    result: CniResult,
    refuse: Option<u32>,
    calls: Mutex<Vec<IpamCall>>,
}

impl FakeIpam {
    fn calls(&self) -> Vec<IpamCall> {
        self.calls.lock().clone()
    }
}

impl IpamDelegate for FakeIpam {
    fn add(&self, plugin: &str, _: &[u8]) -> Result<CniResult, IpamError> {
        self.calls.lock().push(IpamCall::Add);
        if let Some(code) = self.refuse {
            return Err(IpamError::Failed {
                plugin: plugin.to_string(),
                error: CniError {
                    cni_version: "1.0.0".to_string(),
                    code,
                    msg: "pool exhausted".to_string(),
                    details: String::new(),
                },
            });
        }
        Ok(self.result.clone())
    }

    fn del(&self, _: &str, _: &[u8]) -> Result<(), IpamError> {
        self.calls.lock().push(IpamCall::Del);
        Ok(())
    }

    fn check(&self, _: &str, _: &[u8]) -> Result<(), IpamError> {
        self.calls.lock().push(IpamCall::Check);
        Ok(())
    }
}

/// Every frame sent on any link.
#[derive(Debug, Clone, Default)]
struct Wire(Arc<Mutex<Vec<Vec<u8>>>>);

impl Transmit for Wire {
    fn transmit(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.0.lock().push(frame.to_vec());
        Ok(())
    }
}

impl OpenTransmit for Wire {
    type Tx = Wire;

    fn open(&self, _: &InterfaceName) -> std::io::Result<Wire> {
        Ok(self.clone())
    }
}

impl Wire {
    fn frames(&self) -> Vec<Vec<u8>> {
        self.0.lock().clone()
    }
}

fn pci(address: &str) -> PciAddress {
    PciAddress::from_str(address).unwrap()
}

fn original() -> VfState {
    VfState {
        spoofchk: true,
        link_state: VfLinkState::Auto,
        ..VfState::default()
    }
}

struct Rig {
    kernel: MockNamespaces,
    _fake: FakeSysfs,
    sysfs: Sysfs,
    data: TempDir,
    config: PluginConfig,
    ipam: FakeIpam,
    wire: Wire,
    netns: PathBuf,
}

impl Rig {
    fn new() -> Self {
        let kernel = MockNamespaces::new();
        kernel.add_pf(PF, PF_MAC, 8);
        kernel.add_link(HOST, VF_NETDEV, VF_MAC);
        kernel.set_vf_state(PF, 2, original());
        kernel.set_vf_state(
            PF,
            3,
            VfState {
                mac: Mac([0x02, 0xdd, 0, 0, 0, 3]),
                ..original()
            },
        );
        let netns = kernel.add_namespace("pod");

        let fake = FakeSysfs::new().unwrap();
        fake.add_pf(PF, pci("0000:af:00.1")).unwrap();
        fake.add_vf(PF, 2, pci(VF_PCI), Some(VF_NETDEV), "iavf")
            .unwrap();
        fake.add_vf(PF, 3, pci(DPDK_PCI), None, "vfio-pci").unwrap();
        let sysfs = fake.sysfs();

        let data = tempfile::tempdir().unwrap();
        let config = PluginConfigBuilder::default()
            .data_dir(data.path())
            .lock_timeout(Duration::from_millis(200))
            .carrier_wait(Duration::from_millis(10))
            .mac_verify_interval(Duration::from_millis(1))
            .build()
            .unwrap();

        let ipam = FakeIpam {
            result: serde_json::from_value(json!({
                "cniVersion": "1.0.0",
                "ips": [{"address": "10.56.217.11/24", "gateway": "10.56.217.1"}],
                "routes": [{"dst": "0.0.0.0/0"}],
            }))
            .unwrap(),
            ..FakeIpam::default()
        };

        Rig {
            kernel,
            _fake: fake,
            sysfs,
            data,
            config,
            ipam,
            wire: Wire::default(),
            netns,
        }
    }

    fn plugin(&self) -> Plugin<'_, MockNamespaces, Sysfs, FakeIpam, Wire> {
        Plugin::new(&self.config, &self.kernel, &self.sysfs, &self.ipam, &self.wire)
    }

    fn invocation(&self, conf: &serde_json::Value) -> Invocation {
        let stdin = serde_json::to_vec(conf).unwrap();
        Invocation {
            container_id: CONTAINER.to_string(),
            ifname: InterfaceName::try_from("net1").unwrap(),
            netns: Some(self.netns.clone()),
            cni_args_mac: None,
            conf: NetConf::from_slice(&stdin).unwrap(),
            stdin,
        }
    }

    fn record(&self, address: &str) -> PathBuf {
        self.data.path().join("pci").join(address)
    }

    fn cache(&self) -> PathBuf {
        self.data.path().join(format!("{CONTAINER}-net1"))
    }
}

fn vlan_conf() -> serde_json::Value {
    json!({
        "cniVersion": "1.0.0",
        "name": "sriov-net",
        "type": "sriov",
        "deviceID": VF_PCI,
        "vlan": 1259,
        "vlanQoS": 5,
        "spoofchk": "off",
        "max_tx_rate": 40,
        "ipam": {"type": "host-local"},
    })
}

#[test]
fn attach_configures_moves_and_addresses() {
    let rig = Rig::new();
    let inv = rig.invocation(&vlan_conf());
    let result = rig.plugin().attach(&inv).unwrap();

    let pf = InterfaceName::try_from(PF).unwrap();
    let vf_calls: Vec<_> = rig
        .kernel
        .calls()
        .into_iter()
        .filter(|call| {
            matches!(
                call,
                LinkCall::SetVfVlan { .. }
                    | LinkCall::SetVfMac { .. }
                    | LinkCall::SetVfRate { .. }
                    | LinkCall::SetVfSpoofchk { .. }
                    | LinkCall::SetVfTrust { .. }
                    | LinkCall::SetVfLinkState { .. }
            )
        })
        .collect();
    assert_eq!(
        vf_calls,
        vec![
            LinkCall::SetVfVlan {
                pf: pf.clone(),
                vf: 2,
                vlan: VfVlan::new(1259).unwrap(),
                qos: Pcp::new(5).unwrap(),
                proto: VlanProto::Dot1Q,
            },
            LinkCall::SetVfRate {
                pf: pf.clone(),
                vf: 2,
                rate: VfRate {
                    min_tx_rate: 0,
                    max_tx_rate: 40,
                },
            },
            LinkCall::SetVfSpoofchk {
                pf,
                vf: 2,
                enabled: false,
            },
        ]
    );

    assert!(rig.kernel.link(HOST, VF_NETDEV).is_none());
    let pod = rig.kernel.link("pod", "net1").unwrap();
    assert!(pod.up);
    assert_eq!(pod.mac, VF_MAC);
    assert_eq!(
        pod.addresses,
        vec![IpNet::from_str("10.56.217.11/24").unwrap()]
    );
    assert_eq!(
        pod.routes,
        vec![Route {
            destination: IpNet::from_str("0.0.0.0/0").unwrap(),
            gateway: Some(IpAddr::from_str("10.56.217.1").unwrap()),
        }]
    );

    assert_eq!(result.cni_version, "1.0.0");
    assert_eq!(result.interfaces.len(), 1);
    assert_eq!(result.interfaces[0].name, "net1");
    assert_eq!(result.interfaces[0].mac, Some(VF_MAC));
    assert_eq!(
        result.interfaces[0].sandbox.as_deref(),
        Some(rig.netns.to_str().unwrap())
    );
    assert_eq!(result.ips[0].interface, Some(0));

    assert_eq!(
        std::fs::read_to_string(rig.record(VF_PCI)).unwrap(),
        rig.netns.to_str().unwrap()
    );
    assert!(rig.cache().exists());
    assert_eq!(rig.ipam.calls(), vec![IpamCall::Add]);

    // one gratuitous arp for the one address
    let frames = rig.wire.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0][12..14], [0x08, 0x06]);
}

#[test]
fn detach_restores_everything() {
    let rig = Rig::new();
    let inv = rig.invocation(&vlan_conf());
    rig.plugin().attach(&inv).unwrap();
    rig.kernel.clear_calls();

    rig.plugin().detach(&inv).unwrap();
    let state = rig.kernel.vf_state(PF, 2).unwrap();
    assert_eq!(
        state,
        VfState {
            proto: Some(VlanProto::Dot1Q),
            ..original()
        }
    );
    assert_eq!(rig.kernel.count(LinkOp::SetVfTrust), 0);
    assert_eq!(rig.kernel.count(LinkOp::SetVfLinkState), 0);
    assert_eq!(rig.kernel.count(LinkOp::SetVfMac), 0);

    let host = rig.kernel.link(HOST, VF_NETDEV).unwrap();
    assert_eq!(host.mac, VF_MAC);
    assert!(!host.up);
    assert!(rig.kernel.link("pod", "net1").is_none());
    assert!(!rig.record(VF_PCI).exists());
    assert!(!rig.cache().exists());
    assert_eq!(rig.ipam.calls(), vec![IpamCall::Add, IpamCall::Del]);

    // nothing cached, nothing to do
    rig.kernel.clear_calls();
    rig.plugin().detach(&inv).unwrap();
    assert!(rig.kernel.calls().is_empty());
    assert_eq!(rig.ipam.calls().len(), 2);
}

#[test]
fn unset_properties_are_never_touched() {
    let rig = Rig::new();
    let inv = rig.invocation(&json!({
        "cniVersion": "1.0.0",
        "name": "sriov-net",
        "type": "sriov",
        "deviceID": VF_PCI,
        "ipam": {"type": "host-local"},
    }));
    rig.plugin().attach(&inv).unwrap();
    rig.plugin().detach(&inv).unwrap();
    for op in [
        LinkOp::SetVfVlan,
        LinkOp::SetVfMac,
        LinkOp::SetVfRate,
        LinkOp::SetVfSpoofchk,
        LinkOp::SetVfTrust,
        LinkOp::SetVfLinkState,
        LinkOp::SetMac,
    ] {
        assert_eq!(rig.kernel.count(op), 0, "{op:?}");
    }
    assert_eq!(rig.kernel.vf_state(PF, 2).unwrap(), original());
    assert!(rig.kernel.link(HOST, VF_NETDEV).is_some());
}

#[test]
fn requested_mac_is_restored() {
    let rig = Rig::new();
    let mut conf = vlan_conf();
    conf["mac"] = json!("02:bb:00:00:00:0a");
    let inv = rig.invocation(&conf);
    let result = rig.plugin().attach(&inv).unwrap();
    let requested = Mac::from_str("02:bb:00:00:00:0a").unwrap();
    assert_eq!(result.interfaces[0].mac, Some(requested));
    assert_eq!(rig.kernel.link("pod", "net1").unwrap().mac, requested);
    assert_eq!(rig.kernel.vf_state(PF, 2).unwrap().mac, requested);

    rig.plugin().detach(&inv).unwrap();
    assert_eq!(rig.kernel.link(HOST, VF_NETDEV).unwrap().mac, VF_MAC);
    assert_eq!(rig.kernel.vf_state(PF, 2).unwrap().mac, Mac::ZERO);
}

#[test]
fn failed_ipam_rolls_back() {
    let mut rig = Rig::new();
    rig.ipam.refuse = Some(11);
    let inv = rig.invocation(&vlan_conf());
    let err = rig.plugin().attach(&inv).unwrap_err();
    assert!(matches!(err, PluginError::Ipam(IpamError::Failed { .. })));
    assert_eq!(err.code(), 11);

    assert_eq!(
        rig.kernel.vf_state(PF, 2).unwrap(),
        VfState {
            proto: Some(VlanProto::Dot1Q),
            ..original()
        }
    );
    assert!(rig.kernel.link(HOST, VF_NETDEV).is_some());
    assert!(rig.kernel.link_names("pod").is_empty());
    assert!(!rig.record(VF_PCI).exists());
    assert!(!rig.cache().exists());
    assert!(rig.wire.frames().is_empty());
    // whatever the delegate reserved before failing is handed back
    assert_eq!(rig.ipam.calls(), vec![IpamCall::Add, IpamCall::Del]);
}

#[test]
fn failed_addressing_releases_the_lease() {
    let rig = Rig::new();
    rig.kernel.fail(LinkOp::AddRoute);
    let inv = rig.invocation(&vlan_conf());
    let err = rig.plugin().attach(&inv).unwrap_err();
    assert!(matches!(err, PluginError::Addressing { .. }));
    assert_eq!(rig.ipam.calls(), vec![IpamCall::Add, IpamCall::Del]);
    assert!(rig.kernel.link(HOST, VF_NETDEV).is_some());
    assert!(!rig.record(VF_PCI).exists());
    assert!(!rig.cache().exists());
}

#[test]
fn failed_apply_still_resets() {
    let rig = Rig::new();
    rig.kernel.fail(LinkOp::SetVfSpoofchk);
    let inv = rig.invocation(&vlan_conf());
    let err = rig.plugin().attach(&inv).unwrap_err();
    assert!(matches!(
        err,
        PluginError::Vf(VfError::ConfigurationRejected { .. })
    ));
    // apply and reset each tried spoofchk once
    assert_eq!(rig.kernel.count(LinkOp::SetVfSpoofchk), 2);
    assert_eq!(rig.kernel.count(LinkOp::SetVfVlan), 2);
    assert_eq!(rig.kernel.count(LinkOp::Move), 0);
    assert!(rig.ipam.calls().is_empty());
}

#[test]
fn address_in_use() {
    let rig = Rig::new();
    let inv = rig.invocation(&vlan_conf());
    rig.plugin().attach(&inv).unwrap();
    rig.kernel.clear_calls();

    let mut other = inv.clone();
    other.container_id = "77aa01".to_string();
    let err = rig.plugin().attach(&other).unwrap_err();
    assert!(matches!(err, PluginError::AlreadyAllocated(_)));
    assert!(rig.kernel.calls().is_empty());
    assert!(rig.kernel.link("pod", "net1").is_some());
}

#[test]
fn stale_allocation_is_reclaimed() {
    let rig = Rig::new();
    let inv = rig.invocation(&vlan_conf());
    rig.plugin().attach(&inv).unwrap();

    // the pod dies without a DEL and the kernel hands the VF back
    rig.kernel.remove_namespace("pod");
    rig.kernel.add_link(HOST, VF_NETDEV, VF_MAC);
    let mut next = inv.clone();
    next.container_id = "77aa01".to_string();
    next.netns = Some(rig.kernel.add_namespace("pod2"));
    rig.plugin().attach(&next).unwrap();
    assert!(rig.kernel.link("pod2", "net1").is_some());
    assert_eq!(
        std::fs::read_to_string(rig.record(VF_PCI)).unwrap(),
        next.netns.unwrap().to_str().unwrap()
    );
}

#[test]
fn detach_after_namespace_is_gone() {
    let rig = Rig::new();
    let inv = rig.invocation(&vlan_conf());
    rig.plugin().attach(&inv).unwrap();
    rig.kernel.remove_namespace("pod");
    rig.kernel.clear_calls();

    rig.plugin().detach(&inv).unwrap();
    assert_eq!(rig.kernel.count(LinkOp::SetVfVlan), 1);
    assert_eq!(rig.kernel.count(LinkOp::Move), 0);
    assert!(!rig.record(VF_PCI).exists());
    assert!(!rig.cache().exists());
}

#[test]
fn detach_without_namespace_resets_the_vf() {
    let rig = Rig::new();
    let inv = rig.invocation(&vlan_conf());
    rig.plugin().attach(&inv).unwrap();
    rig.kernel.clear_calls();

    let mut gone = inv.clone();
    gone.netns = None;
    rig.plugin().detach(&gone).unwrap();
    assert_eq!(rig.ipam.calls(), vec![IpamCall::Add, IpamCall::Del]);
    assert_eq!(
        rig.kernel.vf_state(PF, 2).unwrap(),
        VfState {
            proto: Some(VlanProto::Dot1Q),
            ..original()
        }
    );
    assert_eq!(rig.kernel.count(LinkOp::Move), 0);
    assert!(rig.cache().exists());
    assert!(rig.record(VF_PCI).exists());

    // a later DEL with the namespace finishes the job
    rig.plugin().detach(&inv).unwrap();
    assert!(rig.kernel.link(HOST, VF_NETDEV).is_some());
    assert!(!rig.cache().exists());
    assert!(!rig.record(VF_PCI).exists());
}

#[test]
fn detach_with_corrupt_cache() {
    let rig = Rig::new();
    let inv = rig.invocation(&vlan_conf());
    rig.plugin().attach(&inv).unwrap();
    std::fs::write(rig.cache(), br#"{"request":"#).unwrap();
    rig.kernel.clear_calls();

    rig.plugin().detach(&inv).unwrap();
    assert!(!rig.cache().exists());
    assert!(rig.kernel.calls().is_empty());
    // retries see nothing left to do
    rig.plugin().detach(&inv).unwrap();
}

#[test]
fn detach_after_namespace_is_unmounted() {
    let rig = Rig::new();
    let inv = rig.invocation(&vlan_conf());
    rig.plugin().attach(&inv).unwrap();
    rig.kernel.unmount_namespace("pod");
    rig.kernel.clear_calls();

    rig.plugin().detach(&inv).unwrap();
    assert_eq!(rig.kernel.count(LinkOp::SetVfVlan), 1);
    assert_eq!(rig.kernel.count(LinkOp::Move), 0);
    assert!(!rig.record(VF_PCI).exists());
    assert!(!rig.cache().exists());
}

#[test]
fn unmounted_allocation_is_reclaimed() {
    let rig = Rig::new();
    let inv = rig.invocation(&vlan_conf());
    rig.plugin().attach(&inv).unwrap();

    rig.kernel.unmount_namespace("pod");
    rig.kernel.add_link(HOST, VF_NETDEV, VF_MAC);
    let mut next = inv.clone();
    next.container_id = "77aa01".to_string();
    next.netns = Some(rig.kernel.add_namespace("pod2"));
    rig.plugin().attach(&next).unwrap();
    assert!(rig.kernel.link("pod2", "net1").is_some());
}

#[test]
fn detach_of_missing_interface() {
    let rig = Rig::new();
    let inv = rig.invocation(&vlan_conf());
    rig.plugin().attach(&inv).unwrap();
    // something in the pod renamed it
    let pod = rig.kernel.open(&rig.netns).unwrap();
    rig.kernel
        .run_in(&pod, |links| {
            let link = links.link_by_name(&inv.ifname)?;
            links.rename(link.index, &InterfaceName::try_from("eth7").unwrap())
        })
        .unwrap()
        .unwrap();

    rig.plugin().detach(&inv).unwrap();
    assert!(!rig.record(VF_PCI).exists());
    assert!(!rig.cache().exists());
}

#[test]
fn detach_rejects_stale_cache() {
    let rig = Rig::new();
    let inv = rig.invocation(&vlan_conf());
    rig.plugin().attach(&inv).unwrap();

    let store = StateStore::new(rig.data.path());
    let ifname = InterfaceName::try_from("net1").unwrap();
    let mut cached = store.load(CONTAINER, &ifname).unwrap().unwrap();
    cached.vf_id = 5;
    store.save(CONTAINER, &ifname, &cached).unwrap();

    let err = rig.plugin().detach(&inv).unwrap_err();
    assert!(matches!(err, PluginError::StaleCache { vf: 5, .. }));
    assert!(rig.cache().exists());

    // in range, but a different function
    cached.vf_id = 3;
    store.save(CONTAINER, &ifname, &cached).unwrap();
    let err = rig.plugin().detach(&inv).unwrap_err();
    assert!(matches!(
        err,
        PluginError::StaleCache { vf: 3, pci, .. } if pci == self::pci(VF_PCI)
    ));
}

#[test]
fn attach_needs_a_namespace() {
    let rig = Rig::new();
    let mut inv = rig.invocation(&vlan_conf());
    inv.netns = None;
    let err = rig.plugin().attach(&inv).unwrap_err();
    assert_eq!(err.code(), PluginError::CODE_INVALID_ENV);

    inv.netns = Some(PathBuf::from("/var/run/netns/gone"));
    let err = rig.plugin().attach(&inv).unwrap_err();
    assert!(matches!(err, PluginError::NamespaceUnavailable { .. }));
    assert!(rig.kernel.calls().is_empty());
}

#[test]
fn contended_device() {
    let rig = Rig::new();
    let inv = rig.invocation(&vlan_conf());
    let allocator = sriov::PciAllocator::new(rig.data.path(), Duration::from_secs(1));
    let held = allocator.lock(pci(VF_PCI)).unwrap();
    let err = rig.plugin().attach(&inv).unwrap_err();
    assert!(matches!(
        err,
        PluginError::Allocator(AllocatorError::LockTimeout { .. })
    ));
    assert_eq!(err.code(), PluginError::CODE_TRY_AGAIN);
    assert!(rig.kernel.calls().is_empty());
    drop(held);
    rig.plugin().attach(&inv).unwrap();
}

#[test]
fn dpdk_device_stays_in_the_host() {
    let rig = Rig::new();
    let mut conf = vlan_conf();
    conf["deviceID"] = json!(DPDK_PCI);
    let inv = rig.invocation(&conf);
    let result = rig.plugin().attach(&inv).unwrap();
    assert_eq!(
        result.interfaces[0].mac,
        Some(Mac([0x02, 0xdd, 0, 0, 0, 3]))
    );
    assert_eq!(result.ips.len(), 1);
    assert_eq!(rig.kernel.count(LinkOp::Move), 0);
    assert_eq!(rig.kernel.count(LinkOp::AddAddress), 0);
    assert!(rig.wire.frames().is_empty());

    rig.plugin().check(&inv).unwrap();
    rig.plugin().detach(&inv).unwrap();
    assert!(!rig.record(DPDK_PCI).exists());
    assert_eq!(rig.kernel.vf_state(PF, 3).unwrap().vlan, VfVlan::UNTAGGED);
}

#[test]
fn check_follows_the_attachment() {
    let rig = Rig::new();
    let inv = rig.invocation(&vlan_conf());
    assert!(matches!(
        rig.plugin().check(&inv),
        Err(PluginError::NotAttached { .. })
    ));

    rig.plugin().attach(&inv).unwrap();
    rig.plugin().check(&inv).unwrap();
    assert_eq!(rig.ipam.calls(), vec![IpamCall::Add, IpamCall::Check]);

    std::fs::remove_file(rig.record(VF_PCI)).unwrap();
    assert!(matches!(
        rig.plugin().check(&inv),
        Err(PluginError::NotAllocated(_))
    ));
}
