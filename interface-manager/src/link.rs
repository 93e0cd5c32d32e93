// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Link queries and mutations.

use ipnet::IpNet;
use net::eth::mac::Mac;
use net::interface::{InterfaceIndex, InterfaceName};
use net::vf::{VfId, VfLinkState, VfRate};
use net::vlan::{Pcp, VfVlan, VlanProto};
use std::net::IpAddr;

/// What we need to know about a netdev.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub index: InterfaceIndex,
    pub name: InterfaceName,
    /// The effective (runtime) hardware address.
    pub mac: Option<Mac>,
    pub carrier: bool,
}

/// The administrative state a PF holds for one of its VFs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VfState {
    pub mac: Mac,
    pub vlan: VfVlan,
    pub qos: Pcp,
    /// `None` if the driver does not report a tag protocol.
    pub proto: Option<VlanProto>,
    pub rate: VfRate,
    pub spoofchk: bool,
    pub trust: bool,
    pub link_state: VfLinkState,
}

/// A route handed out by IPAM.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub destination: IpNet,
    pub gateway: Option<IpAddr>,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link {0} not found")]
    NotFound(String),
    #[error("{pf} has no virtual function {vf}")]
    VfNotFound { pf: InterfaceName, vf: VfId },
    #[error("netlink request failed: {0}")]
    Netlink(#[from] rtnetlink::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("kernel reported a malformed link: {0}")]
    Malformed(String),
    #[error("{0} was rejected")]
    Rejected(String),
}

/// Link operations in the network namespace the implementation is bound to.
///
/// PF-side VF operations take the PF [`LinkInfo`]; netdev operations take the index of a link in
/// the bound namespace.
pub trait LinkOps {
    /// Handle to a network namespace links can be moved to.
    type Netns;

    fn link_by_name(&self, name: &InterfaceName) -> Result<LinkInfo, LinkError>;
    fn vf_state(&self, pf: &InterfaceName, vf: VfId) -> Result<VfState, LinkError>;

    fn set_vf_vlan(
        &self,
        pf: &LinkInfo,
        vf: VfId,
        vlan: VfVlan,
        qos: Pcp,
        proto: VlanProto,
    ) -> Result<(), LinkError>;
    fn set_vf_mac(&self, pf: &LinkInfo, vf: VfId, mac: Mac) -> Result<(), LinkError>;
    fn set_vf_rate(&self, pf: &LinkInfo, vf: VfId, rate: VfRate) -> Result<(), LinkError>;
    fn set_vf_spoofchk(&self, pf: &LinkInfo, vf: VfId, enabled: bool) -> Result<(), LinkError>;
    fn set_vf_trust(&self, pf: &LinkInfo, vf: VfId, enabled: bool) -> Result<(), LinkError>;
    fn set_vf_link_state(
        &self,
        pf: &LinkInfo,
        vf: VfId,
        state: VfLinkState,
    ) -> Result<(), LinkError>;

    fn set_up(&self, link: InterfaceIndex) -> Result<(), LinkError>;
    fn set_down(&self, link: InterfaceIndex) -> Result<(), LinkError>;
    fn rename(&self, link: InterfaceIndex, name: &InterfaceName) -> Result<(), LinkError>;
    fn set_mac(&self, link: InterfaceIndex, mac: Mac) -> Result<(), LinkError>;
    fn move_to(&self, link: InterfaceIndex, netns: &Self::Netns) -> Result<(), LinkError>;

    fn add_address(&self, link: InterfaceIndex, address: IpNet) -> Result<(), LinkError>;
    fn add_route(&self, link: InterfaceIndex, route: &Route) -> Result<(), LinkError>;

    /// Have the kernel announce address changes of `link` (`arp_notify` / `ndisc_notify`).
    fn enable_neighbor_notify(&self, link: &InterfaceName) -> Result<(), LinkError>;
}
