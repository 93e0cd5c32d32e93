// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! [`LinkOps`] over rtnetlink.

use crate::link::{LinkError, LinkInfo, LinkOps, Route, VfState};
use crate::netns::Netns;
use futures::TryStreamExt;
use ipnet::IpNet;
use net::eth::mac::Mac;
use net::interface::{InterfaceIndex, InterfaceName};
use net::vf::{VfId, VfLinkState, VfRate};
use net::vlan::{Pcp, VfVlan, VlanProto};
use nix::errno::Errno;
use rtnetlink::packet_route::link::{
    LinkAttribute, LinkExtentMask, LinkMessage, LinkVfInfo, VfInfo, VfInfoLinkState, VfInfoMac,
    VfInfoRate, VfInfoSpoofCheck, VfInfoTrust, VfVlan as KernelVfVlan, VfVlanInfo,
    VlanProtocol,
};
use rtnetlink::{Handle, LinkUnspec, RouteMessageBuilder};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::fd::AsRawFd;
use tokio::runtime::Runtime;
use tracing::{debug, instrument, trace};

/// An rtnetlink connection bound to the network namespace it was opened in.
///
/// Requests are driven to completion on a private current-thread runtime, so every method
/// blocks the caller until the kernel has answered.
pub struct RtNetlink {
    runtime: Runtime,
    handle: Handle,
}

impl std::fmt::Debug for RtNetlink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtNetlink").finish_non_exhaustive()
    }
}

fn link_info(message: &LinkMessage) -> Result<LinkInfo, LinkError> {
    let index = InterfaceIndex::try_new(message.header.index)
        .map_err(|e| LinkError::Malformed(e.to_string()))?;
    let mut name = None;
    let mut mac = None;
    let mut carrier = false;
    for attr in &message.attributes {
        match attr {
            LinkAttribute::IfName(ifname) => {
                name = Some(
                    InterfaceName::try_from(ifname.as_str())
                        .map_err(|e| LinkError::Malformed(e.to_string()))?,
                );
            }
            LinkAttribute::Address(address) => mac = Mac::try_from(address.as_slice()).ok(),
            LinkAttribute::Carrier(state) => carrier = *state != 0,
            _ => {}
        }
    }
    let name = name.ok_or_else(|| LinkError::Malformed(format!("link {index} has no name")))?;
    Ok(LinkInfo {
        index,
        name,
        mac,
        carrier,
    })
}

fn vf_entry(infos: &[VfInfo]) -> Option<(VfId, VfState)> {
    let mut id = None;
    let mut state = VfState::default();
    for info in infos {
        match info {
            VfInfo::Mac(mac) => {
                id = Some(mac.vf_id);
                state.mac = mac
                    .mac
                    .get(..6)
                    .and_then(|octets| Mac::try_from(octets).ok())
                    .unwrap_or_default();
            }
            VfInfo::Vlan(vlan) => {
                id.get_or_insert(vlan.vf_id);
                state.vlan = u16::try_from(vlan.vlan_id)
                    .ok()
                    .and_then(|vlan| VfVlan::new(vlan).ok())
                    .unwrap_or_default();
                state.qos = u8::try_from(vlan.qos)
                    .ok()
                    .and_then(|qos| Pcp::new(qos).ok())
                    .unwrap_or_default();
            }
            VfInfo::VlanList(list) => {
                for entry in list {
                    if let KernelVfVlan::Info(info) = entry {
                        state.proto = VlanProto::from_ethertype(u16::from(info.protocol));
                    }
                }
            }
            VfInfo::Rate(rate) => {
                state.rate = VfRate {
                    min_tx_rate: rate.min_tx_rate,
                    max_tx_rate: rate.max_tx_rate,
                };
            }
            VfInfo::SpoofCheck(check) => state.spoofchk = check.enabled,
            VfInfo::Trust(trust) => state.trust = trust.enabled,
            VfInfo::LinkState(link_state) => {
                state.link_state = VfLinkState::from(u32::from(link_state.state));
            }
            _ => {}
        }
    }
    id.map(|id| (id, state))
}

impl RtNetlink {
    /// Open a connection in the network namespace of the calling thread.
    pub fn connect() -> Result<Self, LinkError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;
        let handle = runtime.block_on(async {
            let (connection, handle, _) = rtnetlink::new_connection()?;
            tokio::spawn(connection);
            Ok::<_, std::io::Error>(handle)
        })?;
        Ok(RtNetlink { runtime, handle })
    }

    fn set(&self, message: LinkMessage) -> Result<(), LinkError> {
        Ok(self
            .runtime
            .block_on(self.handle.link().set(message).execute())?)
    }

    fn set_vf(&self, pf: &LinkInfo, info: VfInfo) -> Result<(), LinkError> {
        trace!("setting {info:?} on {}", pf.name);
        let mut message = LinkUnspec::new_with_index(pf.index.to_u32()).build();
        message
            .attributes
            .push(LinkAttribute::VfInfoList(vec![LinkVfInfo(vec![info])]));
        self.set(message)
    }

    fn get(&self, name: &InterfaceName, with_vfs: bool) -> Result<LinkMessage, LinkError> {
        let mut request = self.handle.link().get().match_name(name.to_string());
        if with_vfs {
            request
                .message_mut()
                .attributes
                .push(LinkAttribute::ExtMask(vec![LinkExtentMask::Vf]));
        }
        self.runtime.block_on(async {
            let mut response = request.execute();
            match response.try_next().await {
                Ok(Some(message)) => Ok(message),
                Ok(None) => Err(LinkError::NotFound(name.to_string())),
                Err(rtnetlink::Error::NetlinkError(err))
                    if err.raw_code() == -(Errno::ENODEV as i32) =>
                {
                    Err(LinkError::NotFound(name.to_string()))
                }
                Err(err) => Err(err.into()),
            }
        })
    }
}

impl LinkOps for RtNetlink {
    type Netns = Netns;

    fn link_by_name(&self, name: &InterfaceName) -> Result<LinkInfo, LinkError> {
        link_info(&self.get(name, false)?)
    }

    #[instrument(level = "debug", skip(self))]
    fn vf_state(&self, pf: &InterfaceName, vf: VfId) -> Result<VfState, LinkError> {
        let message = self.get(pf, true)?;
        for attr in &message.attributes {
            let LinkAttribute::VfInfoList(vfs) = attr else {
                continue;
            };
            for LinkVfInfo(infos) in vfs {
                if let Some((id, state)) = vf_entry(infos)
                    && id == vf
                {
                    debug!("{pf} vf {vf}: {state:?}");
                    return Ok(state);
                }
            }
        }
        Err(LinkError::VfNotFound { pf: pf.clone(), vf })
    }

    fn set_vf_vlan(
        &self,
        pf: &LinkInfo,
        vf: VfId,
        vlan: VfVlan,
        qos: Pcp,
        proto: VlanProto,
    ) -> Result<(), LinkError> {
        self.set_vf(
            pf,
            VfInfo::VlanList(vec![KernelVfVlan::Info(VfVlanInfo {
                vf_id: vf,
                vlan_id: u32::from(vlan.to_u16()),
                qos: u32::from(qos.to_u8()),
                protocol: VlanProtocol::from(proto.ethertype()),
            })]),
        )
    }

    fn set_vf_mac(&self, pf: &LinkInfo, vf: VfId, mac: Mac) -> Result<(), LinkError> {
        self.set_vf(pf, VfInfo::Mac(VfInfoMac::new(vf, &mac.0)))
    }

    fn set_vf_rate(&self, pf: &LinkInfo, vf: VfId, rate: VfRate) -> Result<(), LinkError> {
        self.set_vf(
            pf,
            VfInfo::Rate(VfInfoRate {
                vf_id: vf,
                min_tx_rate: rate.min_tx_rate,
                max_tx_rate: rate.max_tx_rate,
            }),
        )
    }

    fn set_vf_spoofchk(&self, pf: &LinkInfo, vf: VfId, enabled: bool) -> Result<(), LinkError> {
        self.set_vf(
            pf,
            VfInfo::SpoofCheck(VfInfoSpoofCheck { vf_id: vf, enabled }),
        )
    }

    fn set_vf_trust(&self, pf: &LinkInfo, vf: VfId, enabled: bool) -> Result<(), LinkError> {
        self.set_vf(pf, VfInfo::Trust(VfInfoTrust { vf_id: vf, enabled }))
    }

    fn set_vf_link_state(
        &self,
        pf: &LinkInfo,
        vf: VfId,
        state: VfLinkState,
    ) -> Result<(), LinkError> {
        self.set_vf(
            pf,
            VfInfo::LinkState(VfInfoLinkState {
                vf_id: vf,
                state: u32::from(state).into(),
            }),
        )
    }

    fn set_up(&self, link: InterfaceIndex) -> Result<(), LinkError> {
        self.set(LinkUnspec::new_with_index(link.to_u32()).up().build())
    }

    fn set_down(&self, link: InterfaceIndex) -> Result<(), LinkError> {
        self.set(LinkUnspec::new_with_index(link.to_u32()).down().build())
    }

    fn rename(&self, link: InterfaceIndex, name: &InterfaceName) -> Result<(), LinkError> {
        self.set(
            LinkUnspec::new_with_index(link.to_u32())
                .name(name.to_string())
                .build(),
        )
    }

    fn set_mac(&self, link: InterfaceIndex, mac: Mac) -> Result<(), LinkError> {
        self.set(
            LinkUnspec::new_with_index(link.to_u32())
                .address(mac.0.to_vec())
                .build(),
        )
    }

    fn move_to(&self, link: InterfaceIndex, netns: &Netns) -> Result<(), LinkError> {
        self.set(
            LinkUnspec::new_with_index(link.to_u32())
                .setns_by_fd(netns.as_raw_fd())
                .build(),
        )
    }

    fn add_address(&self, link: InterfaceIndex, address: IpNet) -> Result<(), LinkError> {
        Ok(self.runtime.block_on(
            self.handle
                .address()
                .add(link.to_u32(), address.addr(), address.prefix_len())
                .execute(),
        )?)
    }

    fn add_route(&self, link: InterfaceIndex, route: &Route) -> Result<(), LinkError> {
        let message = match route.destination {
            IpNet::V4(destination) => {
                let mut builder = RouteMessageBuilder::<Ipv4Addr>::new()
                    .destination_prefix(destination.addr(), destination.prefix_len())
                    .output_interface(link.to_u32());
                if let Some(IpAddr::V4(gateway)) = route.gateway {
                    builder = builder.gateway(gateway);
                }
                builder.build()
            }
            IpNet::V6(destination) => {
                let mut builder = RouteMessageBuilder::<Ipv6Addr>::new()
                    .destination_prefix(destination.addr(), destination.prefix_len())
                    .output_interface(link.to_u32());
                if let Some(IpAddr::V6(gateway)) = route.gateway {
                    builder = builder.gateway(gateway);
                }
                builder.build()
            }
        };
        Ok(self
            .runtime
            .block_on(self.handle.route().add(message).execute())?)
    }

    fn enable_neighbor_notify(&self, link: &InterfaceName) -> Result<(), LinkError> {
        std::fs::write(format!("/proc/sys/net/ipv4/conf/{link}/arp_notify"), "1")?;
        std::fs::write(format!("/proc/sys/net/ipv6/conf/{link}/ndisc_notify"), "1")?;
        Ok(())
    }
}
