// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The VF lifecycle.
//!
//! Attach runs [`VfManager::fill_original_vf_info`], [`VfManager::apply_vf_config`] and
//! [`VfManager::setup_vf`]; detach runs [`VfManager::reset_vf_config`] and
//! [`VfManager::release_vf`].  Properties the request leaves unset are never touched in either
//! direction.

use crate::errors::{Rejection, VfError, VfProperty};
use config::{PluginConfig, VfConfig};
use interface_manager::{LinkError, LinkInfo, LinkOps, NamespaceOps, NetnsError};
use net::eth::mac::Mac;
use net::interface::{InterfaceIndex, InterfaceName};
use net::vlan::VlanProto;
use std::time::Duration;
use sysfs::{SriovFacts, TrunkOp};
use tracing::{debug, info, instrument, warn};

/// Drives one VF through attach and detach.
pub struct VfManager<'a, N, S> {
    namespaces: &'a N,
    facts: &'a S,
    config: &'a PluginConfig,
}

/// Temporary name a VF carries while it changes namespace.
///
/// Derived from the ifindex so it cannot clash with whatever the target namespace already holds.
fn temporary_name(index: InterfaceIndex) -> Result<InterfaceName, LinkError> {
    InterfaceName::try_from(format!("temp_{index}")).map_err(|e| LinkError::Malformed(e.to_string()))
}

fn rejected(
    property: VfProperty,
    target: &str,
) -> impl FnOnce(LinkError) -> VfError {
    move |source| VfError::ConfigurationRejected {
        property,
        target: target.to_string(),
        source: Rejection::Link(source),
    }
}

/// Set the runtime MAC of `link` and read it back until the kernel agrees.
fn set_mac_verified<L: LinkOps>(
    links: &L,
    link: InterfaceIndex,
    name: &InterfaceName,
    mac: Mac,
    attempts: u32,
    interval: Duration,
) -> Result<(), VfError> {
    let target = name.to_string();
    let mut got = None;
    for attempt in 1..=attempts.max(1) {
        links
            .set_mac(link, mac)
            .map_err(rejected(VfProperty::Mac, &target))?;
        got = links
            .link_by_name(name)
            .map_err(rejected(VfProperty::Mac, &target))?
            .mac;
        if got == Some(mac) {
            return Ok(());
        }
        debug!("attempt {attempt}: {name} reports {got:?}, expected {mac}");
        if attempt < attempts {
            std::thread::sleep(interval);
        }
    }
    Err(VfError::ConfigurationRejected {
        property: VfProperty::Mac,
        target,
        source: Rejection::MacMismatch { wanted: mac, got },
    })
}

impl<'a, N: NamespaceOps, S: SriovFacts> VfManager<'a, N, S> {
    pub fn new(namespaces: &'a N, facts: &'a S, config: &'a PluginConfig) -> Self {
        VfManager {
            namespaces,
            facts,
            config,
        }
    }

    fn pf(&self, vf: &VfConfig) -> Result<LinkInfo, VfError> {
        self.namespaces
            .links()
            .link_by_name(&vf.pf_name)
            .map_err(|source| VfError::LookupFailed {
                name: vf.pf_name.clone(),
                source,
            })
    }

    fn host_name(vf: &VfConfig) -> Result<InterfaceName, VfError> {
        vf.orig
            .host_if_name
            .clone()
            .ok_or(VfError::NoHostInterface(vf.request.device_id))
    }

    /// Snapshot the administrative state the PF holds for the VF.
    #[instrument(level = "debug", skip_all, fields(pf = %vf.pf_name, vf = vf.vf_id))]
    pub fn fill_original_vf_info(&self, vf: &mut VfConfig) -> Result<(), VfError> {
        let pf = self.pf(vf)?;
        let state = self
            .namespaces
            .links()
            .vf_state(&pf.name, vf.vf_id)
            .map_err(|source| match source {
                LinkError::VfNotFound { pf, vf } => VfError::DeviceNotFound { pf, vf },
                source => VfError::LookupFailed {
                    name: pf.name.clone(),
                    source,
                },
            })?;
        debug!("original state: {state:?}");
        let orig = &mut vf.orig;
        orig.admin_mac = state.mac;
        orig.vlan = state.vlan;
        orig.qos = state.qos;
        orig.proto = state.proto;
        orig.rate = state.rate;
        orig.spoofchk = state.spoofchk;
        orig.trust = state.trust;
        orig.link_state = state.link_state;
        Ok(())
    }

    /// Program the requested properties through the PF, stopping at the first refusal.
    #[instrument(level = "debug", skip_all, fields(pf = %vf.pf_name, vf = vf.vf_id))]
    pub fn apply_vf_config(&self, vf: &VfConfig) -> Result<(), VfError> {
        let links = self.namespaces.links();
        let pf = self.pf(vf)?;
        let id = vf.vf_id;
        let request = &vf.request;
        let target = format!("{} vf {id}", pf.name);

        if let Some(vlan) = request.vlan {
            links
                .set_vf_vlan(
                    &pf,
                    id,
                    vlan,
                    request.qos.unwrap_or_default(),
                    request.proto.unwrap_or_default(),
                )
                .map_err(rejected(VfProperty::Vlan, &target))?;
        }
        if let Some(trunk) = &request.trunk {
            self.facts
                .write_trunk(&pf.name, id, TrunkOp::Add, trunk)
                .map_err(|source| VfError::ConfigurationRejected {
                    property: VfProperty::Trunk,
                    target: target.clone(),
                    source: Rejection::Sysfs(source),
                })?;
        }
        if let Some(mac) = request.mac {
            links
                .set_vf_mac(&pf, id, mac)
                .map_err(rejected(VfProperty::Mac, &target))?;
        }
        if request.wants_rate() {
            links
                .set_vf_rate(&pf, id, request.rate_over(vf.orig.rate))
                .map_err(rejected(VfProperty::Rate, &target))?;
        }
        if let Some(enabled) = request.spoofchk {
            links
                .set_vf_spoofchk(&pf, id, enabled)
                .map_err(rejected(VfProperty::Spoofchk, &target))?;
        }
        if let Some(enabled) = request.trust {
            links
                .set_vf_trust(&pf, id, enabled)
                .map_err(rejected(VfProperty::Trust, &target))?;
        }
        if let Some(state) = request.link_state {
            links
                .set_vf_link_state(&pf, id, state)
                .map_err(rejected(VfProperty::LinkState, &target))?;
        }
        Ok(())
    }

    /// Move the VF netdev into `netns` and present it as `ifname`.
    ///
    /// Records the effective MAC the netdev had beforehand in `vf.orig`.
    #[instrument(level = "debug", skip_all, fields(netns = %netns, ifname = %ifname))]
    pub fn setup_vf(
        &self,
        vf: &mut VfConfig,
        ifname: &InterfaceName,
        netns: &N::Netns,
    ) -> Result<(), VfError> {
        let host_name = Self::host_name(vf)?;
        let moved = |source: LinkError| VfError::InterfaceMoveFailed {
            link: host_name.clone(),
            source: NetnsError::Link(source),
        };
        let links = self.namespaces.links();
        let link = links.link_by_name(&host_name).map_err(moved)?;
        vf.orig.effective_mac = link.mac;

        links.set_down(link.index).map_err(moved)?;
        let temp = temporary_name(link.index).map_err(moved)?;
        links.rename(link.index, &temp).map_err(moved)?;
        links.move_to(link.index, netns).map_err(moved)?;

        let mac = vf.request.mac;
        let attempts = self.config.mac_verify_attempts;
        let interval = self.config.mac_verify_interval;
        self.namespaces
            .run_in(netns, |links| {
                let link = links.link_by_name(&temp).map_err(moved)?;
                links.rename(link.index, ifname).map_err(moved)?;
                if let Err(err) = links.enable_neighbor_notify(ifname) {
                    warn!("failed to enable neighbor notifications on {ifname}: {err}");
                }
                if let Some(mac) = mac {
                    set_mac_verified(links, link.index, ifname, mac, attempts, interval)?;
                }
                links.set_up(link.index).map_err(moved)
            })
            .map_err(|source| VfError::InterfaceMoveFailed {
                link: host_name.clone(),
                source,
            })??;
        info!("{host_name} is now {ifname} in {netns}");
        Ok(())
    }

    /// Undo [`VfManager::setup_vf`]: rename `ifname` in `netns` back and return it to the host.
    #[instrument(level = "debug", skip_all, fields(netns = %netns, ifname = %ifname))]
    pub fn release_vf(
        &self,
        vf: &VfConfig,
        ifname: &InterfaceName,
        netns: &N::Netns,
    ) -> Result<(), VfError> {
        let host_name = Self::host_name(vf)?;
        let moved = |source: LinkError| VfError::InterfaceMoveFailed {
            link: ifname.clone(),
            source: NetnsError::Link(source),
        };
        let home = self
            .namespaces
            .current()
            .map_err(|source| VfError::InterfaceMoveFailed {
                link: ifname.clone(),
                source,
            })?;
        let mac = vf.request.mac.and(vf.orig.effective_mac);
        let target = netns.to_string();
        self.namespaces
            .run_in(netns, |links| {
                let link = match links.link_by_name(ifname) {
                    Ok(link) => link,
                    Err(LinkError::NotFound(_)) => {
                        return Err(VfError::InterfaceNotFound {
                            name: ifname.clone(),
                            netns: target,
                        });
                    }
                    Err(source) => return Err(moved(source)),
                };
                links.set_down(link.index).map_err(moved)?;
                links.rename(link.index, &host_name).map_err(moved)?;
                if let Some(mac) = mac {
                    links
                        .set_mac(link.index, mac)
                        .map_err(rejected(VfProperty::Mac, host_name.as_str()))?;
                }
                links.move_to(link.index, &home).map_err(moved)
            })
            .map_err(|source| VfError::InterfaceMoveFailed {
                link: ifname.clone(),
                source,
            })??;
        info!("{ifname} in {netns} is back as {host_name}");
        Ok(())
    }

    /// Restore every requested property to its captured value, through the PF.
    #[instrument(level = "debug", skip_all, fields(pf = %vf.pf_name, vf = vf.vf_id))]
    pub fn reset_vf_config(&self, vf: &VfConfig) -> Result<(), VfError> {
        let links = self.namespaces.links();
        let pf = self.pf(vf)?;
        let id = vf.vf_id;
        let request = &vf.request;
        let orig = &vf.orig;
        let target = format!("{} vf {id}", pf.name);

        if request.vlan.is_some() {
            links
                .set_vf_vlan(
                    &pf,
                    id,
                    orig.vlan,
                    orig.qos,
                    orig.proto.unwrap_or(VlanProto::Dot1Q),
                )
                .map_err(rejected(VfProperty::Vlan, &target))?;
        }
        if let Some(trunk) = &request.trunk
            && let Err(err) = self.facts.write_trunk(&pf.name, id, TrunkOp::Remove, trunk)
        {
            warn!("failed to remove vlan trunk {trunk} from {target}: {err}");
        }
        if request.spoofchk.is_some() {
            links
                .set_vf_spoofchk(&pf, id, orig.spoofchk)
                .map_err(rejected(VfProperty::Spoofchk, &target))?;
        }
        if request.mac.is_some() {
            links
                .set_vf_mac(&pf, id, orig.admin_mac)
                .map_err(rejected(VfProperty::Mac, &target))?;
        }
        if request.trust.is_some() {
            links
                .set_vf_trust(&pf, id, orig.trust)
                .map_err(rejected(VfProperty::Trust, &target))?;
        }
        if request.wants_rate() {
            links
                .set_vf_rate(&pf, id, orig.rate)
                .map_err(rejected(VfProperty::Rate, &target))?;
        }
        if request.link_state.is_some() {
            links
                .set_vf_link_state(&pf, id, orig.link_state)
                .map_err(rejected(VfProperty::LinkState, &target))?;
        }
        Ok(())
    }
}
