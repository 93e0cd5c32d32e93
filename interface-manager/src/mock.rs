// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A recording in-memory kernel.
//!
//! [`MockNamespaces`] keeps a set of named namespaces holding links plus the VF table of every
//! PF.  Every mutation is recorded as a [`LinkCall`] (whether or not it succeeds) and any
//! operation can be made to fail with [`MockNamespaces::fail`].

use crate::link::{LinkError, LinkInfo, LinkOps, Route, VfState};
use crate::netns::{NamespaceOps, NetnsError};
use ipnet::IpNet;
use net::eth::mac::Mac;
use net::interface::{InterfaceIndex, InterfaceName};
use net::vf::{VfId, VfLinkState, VfRate};
use net::vlan::{Pcp, VfVlan, VlanProto};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// Name of the namespace the mock "process" runs in.
pub const HOST: &str = "host";

/// Directory mock namespace paths live in.
pub const NETNS_DIR: &str = "/var/run/netns";

/// A recorded mutation.
#[derive(Debug, Clone, PartialEq, Eq, strum::EnumDiscriminants)]
#[strum_discriminants(name(LinkOp), derive(Hash, PartialOrd, Ord))]
pub enum LinkCall {
    SetVfVlan {
        pf: InterfaceName,
        vf: VfId,
        vlan: VfVlan,
        qos: Pcp,
        proto: VlanProto,
    },
    SetVfMac {
        pf: InterfaceName,
        vf: VfId,
        mac: Mac,
    },
    SetVfRate {
        pf: InterfaceName,
        vf: VfId,
        rate: VfRate,
    },
    SetVfSpoofchk {
        pf: InterfaceName,
        vf: VfId,
        enabled: bool,
    },
    SetVfTrust {
        pf: InterfaceName,
        vf: VfId,
        enabled: bool,
    },
    SetVfLinkState {
        pf: InterfaceName,
        vf: VfId,
        state: VfLinkState,
    },
    SetUp {
        netns: String,
        link: InterfaceName,
    },
    SetDown {
        netns: String,
        link: InterfaceName,
    },
    Rename {
        netns: String,
        from: InterfaceName,
        to: InterfaceName,
    },
    SetMac {
        netns: String,
        link: InterfaceName,
        mac: Mac,
    },
    Move {
        link: InterfaceName,
        from: String,
        to: String,
    },
    AddAddress {
        netns: String,
        link: InterfaceName,
        address: IpNet,
    },
    AddRoute {
        netns: String,
        link: InterfaceName,
        route: Route,
    },
    NeighborNotify {
        netns: String,
        link: InterfaceName,
    },
}

/// A netdev in the mock kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockLink {
    pub index: InterfaceIndex,
    pub name: InterfaceName,
    pub mac: Mac,
    pub up: bool,
    pub carrier: bool,
    pub addresses: Vec<IpNet>,
    pub routes: Vec<Route>,
}

impl From<&MockLink> for LinkInfo {
    fn from(link: &MockLink) -> Self {
        LinkInfo {
            index: link.index,
            name: link.name.clone(),
            mac: Some(link.mac),
            carrier: link.carrier,
        }
    }
}

#[derive(Debug)]
struct World {
    namespaces: BTreeMap<String, Vec<MockLink>>,
    unmounted: BTreeSet<String>,
    vfs: BTreeMap<(InterfaceName, VfId), VfState>,
    calls: Vec<LinkCall>,
    failures: BTreeSet<LinkOp>,
    frozen_macs: BTreeSet<InterfaceIndex>,
    next_index: u32,
}

impl World {
    fn record(&mut self, call: LinkCall) -> Result<(), LinkError> {
        trace!("{call:?}");
        let op = LinkOp::from(&call);
        self.calls.push(call);
        if self.failures.contains(&op) {
            return Err(LinkError::Rejected(format!("{op:?}")));
        }
        Ok(())
    }

    fn links(&mut self, netns: &str) -> Result<&mut Vec<MockLink>, LinkError> {
        self.namespaces
            .get_mut(netns)
            .ok_or_else(|| LinkError::NotFound(format!("namespace {netns}")))
    }

    fn by_index(&mut self, netns: &str, index: InterfaceIndex) -> Result<&mut MockLink, LinkError> {
        self.links(netns)?
            .iter_mut()
            .find(|link| link.index == index)
            .ok_or_else(|| LinkError::NotFound(index.to_string()))
    }

    fn by_name(&mut self, netns: &str, name: &InterfaceName) -> Option<&mut MockLink> {
        self.namespaces
            .get_mut(netns)?
            .iter_mut()
            .find(|link| &link.name == name)
    }

    fn vf(&mut self, pf: &InterfaceName, vf: VfId) -> Result<&mut VfState, LinkError> {
        self.vfs
            .get_mut(&(pf.clone(), vf))
            .ok_or_else(|| LinkError::VfNotFound { pf: pf.clone(), vf })
    }
}

/// Handle to a mock namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockNetns(pub String);

impl Display for MockNetns {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// [`LinkOps`] bound to one mock namespace.
#[derive(Debug, Clone)]
pub struct MockLinks {
    world: Arc<Mutex<World>>,
    netns: String,
}

/// The mock kernel.  Clones share state.
#[derive(Debug, Clone)]
pub struct MockNamespaces {
    world: Arc<Mutex<World>>,
    host: MockLinks,
}

impl Default for MockNamespaces {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNamespaces {
    /// A kernel with only the [`HOST`] namespace.
    #[must_use]
    pub fn new() -> Self {
        let world = Arc::new(Mutex::new(World {
            namespaces: BTreeMap::from([(HOST.to_string(), Vec::new())]),
            unmounted: BTreeSet::new(),
            vfs: BTreeMap::new(),
            calls: Vec::new(),
            failures: BTreeSet::new(),
            frozen_macs: BTreeSet::new(),
            next_index: 1,
        }));
        MockNamespaces {
            host: MockLinks {
                world: world.clone(),
                netns: HOST.to_string(),
            },
            world,
        }
    }

    /// Create namespace `name` and return the path it can be opened at.
    pub fn add_namespace(&self, name: &str) -> PathBuf {
        let mut world = self.world.lock();
        world.unmounted.remove(name);
        world.namespaces.entry(name.to_string()).or_default();
        Path::new(NETNS_DIR).join(name)
    }

    /// Destroy namespace `name` together with every link in it.
    pub fn remove_namespace(&self, name: &str) {
        self.world.lock().namespaces.remove(name);
    }

    /// Destroy namespace `name` but leave the file it was bind mounted on behind.
    pub fn unmount_namespace(&self, name: &str) {
        let mut world = self.world.lock();
        world.namespaces.remove(name);
        world.unmounted.insert(name.to_string());
    }

    /// Add a link to namespace `netns`.
    ///
    /// # Panics
    ///
    /// If `netns` does not exist or already holds a link named `name`.
    #[allow(clippy::missing_panics_doc, clippy::expect_used)]
    pub fn add_link(&self, netns: &str, name: &str, mac: Mac) -> InterfaceIndex {
        let mut world = self.world.lock();
        let index = InterfaceIndex::try_new(world.next_index).expect("index overflow");
        world.next_index += 1;
        let name = InterfaceName::try_from(name).expect("illegal interface name");
        let links = world.namespaces.get_mut(netns).expect("no such namespace");
        assert!(
            links.iter().all(|link| link.name != name),
            "{name} already exists in {netns}"
        );
        links.push(MockLink {
            index,
            name,
            mac,
            up: false,
            carrier: true,
            addresses: Vec::new(),
            routes: Vec::new(),
        });
        index
    }

    /// Add a PF to the host namespace with `vfs` VFs in their default state.
    #[allow(clippy::missing_panics_doc, clippy::expect_used)]
    pub fn add_pf(&self, name: &str, mac: Mac, vfs: VfId) -> InterfaceIndex {
        let index = self.add_link(HOST, name, mac);
        let pf = InterfaceName::try_from(name).expect("illegal interface name");
        let mut world = self.world.lock();
        for vf in 0..vfs {
            world.vfs.insert((pf.clone(), vf), VfState::default());
        }
        index
    }

    /// Overwrite the recorded state of one VF.
    #[allow(clippy::missing_panics_doc, clippy::expect_used)]
    pub fn set_vf_state(&self, pf: &str, vf: VfId, state: VfState) {
        let pf = InterfaceName::try_from(pf).expect("illegal interface name");
        self.world.lock().vfs.insert((pf, vf), state);
    }

    #[must_use]
    pub fn vf_state(&self, pf: &str, vf: VfId) -> Option<VfState> {
        let pf = InterfaceName::try_from(pf).ok()?;
        self.world.lock().vfs.get(&(pf, vf)).cloned()
    }

    /// Look up a link by namespace and name.
    #[must_use]
    pub fn link(&self, netns: &str, name: &str) -> Option<MockLink> {
        let name = InterfaceName::try_from(name).ok()?;
        self.world.lock().by_name(netns, &name).cloned()
    }

    /// Names of all links in `netns`.
    #[must_use]
    pub fn link_names(&self, netns: &str) -> Vec<String> {
        self.world
            .lock()
            .namespaces
            .get(netns)
            .map(|links| links.iter().map(|link| link.name.to_string()).collect())
            .unwrap_or_default()
    }

    pub fn set_carrier(&self, netns: &str, name: &str, carrier: bool) {
        let Ok(name) = InterfaceName::try_from(name) else {
            return;
        };
        if let Some(link) = self.world.lock().by_name(netns, &name) {
            link.carrier = carrier;
        }
    }

    /// Accept but ignore hardware address writes to this link.
    pub fn freeze_mac(&self, index: InterfaceIndex) {
        self.world.lock().frozen_macs.insert(index);
    }

    /// Make every future `op` fail with [`LinkError::Rejected`].
    pub fn fail(&self, op: LinkOp) {
        self.world.lock().failures.insert(op);
    }

    pub fn heal(&self, op: LinkOp) {
        self.world.lock().failures.remove(&op);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<LinkCall> {
        self.world.lock().calls.clone()
    }

    /// Number of recorded `op` calls.
    #[must_use]
    pub fn count(&self, op: LinkOp) -> usize {
        self.world
            .lock()
            .calls
            .iter()
            .filter(|call| LinkOp::from(*call) == op)
            .count()
    }

    pub fn clear_calls(&self) {
        self.world.lock().calls.clear();
    }
}

impl NamespaceOps for MockNamespaces {
    type Netns = MockNetns;
    type Links = MockLinks;

    fn open(&self, path: &Path) -> Result<MockNetns, NetnsError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| NetnsError::NotFound(path.to_path_buf()))?;
        let world = self.world.lock();
        if world.namespaces.contains_key(name) {
            Ok(MockNetns(name.to_string()))
        } else if world.unmounted.contains(name) {
            Err(NetnsError::NotANamespace(path.to_path_buf()))
        } else {
            Err(NetnsError::NotFound(path.to_path_buf()))
        }
    }

    fn current(&self) -> Result<MockNetns, NetnsError> {
        Ok(MockNetns(HOST.to_string()))
    }

    fn links(&self) -> &MockLinks {
        &self.host
    }

    fn run_in<R, F>(&self, netns: &MockNetns, work: F) -> Result<R, NetnsError>
    where
        F: FnOnce(&MockLinks) -> R + Send,
        R: Send,
    {
        if !self.world.lock().namespaces.contains_key(&netns.0) {
            return Err(NetnsError::NotFound(Path::new(NETNS_DIR).join(&netns.0)));
        }
        let links = MockLinks {
            world: self.world.clone(),
            netns: netns.0.clone(),
        };
        Ok(work(&links))
    }
}

impl MockLinks {
    fn name_of(world: &mut World, netns: &str, link: InterfaceIndex) -> Result<InterfaceName, LinkError> {
        Ok(world.by_index(netns, link)?.name.clone())
    }
}

impl LinkOps for MockLinks {
    type Netns = MockNetns;

    fn link_by_name(&self, name: &InterfaceName) -> Result<LinkInfo, LinkError> {
        self.world
            .lock()
            .by_name(&self.netns, name)
            .map(|link| LinkInfo::from(&*link))
            .ok_or_else(|| LinkError::NotFound(name.to_string()))
    }

    fn vf_state(&self, pf: &InterfaceName, vf: VfId) -> Result<VfState, LinkError> {
        let mut world = self.world.lock();
        if world.by_name(&self.netns, pf).is_none() {
            return Err(LinkError::NotFound(pf.to_string()));
        }
        Ok(world.vf(pf, vf)?.clone())
    }

    fn set_vf_vlan(
        &self,
        pf: &LinkInfo,
        vf: VfId,
        vlan: VfVlan,
        qos: Pcp,
        proto: VlanProto,
    ) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        world.record(LinkCall::SetVfVlan {
            pf: pf.name.clone(),
            vf,
            vlan,
            qos,
            proto,
        })?;
        let state = world.vf(&pf.name, vf)?;
        state.vlan = vlan;
        state.qos = qos;
        state.proto = Some(proto);
        Ok(())
    }

    fn set_vf_mac(&self, pf: &LinkInfo, vf: VfId, mac: Mac) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        world.record(LinkCall::SetVfMac {
            pf: pf.name.clone(),
            vf,
            mac,
        })?;
        world.vf(&pf.name, vf)?.mac = mac;
        Ok(())
    }

    fn set_vf_rate(&self, pf: &LinkInfo, vf: VfId, rate: VfRate) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        world.record(LinkCall::SetVfRate {
            pf: pf.name.clone(),
            vf,
            rate,
        })?;
        world.vf(&pf.name, vf)?.rate = rate;
        Ok(())
    }

    fn set_vf_spoofchk(&self, pf: &LinkInfo, vf: VfId, enabled: bool) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        world.record(LinkCall::SetVfSpoofchk {
            pf: pf.name.clone(),
            vf,
            enabled,
        })?;
        world.vf(&pf.name, vf)?.spoofchk = enabled;
        Ok(())
    }

    fn set_vf_trust(&self, pf: &LinkInfo, vf: VfId, enabled: bool) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        world.record(LinkCall::SetVfTrust {
            pf: pf.name.clone(),
            vf,
            enabled,
        })?;
        world.vf(&pf.name, vf)?.trust = enabled;
        Ok(())
    }

    fn set_vf_link_state(
        &self,
        pf: &LinkInfo,
        vf: VfId,
        state: VfLinkState,
    ) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        world.record(LinkCall::SetVfLinkState {
            pf: pf.name.clone(),
            vf,
            state,
        })?;
        world.vf(&pf.name, vf)?.link_state = state;
        Ok(())
    }

    fn set_up(&self, link: InterfaceIndex) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        let name = Self::name_of(&mut world, &self.netns, link)?;
        world.record(LinkCall::SetUp {
            netns: self.netns.clone(),
            link: name,
        })?;
        world.by_index(&self.netns, link)?.up = true;
        Ok(())
    }

    fn set_down(&self, link: InterfaceIndex) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        let name = Self::name_of(&mut world, &self.netns, link)?;
        world.record(LinkCall::SetDown {
            netns: self.netns.clone(),
            link: name,
        })?;
        world.by_index(&self.netns, link)?.up = false;
        Ok(())
    }

    fn rename(&self, link: InterfaceIndex, name: &InterfaceName) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        let from = Self::name_of(&mut world, &self.netns, link)?;
        world.record(LinkCall::Rename {
            netns: self.netns.clone(),
            from,
            to: name.clone(),
        })?;
        if world
            .by_name(&self.netns, name)
            .is_some_and(|other| other.index != link)
        {
            return Err(LinkError::Rejected(format!(
                "{name} already exists in {}",
                self.netns
            )));
        }
        world.by_index(&self.netns, link)?.name = name.clone();
        Ok(())
    }

    fn set_mac(&self, link: InterfaceIndex, mac: Mac) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        let name = Self::name_of(&mut world, &self.netns, link)?;
        world.record(LinkCall::SetMac {
            netns: self.netns.clone(),
            link: name,
            mac,
        })?;
        if !world.frozen_macs.contains(&link) {
            world.by_index(&self.netns, link)?.mac = mac;
        }
        Ok(())
    }

    fn move_to(&self, link: InterfaceIndex, netns: &MockNetns) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        let name = Self::name_of(&mut world, &self.netns, link)?;
        world.record(LinkCall::Move {
            link: name.clone(),
            from: self.netns.clone(),
            to: netns.0.clone(),
        })?;
        if world.links(&netns.0)?.iter().any(|other| other.name == name) {
            return Err(LinkError::Rejected(format!("{name} already exists in {netns}")));
        }
        let links = world.links(&self.netns)?;
        let Some(position) = links.iter().position(|other| other.index == link) else {
            return Err(LinkError::NotFound(link.to_string()));
        };
        let mut moved = links.remove(position);
        // the kernel takes links down when they change namespace
        moved.up = false;
        world.links(&netns.0)?.push(moved);
        Ok(())
    }

    fn add_address(&self, link: InterfaceIndex, address: IpNet) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        let name = Self::name_of(&mut world, &self.netns, link)?;
        world.record(LinkCall::AddAddress {
            netns: self.netns.clone(),
            link: name,
            address,
        })?;
        world.by_index(&self.netns, link)?.addresses.push(address);
        Ok(())
    }

    fn add_route(&self, link: InterfaceIndex, route: &Route) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        let name = Self::name_of(&mut world, &self.netns, link)?;
        world.record(LinkCall::AddRoute {
            netns: self.netns.clone(),
            link: name,
            route: route.clone(),
        })?;
        world.by_index(&self.netns, link)?.routes.push(route.clone());
        Ok(())
    }

    fn enable_neighbor_notify(&self, link: &InterfaceName) -> Result<(), LinkError> {
        let mut world = self.world.lock();
        if world.by_name(&self.netns, link).is_none() {
            return Err(LinkError::NotFound(link.to_string()));
        }
        world.record(LinkCall::NeighborNotify {
            netns: self.netns.clone(),
            link: link.clone(),
        })
    }
}
