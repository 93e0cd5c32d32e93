// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! ADD, DEL and CHECK.
//!
//! Attach is strict: once the original VF state is captured, any failure runs [`Plugin::rollback`]
//! before the error is returned.  Detach is lenient: a missing cache, a vanished namespace or a
//! vanished pod interface all mean there is nothing left to undo.

use crate::allocator::PciAllocator;
use crate::announce::{Announcer, OpenTransmit};
use crate::cni::{CniResult, Interface, LATEST_VERSION, VersionInfo};
use crate::errors::{AllocatorError, PluginError, VfError};
use crate::ipam::IpamDelegate;
use crate::store::StateStore;
use crate::vf::VfManager;
use args::CmdArgs;
use config::{NetConf, PluginConfig, VfConfig, VfRequest};
use interface_manager::{LinkError, LinkOps, NamespaceOps, NetnsError, Route};
use net::eth::mac::Mac;
use net::interface::InterfaceName;
use std::path::{Path, PathBuf};
use sysfs::{SriovFacts, SysfsError};
use tracing::{debug, error, info, instrument, warn};

/// One invocation of the plugin: the `CNI_*` environment plus the network configuration.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub container_id: String,
    pub ifname: InterfaceName,
    pub netns: Option<PathBuf>,
    /// `MAC=` from `CNI_ARGS`.
    pub cni_args_mac: Option<Mac>,
    pub conf: NetConf,
    /// The network configuration as received; handed verbatim to the IPAM plugin.
    pub stdin: Vec<u8>,
}

impl Invocation {
    pub fn new(args: &CmdArgs, stdin: Vec<u8>) -> Result<Self, PluginError> {
        let conf = NetConf::from_slice(&stdin)?;
        Ok(Invocation {
            container_id: args.container_id()?.to_string(),
            ifname: args.ifname()?,
            netns: args.netns().map(Path::to_path_buf),
            cni_args_mac: args.cni_args()?.mac()?,
            conf,
            stdin,
        })
    }

    /// The version results are reported in.
    #[must_use]
    pub fn cni_version(&self) -> String {
        if self.conf.cni_version.is_empty() {
            LATEST_VERSION.to_string()
        } else {
            self.conf.cni_version.clone()
        }
    }
}

/// The plugin, wired to its collaborators.
pub struct Plugin<'a, N, S, D, O> {
    config: &'a PluginConfig,
    namespaces: &'a N,
    facts: &'a S,
    ipam: &'a D,
    sockets: &'a O,
    store: StateStore,
    allocator: PciAllocator,
}

impl<'a, N, S, D, O> Plugin<'a, N, S, D, O>
where
    N: NamespaceOps,
    S: SriovFacts,
    D: IpamDelegate,
    O: OpenTransmit,
{
    pub fn new(
        config: &'a PluginConfig,
        namespaces: &'a N,
        facts: &'a S,
        ipam: &'a D,
        sockets: &'a O,
    ) -> Self {
        Plugin {
            config,
            namespaces,
            facts,
            ipam,
            sockets,
            store: StateStore::new(&config.data_dir),
            allocator: PciAllocator::new(&config.data_dir, config.lock_timeout),
        }
    }

    fn vfs(&self) -> VfManager<'_, N, S> {
        VfManager::new(self.namespaces, self.facts, self.config)
    }

    fn open(&self, path: &Path) -> Result<N::Netns, PluginError> {
        self.namespaces
            .open(path)
            .map_err(|source| PluginError::NamespaceUnavailable {
                path: path.to_path_buf(),
                source,
            })
    }

    /// `ADD`: hand the requested VF to the container.
    #[instrument(level = "info", skip_all, fields(container = %inv.container_id, ifname = %inv.ifname))]
    pub fn attach(&self, inv: &Invocation) -> Result<CniResult, PluginError> {
        let request = VfRequest::from_net_conf(&inv.conf, inv.cni_args_mac)?;
        let mut vf = VfConfig::resolve(request, self.facts, &self.config.userspace_drivers)?;
        let path = inv.netns.as_deref().ok_or(PluginError::MissingNetns("ADD"))?;
        let netns = self.open(path)?;
        let pci = vf.request.device_id;

        let _lock = self.allocator.lock(pci)?;
        if self.allocator.is_allocated(pci, self.namespaces)? {
            return Err(PluginError::AlreadyAllocated(pci));
        }
        let vfs = self.vfs();
        vfs.fill_original_vf_info(&mut vf)?;

        match self.attach_vf(&vfs, &mut vf, inv, path, &netns) {
            Ok(result) => {
                info!("attached {pci} ({} vf {})", vf.pf_name, vf.vf_id);
                Ok(result)
            }
            Err(err) => {
                warn!("attach of {pci} failed, rolling back: {err}");
                self.rollback(&vfs, &vf, &inv.ifname, &netns);
                Err(err)
            }
        }
    }

    fn attach_vf(
        &self,
        vfs: &VfManager<'_, N, S>,
        vf: &mut VfConfig,
        inv: &Invocation,
        path: &Path,
        netns: &N::Netns,
    ) -> Result<CniResult, PluginError> {
        vfs.apply_vf_config(vf)?;
        if !vf.dpdk_mode {
            vfs.setup_vf(vf, &inv.ifname, netns)?;
        }
        let mut result = CniResult {
            cni_version: inv.cni_version(),
            interfaces: vec![Interface {
                name: inv.ifname.to_string(),
                mac: vf.result_mac(),
                sandbox: Some(path.display().to_string()),
            }],
            ..CniResult::default()
        };

        let ipam = inv.conf.ipam_type();
        let assigned = match ipam {
            Some(plugin) => match self.ipam.add(plugin, &inv.stdin) {
                Ok(assigned) => Some(assigned),
                Err(err) => {
                    if let Err(del) = self.ipam.del(plugin, &inv.stdin) {
                        warn!("failed to release addresses from {plugin}: {del}");
                    }
                    return Err(err.into());
                }
            },
            None => None,
        };
        if let Err(err) = self.assign_and_persist(vf, inv, path, netns, &mut result, assigned) {
            if let Some(plugin) = ipam
                && let Err(del) = self.ipam.del(plugin, &inv.stdin)
            {
                warn!("failed to release addresses from {plugin}: {del}");
            }
            if let Err(del) = self.store.delete(&inv.container_id, &inv.ifname) {
                warn!("failed to drop cached state: {del}");
            }
            return Err(err);
        }

        if !vf.dpdk_mode && !result.ips.is_empty() {
            self.announce(&inv.ifname, netns, &result);
        }
        Ok(result)
    }

    fn assign_and_persist(
        &self,
        vf: &VfConfig,
        inv: &Invocation,
        path: &Path,
        netns: &N::Netns,
        result: &mut CniResult,
        assigned: Option<CniResult>,
    ) -> Result<(), PluginError> {
        if let Some(assigned) = assigned {
            if assigned.ips.is_empty() {
                return Err(PluginError::NoAddresses(
                    inv.conf.ipam_type().unwrap_or_default().to_string(),
                ));
            }
            result.adopt(assigned);
            if !vf.dpdk_mode {
                self.configure_addresses(&inv.ifname, netns, result)?;
            }
        }
        self.store.save(&inv.container_id, &inv.ifname, vf)?;
        self.allocator.save_allocated(vf.request.device_id, path)?;
        Ok(())
    }

    /// Put the addresses and routes of `result` on `ifname` inside `netns`.
    #[instrument(level = "debug", skip(self, netns, result))]
    fn configure_addresses(
        &self,
        ifname: &InterfaceName,
        netns: &N::Netns,
        result: &CniResult,
    ) -> Result<(), PluginError> {
        let addressing = |source| PluginError::Addressing {
            link: ifname.clone(),
            source,
        };
        self.namespaces
            .run_in(netns, |links| -> Result<(), LinkError> {
                let link = links.link_by_name(ifname)?;
                for ip in &result.ips {
                    links.add_address(link.index, ip.address)?;
                }
                for route in &result.routes {
                    let route = Route {
                        destination: route.dst,
                        gateway: route.gw.or_else(|| result.gateway_for(&route.dst)),
                    };
                    links.add_route(link.index, &route)?;
                }
                Ok(())
            })
            .map_err(addressing)?
            .map_err(|source| addressing(NetnsError::Link(source)))
    }

    fn announce(&self, ifname: &InterfaceName, netns: &N::Netns, result: &CniResult) {
        let announcer = Announcer::new(self.sockets, self.config.carrier_wait);
        let ips = result.addresses();
        match self
            .namespaces
            .run_in(netns, |links| announcer.announce(links, ifname, &ips))
        {
            Ok(Ok(sent)) => debug!("announced {sent} of {} addresses on {ifname}", ips.len()),
            Ok(Err(err)) => warn!("failed to announce addresses on {ifname}: {err}"),
            Err(err) => warn!("failed to announce addresses on {ifname}: {err}"),
        }
    }

    /// Undo a failed attach: bring the VF home if it made it into the pod, then restore its
    /// administrative state.
    fn rollback(
        &self,
        vfs: &VfManager<'_, N, S>,
        vf: &VfConfig,
        ifname: &InterfaceName,
        netns: &N::Netns,
    ) {
        if !vf.dpdk_mode {
            match self
                .namespaces
                .run_in(netns, |links| links.link_by_name(ifname).is_ok())
            {
                Ok(true) => {
                    if let Err(err) = vfs.release_vf(vf, ifname, netns) {
                        error!("rollback: failed to release {ifname} from {netns}: {err}");
                    }
                }
                Ok(false) => debug!("rollback: {ifname} is not in {netns}"),
                Err(err) => error!("rollback: failed to inspect {netns}: {err}"),
            }
        }
        if let Err(err) = vfs.reset_vf_config(vf) {
            error!("rollback: failed to reset {} vf {}: {err}", vf.pf_name, vf.vf_id);
        }
    }

    /// `DEL`: give the VF back to the host and restore its original state.
    #[instrument(level = "info", skip_all, fields(container = %inv.container_id, ifname = %inv.ifname))]
    pub fn detach(&self, inv: &Invocation) -> Result<(), PluginError> {
        let vf = match self.store.load(&inv.container_id, &inv.ifname) {
            Ok(Some(vf)) => vf,
            Ok(None) => {
                info!("no cached state, nothing to detach");
                return Ok(());
            }
            Err(err @ (AllocatorError::Corrupt { .. } | AllocatorError::Read { .. })) => {
                warn!("{err}, treating {} as detached", inv.ifname);
                if let Err(del) = self.store.delete(&inv.container_id, &inv.ifname) {
                    warn!("failed to drop cached state: {del}");
                }
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let pci = vf.request.device_id;
        let _lock = self.allocator.lock(pci)?;

        if let Some(plugin) = inv.conf.ipam_type() {
            self.ipam.del(plugin, &inv.stdin)?;
        }
        if !self.still_owns(&vf)? {
            return Err(PluginError::StaleCache {
                pf: vf.pf_name.clone(),
                vf: vf.vf_id,
                pci,
            });
        }

        let vfs = self.vfs();
        vfs.reset_vf_config(&vf)?;
        let Some(path) = inv.netns.as_deref() else {
            info!("no network namespace given, {pci} is reset and its records are kept");
            return Ok(());
        };
        if !vf.dpdk_mode {
            self.release(&vfs, &vf, &inv.ifname, path)?;
        }

        match self.allocator.delete_allocated(pci) {
            Ok(()) => {}
            Err(AllocatorError::RecordNotFound(_)) => debug!("{pci} had no allocation record"),
            Err(err) => return Err(err.into()),
        }
        self.store.delete(&inv.container_id, &inv.ifname)?;
        info!("detached {pci} ({} vf {})", vf.pf_name, vf.vf_id);
        Ok(())
    }

    /// True if the cached VF id still names the cached PCI function on its PF.
    fn still_owns(&self, vf: &VfConfig) -> Result<bool, PluginError> {
        if vf.vf_id >= self.facts.vf_count(&vf.pf_name)? {
            return Ok(false);
        }
        match self.facts.vf_pci_address(&vf.pf_name, vf.vf_id) {
            Ok(actual) => Ok(actual == vf.request.device_id),
            Err(SysfsError::VfNotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Bring `ifname` back from the namespace at `path`, tolerating a namespace or interface
    /// which is already gone.
    fn release(
        &self,
        vfs: &VfManager<'_, N, S>,
        vf: &VfConfig,
        ifname: &InterfaceName,
        path: &Path,
    ) -> Result<(), PluginError> {
        match self.namespaces.open(path) {
            Ok(netns) => match vfs.release_vf(vf, ifname, &netns) {
                Ok(()) => Ok(()),
                Err(err @ VfError::InterfaceNotFound { .. }) => {
                    info!("{err}, already released");
                    Ok(())
                }
                Err(err) => Err(err.into()),
            },
            Err(NetnsError::NotFound(_) | NetnsError::NotANamespace(_)) => {
                info!("{} no longer exists, skipping release", path.display());
                Ok(())
            }
            Err(source) => Err(PluginError::NamespaceUnavailable {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// `CHECK`: verify an earlier attach is still in place.
    #[instrument(level = "info", skip_all, fields(container = %inv.container_id, ifname = %inv.ifname))]
    pub fn check(&self, inv: &Invocation) -> Result<(), PluginError> {
        let vf = self
            .store
            .load(&inv.container_id, &inv.ifname)?
            .ok_or_else(|| PluginError::NotAttached {
                container_id: inv.container_id.clone(),
                ifname: inv.ifname.clone(),
            })?;
        let pci = vf.request.device_id;
        if !self.allocator.is_allocated(pci, self.namespaces)? {
            return Err(PluginError::NotAllocated(pci));
        }
        if !vf.dpdk_mode {
            let path = inv.netns.as_deref().ok_or(PluginError::MissingNetns("CHECK"))?;
            let netns = self.open(path)?;
            let present = self
                .namespaces
                .run_in(&netns, |links| links.link_by_name(&inv.ifname))
                .map_err(|source| PluginError::NamespaceUnavailable {
                    path: path.to_path_buf(),
                    source,
                })?;
            match present {
                Ok(_) => {}
                Err(LinkError::NotFound(_)) => {
                    return Err(VfError::InterfaceNotFound {
                        name: inv.ifname.clone(),
                        netns: netns.to_string(),
                    }
                    .into());
                }
                Err(source) => {
                    return Err(VfError::LookupFailed {
                        name: inv.ifname.clone(),
                        source,
                    }
                    .into());
                }
            }
        }
        if let Some(plugin) = inv.conf.ipam_type() {
            self.ipam.check(plugin, &inv.stdin)?;
        }
        Ok(())
    }
}

/// `VERSION`.
#[must_use]
pub fn version() -> VersionInfo {
    VersionInfo::default()
}
