// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Failure taxonomy of the plugin.

use crate::ipam::IpamError;
use interface_manager::{LinkError, NetnsError};
use net::eth::mac::Mac;
use net::interface::InterfaceName;
use net::pci::PciAddress;
use net::vf::VfId;
use std::path::PathBuf;
use std::time::Duration;
use sysfs::SysfsError;

/// The VF property a configuration step was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum VfProperty {
    Vlan,
    Trunk,
    Mac,
    Rate,
    Spoofchk,
    Trust,
    LinkState,
}

/// Why the kernel (or a driver) refused a property.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Sysfs(#[from] SysfsError),
    #[error("kernel reports {got:?} instead of {wanted}")]
    MacMismatch { wanted: Mac, got: Option<Mac> },
}

#[derive(Debug, thiserror::Error)]
pub enum VfError {
    #[error("{pf} has no virtual function {vf}")]
    DeviceNotFound { pf: InterfaceName, vf: VfId },
    #[error("failed to look up {name}: {source}")]
    LookupFailed {
        name: InterfaceName,
        #[source]
        source: LinkError,
    },
    #[error("failed to set {property} on {target}: {source}")]
    ConfigurationRejected {
        property: VfProperty,
        target: String,
        #[source]
        source: Rejection,
    },
    #[error("failed to move {link}: {source}")]
    InterfaceMoveFailed {
        link: InterfaceName,
        #[source]
        source: NetnsError,
    },
    #[error("interface {name} not found in {netns}")]
    InterfaceNotFound { name: InterfaceName, netns: String },
    #[error("{0} has no host interface")]
    NoHostInterface(PciAddress),
}

#[derive(Debug, thiserror::Error)]
pub enum AllocatorError {
    #[error("timed out after {timeout:?} waiting for the lock of {pci}")]
    LockTimeout { pci: PciAddress, timeout: Duration },
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },
    #[error("lock worker for {0} went away")]
    LockWorker(PciAddress),
    #[error("failed to persist {path}: {source}")]
    PersistFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no allocation record for {0}")]
    RecordNotFound(PciAddress),
    #[error("failed to inspect the namespace holding {pci}: {source}")]
    Namespace {
        pci: PciAddress,
        #[source]
        source: NetnsError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("invalid invocation: {0}")]
    Args(#[from] args::ArgsError),
    #[error("invalid network configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("invalid plugin settings: {0}")]
    Settings(#[from] config::PluginConfigBuilderError),
    #[error("failed to set up logging: {0}")]
    Tracing(#[from] tracectl::TraceCtlError),
    #[error("failed to read the network configuration: {0}")]
    Stdin(#[source] std::io::Error),
    #[error(transparent)]
    Vf(#[from] VfError),
    #[error(transparent)]
    Allocator(#[from] AllocatorError),
    #[error(transparent)]
    Ipam(#[from] IpamError),
    #[error(transparent)]
    Sysfs(#[from] SysfsError),
    #[error("failed to open the host network namespace: {0}")]
    Host(#[source] NetnsError),
    #[error("CNI_NETNS is required for {0}")]
    MissingNetns(&'static str),
    #[error("network namespace {path} is unavailable: {source}")]
    NamespaceUnavailable {
        path: PathBuf,
        #[source]
        source: NetnsError,
    },
    #[error("{0} is already allocated")]
    AlreadyAllocated(PciAddress),
    #[error("{0} is not allocated")]
    NotAllocated(PciAddress),
    #[error("no cached state for {container_id}/{ifname}")]
    NotAttached {
        container_id: String,
        ifname: InterfaceName,
    },
    #[error("cached state names vf {vf} of {pf} but that is no longer {pci}")]
    StaleCache {
        pf: InterfaceName,
        vf: VfId,
        pci: PciAddress,
    },
    #[error("ipam plugin {0} returned no addresses")]
    NoAddresses(String),
    #[error("failed to configure {link}: {source}")]
    Addressing {
        link: InterfaceName,
        #[source]
        source: NetnsError,
    },
    #[error("failed to write the result: {0}")]
    Output(#[source] serde_json::Error),
}

impl PluginError {
    /// Invalid network configuration.
    pub const CODE_INVALID_CONFIG: u32 = 4;
    /// Invalid `CNI_*` environment.
    pub const CODE_INVALID_ENV: u32 = 7;
    /// The runtime should retry later.
    pub const CODE_TRY_AGAIN: u32 = 11;
    /// Everything else.
    pub const CODE_GENERIC: u32 = 100;

    /// The CNI error code reported to the runtime.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            PluginError::Config(_) | PluginError::Settings(_) | PluginError::Tracing(_) => {
                Self::CODE_INVALID_CONFIG
            }
            PluginError::Args(_) | PluginError::MissingNetns(_) => Self::CODE_INVALID_ENV,
            PluginError::Allocator(AllocatorError::LockTimeout { .. }) => Self::CODE_TRY_AGAIN,
            PluginError::Ipam(IpamError::Failed { error, .. }) => error.code,
            _ => Self::CODE_GENERIC,
        }
    }
}
