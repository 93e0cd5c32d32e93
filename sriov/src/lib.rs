// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! SR-IOV virtual function CNI plugin.
//!
//! On `ADD` a VF is configured through its PF (VLAN, MAC, rate, spoof checking, trust, link
//! state), moved into the container's network namespace under the requested name and addressed
//! by the configured IPAM plugin.  Its original state is cached so `DEL` can put everything back.
//!
//! Plugin processes coordinate through files under the data directory only: a lock file and an
//! allocation record per VF PCI address, see [`allocator`].

#![deny(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used)]
#![allow(clippy::missing_errors_doc)]

pub mod allocator;
pub mod announce;
pub mod cni;
pub mod errors;
pub mod ipam;
pub mod orchestrator;
pub mod store;
pub mod vf;

pub use allocator::{PciAllocator, PciLock};
pub use announce::{Announcer, OpenTransmit, PacketSockets, Transmit};
pub use cni::{CniError, CniResult, VersionInfo};
pub use errors::{AllocatorError, PluginError, VfError, VfProperty};
pub use ipam::{ExecDelegate, IpamDelegate, IpamError};
pub use orchestrator::{Invocation, Plugin, version};
pub use store::StateStore;
pub use vf::VfManager;
