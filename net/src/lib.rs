// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Validated value types shared by the SR-IOV plugin crates.
//!
//! Nothing in here talks to the kernel.  These types exist so that the rest of the workspace can
//! accept a [`PciAddress`](pci::PciAddress) or an [`InterfaceName`](interface::InterfaceName)
//! without re-validating it at every call site.

#![deny(
    unsafe_code,
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

pub mod eth;
pub mod interface;
pub mod pci;
pub mod vf;
pub mod vlan;
