// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Capability interfaces over kernel link state and network namespaces.
//!
//! [`LinkOps`] is the small set of link queries and mutations the VF lifecycle needs, and
//! [`NamespaceOps`] runs work inside another network namespace.  Production code uses
//! [`RtNetlink`] and [`KernelNamespaces`]; tests use the recording in-memory kernel from
//! [`mock`] (feature `testing`).

#![deny(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used)]
#![allow(clippy::missing_errors_doc)]

pub mod link;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod netns;
mod rtnl;

pub use link::{LinkError, LinkInfo, LinkOps, Route, VfState};
pub use netns::{KernelNamespaces, NamespaceOps, Netns, NetnsError};
pub use rtnl::RtNetlink;
