// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Network configuration of the SR-IOV plugin.
//!
//! Three layers live here:
//!
//! 1. [`NetConf`]: the JSON document the container runtime hands us on stdin, decoded as-is.
//! 2. [`VfRequest`]: the validated subset of [`NetConf`] describing what to do to the VF.
//! 3. [`VfConfig`]: a request resolved against sysfs, plus the [`OrigVfState`] captured on
//!    attach.  This is what gets cached between ADD and DEL.
//!
//! [`PluginConfig`] carries the process-wide defaults (directories, timeouts, driver lists).

#![deny(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used)]
#![allow(clippy::missing_errors_doc)]

mod errors;
mod netconf;
mod plugin;
mod request;
mod state;

pub use errors::ConfigError;
pub use netconf::{NetConf, RuntimeConfig};
pub use plugin::{PluginConfig, PluginConfigBuilder, PluginConfigBuilderError};
pub use request::VfRequest;
pub use state::{OrigVfState, VfConfig};
