// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use derive_builder::Builder;
use std::path::PathBuf;
use std::time::Duration;
use sysfs::Driver;

/// Process-wide settings, built once and handed to every component.
#[derive(Builder, Debug, Clone, PartialEq, Eq)]
#[builder(derive(Debug))]
pub struct PluginConfig {
    /// Where cached VF state, allocation records and lock files live.
    #[builder(setter(into), default = "PathBuf::from(PluginConfig::DEFAULT_DATA_DIR)")]
    pub data_dir: PathBuf,
    /// Mount point of sysfs.
    #[builder(setter(into), default = "PathBuf::from(\"/sys\")")]
    pub sysfs_root: PathBuf,
    /// How long to wait for the per-device lock.
    #[builder(default = "Duration::from_secs(60)")]
    pub lock_timeout: Duration,
    /// How long to wait for carrier before announcing addresses.
    #[builder(default = "Duration::from_millis(200)")]
    pub carrier_wait: Duration,
    /// How many times to read back a freshly set interface MAC.
    #[builder(default = "3")]
    pub mac_verify_attempts: u32,
    #[builder(default = "Duration::from_millis(100)")]
    pub mac_verify_interval: Duration,
    /// Drivers which mean the VF is owned by a userspace (DPDK) process.
    #[builder(default = "Driver::userspace()")]
    pub userspace_drivers: Vec<Driver>,
}

impl PluginConfig {
    pub const DEFAULT_DATA_DIR: &'static str = "/var/lib/cni/sriov";
}

impl Default for PluginConfig {
    fn default() -> Self {
        PluginConfig {
            data_dir: PathBuf::from(PluginConfig::DEFAULT_DATA_DIR),
            sysfs_root: PathBuf::from("/sys"),
            lock_timeout: Duration::from_secs(60),
            carrier_wait: Duration::from_millis(200),
            mac_verify_attempts: 3,
            mac_verify_interval: Duration::from_millis(100),
            userspace_drivers: Driver::userspace(),
        }
    }
}
