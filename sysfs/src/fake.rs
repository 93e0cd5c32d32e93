// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A throwaway sysfs tree laid out the way the kernel publishes SR-IOV devices.

use crate::Sysfs;
use net::pci::PciAddress;
use net::vf::VfId;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A fake sysfs mount living in a temporary directory.
#[derive(Debug)]
pub struct FakeSysfs {
    dir: TempDir,
}

impl FakeSysfs {
    pub fn new() -> io::Result<Self> {
        Ok(FakeSysfs {
            dir: tempfile::tempdir()?,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// A [`Sysfs`] reading this tree.
    #[must_use]
    pub fn sysfs(&self) -> Sysfs {
        Sysfs::new(self.root())
    }

    fn device_dir(&self, pci: PciAddress) -> PathBuf {
        self.root().join("bus/pci/devices").join(pci.to_string())
    }

    fn class_dir(&self, name: &str) -> PathBuf {
        self.root().join("class/net").join(name)
    }

    /// Publish a physical function with netdev `name`.
    pub fn add_pf(&self, name: &str, pci: PciAddress) -> io::Result<()> {
        let device = self.device_dir(pci);
        std::fs::create_dir_all(device.join("net").join(name))?;
        std::fs::write(device.join("sriov_numvfs"), "0\n")?;
        let class = self.class_dir(name);
        std::fs::create_dir_all(&class)?;
        symlink(&device, class.join("device"))
    }

    /// Publish VF `id` of `pf`, optionally with a host netdev, bound to `driver`.
    pub fn add_vf(
        &self,
        pf: &str,
        id: VfId,
        pci: PciAddress,
        netdev: Option<&str>,
        driver: &str,
    ) -> io::Result<()> {
        let pf_device = self.class_dir(pf).join("device");
        let vf_device = self.device_dir(pci);
        std::fs::create_dir_all(&vf_device)?;
        symlink(std::fs::canonicalize(&pf_device)?, vf_device.join("physfn"))?;
        symlink(&vf_device, pf_device.join(format!("virtfn{id}")))?;
        if let Some(netdev) = netdev {
            std::fs::create_dir_all(vf_device.join("net").join(netdev))?;
        }
        let driver_dir = self.root().join("bus/pci/drivers").join(driver);
        std::fs::create_dir_all(&driver_dir)?;
        symlink(driver_dir, vf_device.join("driver"))?;
        let count = std::fs::read_to_string(pf_device.join("sriov_numvfs"))?
            .trim()
            .parse::<u32>()
            .unwrap_or(0);
        std::fs::write(pf_device.join("sriov_numvfs"), format!("{}\n", count.max(id + 1)))
    }

    /// Give VF `id` of `pf` a vendor `trunk` attribute, returning its path.
    pub fn enable_trunk(&self, pf: &str, id: VfId) -> io::Result<PathBuf> {
        let dir = self
            .class_dir(pf)
            .join("device/sriov")
            .join(id.to_string());
        std::fs::create_dir_all(&dir)?;
        let attribute = dir.join("trunk");
        std::fs::write(&attribute, "")?;
        Ok(attribute)
    }
}
