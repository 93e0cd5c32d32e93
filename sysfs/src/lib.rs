// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Facts about SR-IOV devices as published under `/sys`.
//!
//! The plugin only ever asks a handful of questions of sysfs: which PF owns a VF, which VF id it
//! has, which netdev (if any) it currently presents, and which driver it is bound to.  Those
//! questions are the [`SriovFacts`] trait; [`Sysfs`] answers them from a sysfs mount.

#![deny(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used)]
#![allow(clippy::missing_errors_doc)]

#[cfg(any(test, feature = "testing"))]
pub mod fake;

use net::interface::{IllegalInterfaceName, InterfaceName};
use net::pci::PciAddress;
use net::vf::VfId;
use net::vlan::VlanTrunk;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, instrument};

/// The kernel driver a PCI function is bound to.
#[derive(Debug, Clone, PartialEq, Eq, strum::EnumString)]
pub enum Driver {
    #[strum(serialize = "vfio-pci")]
    VfioPci,
    #[strum(serialize = "uio_pci_generic")]
    UioPciGeneric,
    #[strum(serialize = "igb_uio")]
    IgbUio,
    #[strum(serialize = "mlx5_core")]
    Mlx5Core,
    #[strum(serialize = "iavf")]
    Iavf,
    #[strum(serialize = "ixgbevf")]
    Ixgbevf,
    /// No driver is bound.
    Unbound,
    #[strum(default)]
    Unknown(String),
}

impl Driver {
    /// The drivers which hand the device to a userspace (DPDK) process.
    #[must_use]
    pub fn userspace() -> Vec<Driver> {
        vec![Driver::VfioPci, Driver::UioPciGeneric, Driver::IgbUio]
    }
}

impl Display for Driver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Driver::VfioPci => f.write_str("vfio-pci"),
            Driver::UioPciGeneric => f.write_str("uio_pci_generic"),
            Driver::IgbUio => f.write_str("igb_uio"),
            Driver::Mlx5Core => f.write_str("mlx5_core"),
            Driver::Iavf => f.write_str("iavf"),
            Driver::Ixgbevf => f.write_str("ixgbevf"),
            Driver::Unbound => f.write_str("unbound"),
            Driver::Unknown(name) => f.write_str(name),
        }
    }
}

/// Whether trunk ranges are being added to or removed from a VF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TrunkOp {
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "rem")]
    Remove,
}

#[derive(Debug, thiserror::Error)]
pub enum SysfsError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not a virtual function")]
    NotAVf(PciAddress),
    #[error("no network interface found for physical function of {0}")]
    NoPfNetdev(PciAddress),
    #[error("{pf} has no virtual function {vf}")]
    VfNotFound { pf: InterfaceName, vf: VfId },
    #[error("unexpected content in {0}")]
    Malformed(PathBuf),
    #[error("illegal interface name under sysfs: {0}")]
    InterfaceName(#[from] IllegalInterfaceName),
    #[error("{pf} does not support vlan trunks on virtual function {vf}")]
    TrunkUnsupported { pf: InterfaceName, vf: VfId },
}

/// The sysfs-derived facts the plugin consumes.
pub trait SriovFacts {
    /// Name of the netdev of the PF owning `vf`.
    fn pf_name(&self, vf: PciAddress) -> Result<InterfaceName, SysfsError>;
    /// Index of `vf` on its PF.
    fn vf_id(&self, vf: PciAddress) -> Result<VfId, SysfsError>;
    /// Number of VFs currently enabled on `pf`.
    fn vf_count(&self, pf: &InterfaceName) -> Result<u32, SysfsError>;
    /// PCI address of VF `vf` of `pf`.
    fn vf_pci_address(&self, pf: &InterfaceName, vf: VfId) -> Result<PciAddress, SysfsError>;
    /// Netdevs presented by a PCI function in the host namespace (empty if none).
    fn netdevs(&self, pci: PciAddress) -> Result<Vec<InterfaceName>, SysfsError>;
    /// Driver bound to a PCI function.
    fn driver(&self, pci: PciAddress) -> Result<Driver, SysfsError>;
    /// Add or remove trunk ranges through the vendor `trunk` attribute of the PF.
    fn write_trunk(
        &self,
        pf: &InterfaceName,
        vf: VfId,
        op: TrunkOp,
        trunk: &VlanTrunk,
    ) -> Result<(), SysfsError>;
}

/// [`SriovFacts`] backed by a sysfs mount.
#[derive(Debug, Clone)]
pub struct Sysfs {
    root: PathBuf,
}

impl Default for Sysfs {
    fn default() -> Self {
        Sysfs::new("/sys")
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SysfsError {
    let path = path.to_path_buf();
    move |source| SysfsError::Io { path, source }
}

fn link_target_name(path: &Path) -> Result<String, SysfsError> {
    let target = std::fs::read_link(path).map_err(io_error(path))?;
    target
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| SysfsError::Malformed(path.to_path_buf()))
}

impl Sysfs {
    /// Use the sysfs mounted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Sysfs { root: root.into() }
    }

    fn device_dir(&self, pci: PciAddress) -> PathBuf {
        self.root.join("bus/pci/devices").join(pci.to_string())
    }

    fn netdev_device_dir(&self, name: &InterfaceName) -> PathBuf {
        self.root.join("class/net").join(name.as_str()).join("device")
    }

    fn entry_names(dir: &Path) -> Result<Vec<String>, SysfsError> {
        let mut names = std::fs::read_dir(dir)
            .map_err(io_error(dir))?
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }
}

impl SriovFacts for Sysfs {
    #[instrument(level = "debug", skip(self))]
    fn pf_name(&self, vf: PciAddress) -> Result<InterfaceName, SysfsError> {
        let physfn = self.device_dir(vf).join("physfn");
        if !physfn.exists() {
            return Err(SysfsError::NotAVf(vf));
        }
        let names = Sysfs::entry_names(&physfn.join("net"))?;
        let name = names.first().ok_or(SysfsError::NoPfNetdev(vf))?;
        Ok(InterfaceName::try_from(name.as_str())?)
    }

    #[instrument(level = "debug", skip(self))]
    fn vf_id(&self, vf: PciAddress) -> Result<VfId, SysfsError> {
        let physfn = self.device_dir(vf).join("physfn");
        if !physfn.exists() {
            return Err(SysfsError::NotAVf(vf));
        }
        let wanted = vf.to_string();
        for name in Sysfs::entry_names(&physfn)? {
            let Some(id) = name.strip_prefix("virtfn") else {
                continue;
            };
            if link_target_name(&physfn.join(&name))? == wanted {
                return id
                    .parse()
                    .map_err(|_| SysfsError::Malformed(physfn.join(&name)));
            }
        }
        Err(SysfsError::NotAVf(vf))
    }

    fn vf_count(&self, pf: &InterfaceName) -> Result<u32, SysfsError> {
        let path = self.netdev_device_dir(pf).join("sriov_numvfs");
        let content = std::fs::read_to_string(&path).map_err(io_error(&path))?;
        content
            .trim()
            .parse()
            .map_err(|_| SysfsError::Malformed(path))
    }

    fn vf_pci_address(&self, pf: &InterfaceName, vf: VfId) -> Result<PciAddress, SysfsError> {
        let path = self.netdev_device_dir(pf).join(format!("virtfn{vf}"));
        if std::fs::symlink_metadata(&path).is_err() {
            return Err(SysfsError::VfNotFound { pf: pf.clone(), vf });
        }
        PciAddress::from_str(&link_target_name(&path)?).map_err(|_| SysfsError::Malformed(path))
    }

    fn netdevs(&self, pci: PciAddress) -> Result<Vec<InterfaceName>, SysfsError> {
        let dir = self.device_dir(pci).join("net");
        if !dir.exists() {
            return Ok(vec![]);
        }
        Sysfs::entry_names(&dir)?
            .iter()
            .map(|name| InterfaceName::try_from(name.as_str()).map_err(Into::into))
            .collect()
    }

    fn driver(&self, pci: PciAddress) -> Result<Driver, SysfsError> {
        let path = self.device_dir(pci).join("driver");
        if std::fs::symlink_metadata(&path).is_err() {
            return Ok(Driver::Unbound);
        }
        let name = link_target_name(&path)?;
        // EnumString with a default variant is infallible
        Ok(Driver::from_str(&name).unwrap_or(Driver::Unknown(name)))
    }

    #[instrument(level = "debug", skip(self))]
    fn write_trunk(
        &self,
        pf: &InterfaceName,
        vf: VfId,
        op: TrunkOp,
        trunk: &VlanTrunk,
    ) -> Result<(), SysfsError> {
        let path = self
            .netdev_device_dir(pf)
            .join("sriov")
            .join(vf.to_string())
            .join("trunk");
        if !path.exists() {
            return Err(SysfsError::TrunkUnsupported { pf: pf.clone(), vf });
        }
        let command = format!("{op} {trunk}");
        debug!("writing '{command}' to {}", path.display());
        std::fs::write(&path, command).map_err(io_error(&path))
    }
}

#[cfg(test)]
mod test {
    use crate::fake::FakeSysfs;
    use crate::{Driver, SriovFacts, SysfsError, TrunkOp};
    use net::interface::InterfaceName;
    use net::pci::PciAddress;
    use net::vlan::VlanTrunk;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn pci(s: &str) -> PciAddress {
        PciAddress::from_str(s).unwrap()
    }

    fn tree() -> FakeSysfs {
        let fake = FakeSysfs::new().unwrap();
        fake.add_pf("enp175s0f1", pci("0000:af:00.1")).unwrap();
        fake.add_vf("enp175s0f1", 0, pci("0000:af:06.0"), Some("enp175s0f1v0"), "iavf")
            .unwrap();
        fake.add_vf("enp175s0f1", 1, pci("0000:af:06.1"), None, "vfio-pci")
            .unwrap();
        fake
    }

    #[test]
    fn resolves_pf_and_vf_id() {
        let fake = tree();
        let sysfs = fake.sysfs();
        assert_eq!(sysfs.pf_name(pci("0000:af:06.1")).unwrap().as_str(), "enp175s0f1");
        assert_eq!(sysfs.vf_id(pci("0000:af:06.0")).unwrap(), 0);
        assert_eq!(sysfs.vf_id(pci("0000:af:06.1")).unwrap(), 1);
        assert!(matches!(
            sysfs.vf_id(pci("0000:af:00.1")),
            Err(SysfsError::NotAVf(_))
        ));
    }

    #[test]
    fn enumerates_vfs() {
        let fake = tree();
        let sysfs = fake.sysfs();
        let pf = InterfaceName::try_from("enp175s0f1").unwrap();
        assert_eq!(sysfs.vf_count(&pf).unwrap(), 2);
        assert_eq!(sysfs.vf_pci_address(&pf, 1).unwrap(), pci("0000:af:06.1"));
        assert!(matches!(
            sysfs.vf_pci_address(&pf, 7),
            Err(SysfsError::VfNotFound { vf: 7, .. })
        ));
    }

    #[test]
    fn netdevs_and_drivers() {
        let fake = tree();
        let sysfs = fake.sysfs();
        assert_eq!(
            sysfs.netdevs(pci("0000:af:06.0")).unwrap(),
            vec![InterfaceName::try_from("enp175s0f1v0").unwrap()]
        );
        assert!(sysfs.netdevs(pci("0000:af:06.1")).unwrap().is_empty());
        assert_eq!(sysfs.driver(pci("0000:af:06.0")).unwrap(), Driver::Iavf);
        assert_eq!(sysfs.driver(pci("0000:af:06.1")).unwrap(), Driver::VfioPci);
        assert_eq!(sysfs.driver(pci("0000:af:07.0")).unwrap(), Driver::Unbound);
        assert!(Driver::userspace().contains(&Driver::VfioPci));
        assert_eq!(
            Driver::from_str("bnxt_en").unwrap(),
            Driver::Unknown("bnxt_en".to_string())
        );
    }

    #[test]
    fn trunk_writer() {
        let fake = tree();
        let sysfs = fake.sysfs();
        let pf = InterfaceName::try_from("enp175s0f1").unwrap();
        let trunk = VlanTrunk::from_str("1,4-6,10").unwrap();
        assert!(matches!(
            sysfs.write_trunk(&pf, 0, TrunkOp::Add, &trunk),
            Err(SysfsError::TrunkUnsupported { vf: 0, .. })
        ));
        let attribute = fake.enable_trunk("enp175s0f1", 0).unwrap();
        sysfs.write_trunk(&pf, 0, TrunkOp::Add, &trunk).unwrap();
        assert_eq!(std::fs::read_to_string(&attribute).unwrap(), "add 1,4-6,10");
        sysfs.write_trunk(&pf, 0, TrunkOp::Remove, &trunk).unwrap();
        assert_eq!(std::fs::read_to_string(&attribute).unwrap(), "rem 1,4-6,10");
    }
}
