// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Cached [`VfConfig`] records, one per container attachment.
//!
//! ADD writes the resolved configuration (including the captured [`config::OrigVfState`]) to
//! `<dataDir>/<containerId>-<ifName>` and DEL reads it back to know what to undo.

use crate::errors::AllocatorError;
use config::VfConfig;
use net::interface::InterfaceName;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        StateStore {
            dir: data_dir.to_path_buf(),
        }
    }

    #[must_use]
    pub fn path(&self, container_id: &str, ifname: &InterfaceName) -> PathBuf {
        self.dir.join(format!("{container_id}-{ifname}"))
    }

    #[instrument(level = "debug", skip(self, vf))]
    pub fn save(
        &self,
        container_id: &str,
        ifname: &InterfaceName,
        vf: &VfConfig,
    ) -> Result<(), AllocatorError> {
        let path = self.path(container_id, ifname);
        let persist = |source| AllocatorError::PersistFailed {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(persist)?;
        let json = serde_json::to_vec(vf).map_err(|source| AllocatorError::Corrupt {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(persist)?;
        debug!("cached state in {}", path.display());
        Ok(())
    }

    /// The cached configuration, or `None` if there is none.
    pub fn load(
        &self,
        container_id: &str,
        ifname: &InterfaceName,
    ) -> Result<Option<VfConfig>, AllocatorError> {
        let path = self.path(container_id, ifname);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(AllocatorError::Read { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| AllocatorError::Corrupt { path, source })
    }

    /// Forget the cached configuration.  Forgetting a missing record is not an error.
    pub fn delete(&self, container_id: &str, ifname: &InterfaceName) -> Result<(), AllocatorError> {
        let path = self.path(container_id, ifname);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(AllocatorError::PersistFailed { path, source }),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::errors::AllocatorError;
    use crate::store::StateStore;
    use config::{NetConf, OrigVfState, VfConfig, VfRequest};
    use net::eth::mac::Mac;
    use net::interface::InterfaceName;
    use pretty_assertions::assert_eq;

    fn vf() -> VfConfig {
        let conf =
            NetConf::from_slice(br#"{"deviceID":"0000:af:06.0","vlan":100,"spoofchk":"off"}"#)
                .unwrap();
        VfConfig {
            request: VfRequest::from_net_conf(&conf, None).unwrap(),
            pf_name: InterfaceName::try_from("enp175s0f1").unwrap(),
            vf_id: 0,
            dpdk_mode: false,
            orig: OrigVfState {
                host_if_name: Some(InterfaceName::try_from("enp175s0f1v0").unwrap()),
                effective_mac: Some(Mac([2, 0, 0, 0, 0, 1])),
                spoofchk: true,
                ..OrigVfState::default()
            },
        }
    }

    #[test]
    fn save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(&dir.path().join("sriov"));
        let ifname = InterfaceName::try_from("net1").unwrap();
        assert!(store.load("abc", &ifname).unwrap().is_none());
        store.save("abc", &ifname, &vf()).unwrap();
        assert!(dir.path().join("sriov/abc-net1").exists());
        assert_eq!(store.load("abc", &ifname).unwrap(), Some(vf()));
        store.delete("abc", &ifname).unwrap();
        assert!(store.load("abc", &ifname).unwrap().is_none());
        store.delete("abc", &ifname).unwrap();
    }

    #[test]
    fn corrupt_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let ifname = InterfaceName::try_from("net1").unwrap();
        std::fs::write(store.path("abc", &ifname), "{not json").unwrap();
        assert!(matches!(
            store.load("abc", &ifname),
            Err(AllocatorError::Corrupt { .. })
        ));
    }
}
