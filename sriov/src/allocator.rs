// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Cross-process ownership of VF PCI addresses.
//!
//! Two things live under `<dataDir>/pci`:
//!
//! * `vf_lock/<pci>.lock`: an advisory `flock` held for the duration of one ADD or DEL, which
//!   totally orders operations on the same device across plugin processes.
//! * `<pci>`: the allocation record, holding the path of the namespace the VF was given to.

use crate::errors::AllocatorError;
use interface_manager::{NamespaceOps, NetnsError};
use net::pci::PciAddress;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How often a contended lock is retried.
const LOCK_POLL: Duration = Duration::from_millis(10);

/// Exclusive ownership of one PCI address.  Released on drop.
#[derive(Debug)]
pub struct PciLock {
    pci: PciAddress,
    _lock: Flock<File>,
}

impl Drop for PciLock {
    fn drop(&mut self) {
        debug!("releasing lock of {}", self.pci);
    }
}

#[derive(Debug, Clone)]
pub struct PciAllocator {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl PciAllocator {
    #[must_use]
    pub fn new(data_dir: &Path, lock_timeout: Duration) -> Self {
        PciAllocator {
            dir: data_dir.join("pci"),
            lock_timeout,
        }
    }

    #[must_use]
    pub fn record_path(&self, pci: PciAddress) -> PathBuf {
        self.dir.join(pci.to_string())
    }

    #[must_use]
    pub fn lock_path(&self, pci: PciAddress) -> PathBuf {
        self.dir.join("vf_lock").join(format!("{pci}.lock"))
    }

    /// Take the lock of `pci`, waiting at most the configured timeout.
    ///
    /// The wait happens on a worker thread polling a non-blocking `flock`.  On timeout the worker
    /// is told to give up, so the lock is never taken behind the caller's back.
    #[instrument(level = "debug", skip(self))]
    pub fn lock(&self, pci: PciAddress) -> Result<PciLock, AllocatorError> {
        let path = self.lock_path(pci);
        let persist = |source| AllocatorError::PersistFailed {
            path: path.clone(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(persist)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(persist)?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let worker = {
            let cancelled = cancelled.clone();
            move || {
                let mut file = file;
                loop {
                    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                        Ok(lock) => {
                            // dropping the lock releases it if nobody is waiting anymore
                            let _ = tx.send(Ok(lock));
                            return;
                        }
                        Err((contended, Errno::EWOULDBLOCK)) => {
                            if cancelled.load(Ordering::Relaxed) {
                                return;
                            }
                            file = contended;
                            std::thread::sleep(LOCK_POLL);
                        }
                        Err((_, errno)) => {
                            let _ = tx.send(Err(errno));
                            return;
                        }
                    }
                }
            }
        };
        std::thread::Builder::new()
            .name(format!("lock-{pci}"))
            .spawn(worker)
            .map_err(persist)?;

        match rx.recv_timeout(self.lock_timeout) {
            Ok(Ok(lock)) => {
                debug!("locked {pci}");
                Ok(PciLock { pci, _lock: lock })
            }
            Ok(Err(source)) => Err(AllocatorError::Lock { path, source }),
            Err(RecvTimeoutError::Timeout) => {
                cancelled.store(true, Ordering::Relaxed);
                Err(AllocatorError::LockTimeout {
                    pci,
                    timeout: self.lock_timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(AllocatorError::LockWorker(pci)),
        }
    }

    /// Record that `pci` now belongs to the namespace at `netns`.
    #[instrument(level = "debug", skip(self))]
    pub fn save_allocated(&self, pci: PciAddress, netns: &Path) -> Result<(), AllocatorError> {
        let path = self.record_path(pci);
        let persist = |source| AllocatorError::PersistFailed {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(persist)?;
        std::fs::write(&path, netns.as_os_str().as_encoded_bytes()).map_err(persist)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn delete_allocated(&self, pci: PciAddress) -> Result<(), AllocatorError> {
        let path = self.record_path(pci);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(AllocatorError::RecordNotFound(pci))
            }
            Err(source) => Err(AllocatorError::PersistFailed { path, source }),
        }
    }

    /// True if `pci` is held by a namespace which still exists.
    ///
    /// A record pointing at a vanished namespace is stale: it is deleted and `pci` is reported
    /// free.
    #[instrument(level = "debug", skip(self, namespaces))]
    pub fn is_allocated<N: NamespaceOps>(
        &self,
        pci: PciAddress,
        namespaces: &N,
    ) -> Result<bool, AllocatorError> {
        let path = self.record_path(pci);
        let netns = match std::fs::read_to_string(&path) {
            Ok(netns) => PathBuf::from(netns.trim()),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(AllocatorError::Read { path, source }),
        };
        match namespaces.open(&netns) {
            Ok(_) => {
                debug!("{pci} is held by {}", netns.display());
                Ok(true)
            }
            Err(NetnsError::NotFound(_) | NetnsError::NotANamespace(_)) => {
                info!(
                    "{pci} was held by {} which no longer exists, releasing",
                    netns.display()
                );
                match self.delete_allocated(pci) {
                    Ok(()) | Err(AllocatorError::RecordNotFound(_)) => Ok(false),
                    Err(err) => {
                        warn!("failed to delete stale record of {pci}: {err}");
                        Err(err)
                    }
                }
            }
            Err(source) => Err(AllocatorError::Namespace { pci, source }),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::allocator::PciAllocator;
    use crate::errors::AllocatorError;
    use interface_manager::mock::MockNamespaces;
    use net::pci::PciAddress;
    use std::str::FromStr;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn pci() -> PciAddress {
        PciAddress::from_str("0000:af:00.1").unwrap()
    }

    #[test]
    fn fresh_address_is_free() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = PciAllocator::new(dir.path(), Duration::from_secs(1));
        let kernel = MockNamespaces::new();
        assert!(!allocator.is_allocated(pci(), &kernel).unwrap());
    }

    #[test]
    fn allocation_follows_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = PciAllocator::new(dir.path(), Duration::from_secs(1));
        let kernel = MockNamespaces::new();
        let netns = kernel.add_namespace("pod");
        allocator.save_allocated(pci(), &netns).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("pci/0000:af:00.1")).unwrap(),
            netns.to_string_lossy()
        );
        assert!(allocator.is_allocated(pci(), &kernel).unwrap());

        kernel.remove_namespace("pod");
        assert!(!allocator.is_allocated(pci(), &kernel).unwrap());
        assert!(!allocator.record_path(pci()).exists());
        assert!(matches!(
            allocator.delete_allocated(pci()),
            Err(AllocatorError::RecordNotFound(_))
        ));
    }

    #[test]
    fn unmounted_namespace_releases_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = PciAllocator::new(dir.path(), Duration::from_secs(1));
        let kernel = MockNamespaces::new();
        let netns = kernel.add_namespace("pod");
        allocator.save_allocated(pci(), &netns).unwrap();
        kernel.unmount_namespace("pod");
        assert!(!allocator.is_allocated(pci(), &kernel).unwrap());
        assert!(!allocator.record_path(pci()).exists());
    }

    #[test]
    fn lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = PciAllocator::new(dir.path(), Duration::from_millis(100));
        let held = allocator.lock(pci()).unwrap();
        assert!(allocator.lock_path(pci()).exists());

        let started = Instant::now();
        assert!(matches!(
            allocator.lock(pci()),
            Err(AllocatorError::LockTimeout { .. })
        ));
        assert!(started.elapsed() >= Duration::from_millis(100));

        // other devices are not affected
        allocator
            .lock(PciAddress::from_str("0000:af:00.2").unwrap())
            .unwrap();

        drop(held);
        allocator.lock(pci()).unwrap();
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = PciAllocator::new(dir.path(), Duration::from_secs(5));
        let held = allocator.lock(pci()).unwrap();
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let allocator = allocator.clone();
            std::thread::spawn(move || {
                let lock = allocator.lock(pci());
                tx.send(()).unwrap();
                lock.map(drop)
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap().unwrap();
    }
}
