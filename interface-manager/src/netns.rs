// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Network namespace handles and the "run this inside namespace X" primitive.

use crate::link::{LinkError, LinkOps};
use crate::rtnl::RtNetlink;
use nix::sched::CloneFlags;
use nix::sys::statfs::{NSFS_MAGIC, PROC_SUPER_MAGIC, fstatfs};
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::ErrorKind;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

#[derive(Debug, thiserror::Error)]
pub enum NetnsError {
    #[error("network namespace {0} does not exist")]
    NotFound(PathBuf),
    #[error("{0} is not a network namespace")]
    NotANamespace(PathBuf),
    #[error("failed to open network namespace {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to enter network namespace {path}: {errno}")]
    Enter { path: PathBuf, errno: nix::errno::Errno },
    #[error("failed to start namespace worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("namespace worker panicked")]
    Panicked,
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Namespace capability: open namespaces and run work inside them.
pub trait NamespaceOps {
    type Netns: Display + Send + Sync;
    type Links: LinkOps<Netns = Self::Netns>;

    /// Open the namespace at `path`.  Fails with [`NetnsError::NotFound`] if it is gone and with
    /// [`NetnsError::NotANamespace`] if only the (unmounted) bind mount target is left.
    fn open(&self, path: &Path) -> Result<Self::Netns, NetnsError>;

    /// A handle to the namespace this process started in.
    fn current(&self) -> Result<Self::Netns, NetnsError>;

    /// Links of the namespace this process started in.
    fn links(&self) -> &Self::Links;

    /// Run `work` with `netns` entered, handing it links bound to that namespace.
    ///
    /// Namespace membership is per OS thread.  Implementations must run `work` on a thread which
    /// is in `netns` for the whole call and on which nothing else runs meanwhile; the calling
    /// thread's own namespace is never changed.
    fn run_in<R, F>(&self, netns: &Self::Netns, work: F) -> Result<R, NetnsError>
    where
        F: FnOnce(&Self::Links) -> R + Send,
        R: Send;
}

/// An open network namespace.
#[derive(Debug)]
pub struct Netns {
    path: PathBuf,
    file: File,
}

impl Netns {
    /// Open the namespace bind mounted (or linked from `/proc`) at `path`.
    pub fn open(path: &Path) -> Result<Self, NetnsError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(NetnsError::NotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(NetnsError::Open {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let fs = fstatfs(&file).map_err(|errno| NetnsError::Open {
            path: path.to_path_buf(),
            source: errno.into(),
        })?;
        let magic = fs.filesystem_type();
        if magic != NSFS_MAGIC && magic != PROC_SUPER_MAGIC {
            debug!("{} is on {magic:?}, not nsfs", path.display());
            return Err(NetnsError::NotANamespace(path.to_path_buf()));
        }
        Ok(Netns {
            path: path.to_path_buf(),
            file,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRawFd for Netns {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl Display for Netns {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// [`NamespaceOps`] for the running kernel.
#[derive(Debug)]
pub struct KernelNamespaces {
    links: RtNetlink,
}

impl KernelNamespaces {
    /// Connect to rtnetlink in the namespace of the calling thread.
    pub fn new() -> Result<Self, NetnsError> {
        Ok(KernelNamespaces {
            links: RtNetlink::connect()?,
        })
    }
}

impl NamespaceOps for KernelNamespaces {
    type Netns = Netns;
    type Links = RtNetlink;

    fn open(&self, path: &Path) -> Result<Netns, NetnsError> {
        Netns::open(path)
    }

    fn current(&self) -> Result<Netns, NetnsError> {
        Netns::open(Path::new("/proc/thread-self/ns/net"))
    }

    fn links(&self) -> &RtNetlink {
        &self.links
    }

    /// Each call gets a fresh scoped thread which enters `netns` and is discarded afterwards, so
    /// no thread is ever handed back to anyone in the wrong namespace.
    #[instrument(level = "debug", skip(self, work), fields(netns = %netns))]
    fn run_in<R, F>(&self, netns: &Netns, work: F) -> Result<R, NetnsError>
    where
        F: FnOnce(&RtNetlink) -> R + Send,
        R: Send,
    {
        std::thread::scope(|scope| {
            let worker = std::thread::Builder::new()
                .name("netns".to_string())
                .spawn_scoped(scope, || {
                    nix::sched::setns(&netns.file, CloneFlags::CLONE_NEWNET).map_err(|errno| {
                        NetnsError::Enter {
                            path: netns.path.clone(),
                            errno,
                        }
                    })?;
                    debug!("entered {netns}");
                    let links = RtNetlink::connect()?;
                    Ok(work(&links))
                })
                .map_err(NetnsError::Spawn)?;
            worker.join().map_err(|_| NetnsError::Panicked)?
        })
    }
}
