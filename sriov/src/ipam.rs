// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Delegation of address management to a separate CNI plugin.

use crate::cni::{CniError, CniResult};
use args::CniCommand;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, instrument};

#[derive(Debug, thiserror::Error)]
pub enum IpamError {
    #[error("ipam plugin {plugin} not found in {dirs:?}")]
    NotFound { plugin: String, dirs: Vec<PathBuf> },
    #[error("failed to run ipam plugin {plugin}: {source}")]
    Spawn {
        plugin: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ipam plugin {plugin} failed: {error}")]
    Failed { plugin: String, error: CniError },
    #[error("ipam plugin {plugin} exited with {status}: {stderr}")]
    Exit {
        plugin: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("ipam plugin {plugin} returned garbage: {source}")]
    Decode {
        plugin: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Runs the IPAM half of the network configuration.
///
/// `conf` is the network configuration exactly as the runtime passed it.
pub trait IpamDelegate {
    fn add(&self, plugin: &str, conf: &[u8]) -> Result<CniResult, IpamError>;
    fn del(&self, plugin: &str, conf: &[u8]) -> Result<(), IpamError>;
    fn check(&self, plugin: &str, conf: &[u8]) -> Result<(), IpamError>;
}

/// Executes IPAM plugins found in the `CNI_PATH` directories.
///
/// The child inherits our `CNI_*` environment; only `CNI_COMMAND` is replaced.
#[derive(Debug, Clone)]
pub struct ExecDelegate {
    dirs: Vec<PathBuf>,
}

impl ExecDelegate {
    #[must_use]
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        ExecDelegate { dirs }
    }

    fn find(&self, plugin: &str) -> Result<PathBuf, IpamError> {
        let not_found = || IpamError::NotFound {
            plugin: plugin.to_string(),
            dirs: self.dirs.clone(),
        };
        if plugin.is_empty() || Path::new(plugin).components().count() != 1 {
            return Err(not_found());
        }
        self.dirs
            .iter()
            .map(|dir| dir.join(plugin))
            .find(|path| path.is_file())
            .ok_or_else(not_found)
    }

    #[instrument(level = "debug", skip(self, conf))]
    fn exec(&self, plugin: &str, command: CniCommand, conf: &[u8]) -> Result<Vec<u8>, IpamError> {
        let path = self.find(plugin)?;
        let spawn = |source| IpamError::Spawn {
            plugin: plugin.to_string(),
            source,
        };
        debug!("running {}", path.display());
        let mut child = Command::new(&path)
            .env("CNI_COMMAND", command.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(conf).map_err(spawn)?;
        }
        let output = child.wait_with_output().map_err(spawn)?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        Err(match serde_json::from_slice::<CniError>(&output.stdout) {
            Ok(error) => IpamError::Failed {
                plugin: plugin.to_string(),
                error,
            },
            Err(_) => IpamError::Exit {
                plugin: plugin.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            },
        })
    }
}

impl IpamDelegate for ExecDelegate {
    fn add(&self, plugin: &str, conf: &[u8]) -> Result<CniResult, IpamError> {
        let stdout = self.exec(plugin, CniCommand::Add, conf)?;
        serde_json::from_slice(&stdout).map_err(|source| IpamError::Decode {
            plugin: plugin.to_string(),
            source,
        })
    }

    fn del(&self, plugin: &str, conf: &[u8]) -> Result<(), IpamError> {
        self.exec(plugin, CniCommand::Del, conf).map(drop)
    }

    fn check(&self, plugin: &str, conf: &[u8]) -> Result<(), IpamError> {
        self.exec(plugin, CniCommand::Check, conf).map(drop)
    }
}
