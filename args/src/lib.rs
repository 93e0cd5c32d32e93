// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The CNI invocation surface: the `CNI_*` environment and the `CNI_ARGS` key/value list.

#![deny(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used)]

pub use clap::Parser;
use net::eth::mac::Mac;
use net::interface::{IllegalInterfaceName, InterfaceName};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The operation the container runtime asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
pub enum CniCommand {
    /// Attach a VF to a container.
    #[strum(serialize = "ADD")]
    Add,
    /// Detach a VF from a container.
    #[strum(serialize = "DEL")]
    Del,
    /// Verify a previous attach is still in place.
    #[strum(serialize = "CHECK")]
    Check,
    /// Report the supported CNI versions.
    #[strum(serialize = "VERSION")]
    Version,
}

/// Errors in the invocation environment.
#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    #[error("required environment variable {0} is missing")]
    Missing(&'static str),
    #[error("invalid CNI_IFNAME: {0}")]
    InterfaceName(#[from] IllegalInterfaceName),
    #[error("invalid CNI_ARGS element '{0}': expected KEY=VALUE")]
    Pair(String),
    #[error("invalid MAC in CNI_ARGS: {0}")]
    Mac(#[from] net::eth::mac::MacParseError),
}

/// The `CNI_ARGS` key/value list (`K1=V1;K2=V2`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CniArgs(BTreeMap<String, String>);

impl CniArgs {
    /// Look up a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The `MAC` key, if given.
    ///
    /// # Errors
    ///
    /// Returns [`ArgsError::Mac`] if the value is not a MAC address.
    pub fn mac(&self) -> Result<Option<Mac>, ArgsError> {
        self.get("MAC").map(Mac::from_str).transpose().map_err(Into::into)
    }
}

impl FromStr for CniArgs {
    type Err = ArgsError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        input
            .split(';')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
                _ => Err(ArgsError::Pair(pair.to_string())),
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(CniArgs)
    }
}

#[derive(Parser, Debug)]
#[command(name = "sriov")]
#[command(about = "SR-IOV virtual function CNI plugin", long_about = None)]
pub struct CmdArgs {
    #[arg(
        long,
        env = "CNI_COMMAND",
        value_parser = CniCommand::from_str,
        help = "CNI operation: ADD, DEL, CHECK or VERSION"
    )]
    command: CniCommand,

    #[arg(long, env = "CNI_CONTAINERID", default_value = "")]
    container_id: String,

    #[arg(
        long,
        env = "CNI_NETNS",
        default_value = "",
        help = "Path of the target network namespace"
    )]
    netns: String,

    #[arg(
        long,
        env = "CNI_IFNAME",
        default_value = "",
        help = "Interface name the VF gets inside the container"
    )]
    ifname: String,

    #[arg(long, env = "CNI_ARGS", default_value = "")]
    args: String,

    #[arg(
        long,
        env = "CNI_PATH",
        default_value = "",
        help = "Colon separated list of directories holding CNI plugins"
    )]
    path: String,
}

impl CmdArgs {
    #[must_use]
    pub fn command(&self) -> CniCommand {
        self.command
    }

    /// The container id.
    ///
    /// # Errors
    ///
    /// Fails if `CNI_CONTAINERID` is unset or empty.
    pub fn container_id(&self) -> Result<&str, ArgsError> {
        if self.container_id.is_empty() {
            return Err(ArgsError::Missing("CNI_CONTAINERID"));
        }
        Ok(&self.container_id)
    }

    /// The target network namespace, or `None` if the runtime did not supply one.
    ///
    /// Runtimes pass an empty `CNI_NETNS` on DEL once the namespace is gone.
    #[must_use]
    pub fn netns(&self) -> Option<&Path> {
        if self.netns.is_empty() {
            None
        } else {
            Some(Path::new(&self.netns))
        }
    }

    /// The pod-side interface name.
    ///
    /// # Errors
    ///
    /// Fails if `CNI_IFNAME` is missing or not a legal interface name.
    pub fn ifname(&self) -> Result<InterfaceName, ArgsError> {
        if self.ifname.is_empty() {
            return Err(ArgsError::Missing("CNI_IFNAME"));
        }
        Ok(InterfaceName::try_from(self.ifname.as_str())?)
    }

    /// The parsed `CNI_ARGS`.
    ///
    /// # Errors
    ///
    /// Fails if an element is not a `KEY=VALUE` pair.
    pub fn cni_args(&self) -> Result<CniArgs, ArgsError> {
        CniArgs::from_str(&self.args)
    }

    /// The directories named by `CNI_PATH`.
    #[must_use]
    pub fn plugin_dirs(&self) -> Vec<PathBuf> {
        std::env::split_paths(&self.path)
            .filter(|dir| !dir.as_os_str().is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::{ArgsError, CmdArgs, CniArgs, CniCommand, Parser};
    use net::eth::mac::Mac;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::str::FromStr;

    #[test]
    fn test_parse_cni_args() {
        let args = CniArgs::from_str("IgnoreUnknown=1;K8S_POD_NAME=pod-a;MAC=02:00:00:00:00:0A")
            .unwrap();
        assert_eq!(args.get("IgnoreUnknown"), Some("1"));
        assert_eq!(args.get("K8S_POD_NAME"), Some("pod-a"));
        assert_eq!(
            args.mac().unwrap(),
            Some(Mac([0x02, 0, 0, 0, 0, 0x0a]))
        );

        assert_eq!(CniArgs::from_str("").unwrap(), CniArgs::default());
        assert!(CniArgs::default().mac().unwrap().is_none());
        assert!(matches!(
            CniArgs::from_str("IgnoreUnknown"),
            Err(ArgsError::Pair(_))
        ));
        assert!(CniArgs::from_str("MAC=nope").unwrap().mac().is_err());
    }

    #[test]
    fn test_parse_command_line() {
        let args = CmdArgs::try_parse_from([
            "sriov",
            "--command",
            "ADD",
            "--container-id",
            "c0ffee",
            "--netns",
            "/var/run/netns/pod",
            "--ifname",
            "net1",
            "--path",
            "/opt/cni/bin:/usr/libexec/cni",
        ])
        .unwrap();
        assert_eq!(args.command(), CniCommand::Add);
        assert_eq!(args.container_id().unwrap(), "c0ffee");
        assert_eq!(args.netns().unwrap().to_str(), Some("/var/run/netns/pod"));
        assert_eq!(args.ifname().unwrap().as_str(), "net1");
        assert_eq!(
            args.plugin_dirs(),
            vec![
                PathBuf::from("/opt/cni/bin"),
                PathBuf::from("/usr/libexec/cni")
            ]
        );
    }

    #[test]
    fn test_missing_values() {
        let args = CmdArgs::try_parse_from(["sriov", "--command", "DEL"]).unwrap();
        assert!(args.netns().is_none());
        assert!(matches!(
            args.container_id(),
            Err(ArgsError::Missing("CNI_CONTAINERID"))
        ));
        assert!(matches!(args.ifname(), Err(ArgsError::Missing("CNI_IFNAME"))));
        assert!(args.plugin_dirs().is_empty());
        assert!(CmdArgs::try_parse_from(["sriov", "--command", "STATUS"]).is_err());
    }
}
