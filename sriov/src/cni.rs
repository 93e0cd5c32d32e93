// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The JSON documents exchanged with the container runtime and with IPAM plugins.

use ipnet::IpNet;
use net::eth::mac::Mac;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// CNI versions this plugin speaks.
pub const SUPPORTED_VERSIONS: &[&str] = &["0.1.0", "0.2.0", "0.3.0", "0.3.1", "0.4.0", "1.0.0"];

/// Used when the configuration does not say.
pub const LATEST_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<Mac>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConfig {
    pub address: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    /// Index into [`CniResult::interfaces`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub dst: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dns {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Dns {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Dns::default()
    }
}

/// The result of ADD, and what an IPAM plugin returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CniResult {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IpConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
    #[serde(default, skip_serializing_if = "Dns::is_empty")]
    pub dns: Dns,
}

impl CniResult {
    /// Take over the addressing of an IPAM result, attributing every address to interface 0.
    pub fn adopt(&mut self, assigned: CniResult) {
        self.ips = assigned
            .ips
            .into_iter()
            .map(|ip| IpConfig {
                interface: Some(0),
                ..ip
            })
            .collect();
        self.routes = assigned.routes;
        self.dns = assigned.dns;
    }

    /// The plain addresses of [`CniResult::ips`].
    #[must_use]
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.ips.iter().map(|ip| ip.address.addr()).collect()
    }

    /// The gateway of the first address of the same family as `destination`.
    #[must_use]
    pub fn gateway_for(&self, destination: &IpNet) -> Option<IpAddr> {
        self.ips
            .iter()
            .filter(|ip| ip.address.addr().is_ipv4() == destination.addr().is_ipv4())
            .find_map(|ip| ip.gateway)
    }
}

/// An error as reported to the runtime (and by delegated plugins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{msg} (code {code}){}", details_suffix(.details))]
pub struct CniError {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

fn details_suffix(details: &str) -> String {
    if details.is_empty() {
        String::new()
    } else {
        format!(": {details}")
    }
}

/// Answer to `VERSION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    #[serde(rename = "supportedVersions")]
    pub supported_versions: Vec<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        VersionInfo {
            cni_version: LATEST_VERSION.to_string(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(ToString::to_string).collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::cni::{CniError, CniResult, VersionInfo};
    use ipnet::IpNet;
    use pretty_assertions::assert_eq;
    use std::net::IpAddr;
    use std::str::FromStr;

    #[test]
    fn decode_ipam_result() {
        let result: CniResult = serde_json::from_str(
            r#"{
                "cniVersion": "1.0.0",
                "ips": [
                    {"address": "10.56.217.11/24", "gateway": "10.56.217.1"},
                    {"address": "fd00::11/64"}
                ],
                "routes": [{"dst": "0.0.0.0/0"}, {"dst": "fd00:1::/64", "gw": "fd00::1"}],
                "dns": {"nameservers": ["10.56.217.1"]}
            }"#,
        )
        .unwrap();
        assert_eq!(
            result.addresses(),
            vec![
                IpAddr::from_str("10.56.217.11").unwrap(),
                IpAddr::from_str("fd00::11").unwrap()
            ]
        );
        let default = IpNet::from_str("0.0.0.0/0").unwrap();
        assert_eq!(
            result.gateway_for(&default),
            Some(IpAddr::from_str("10.56.217.1").unwrap())
        );
        assert_eq!(result.gateway_for(&IpNet::from_str("::/0").unwrap()), None);

        let mut adopted = CniResult::default();
        adopted.adopt(result);
        assert!(adopted.ips.iter().all(|ip| ip.interface == Some(0)));
        assert_eq!(adopted.dns.nameservers, vec!["10.56.217.1".to_string()]);
    }

    #[test]
    fn encode_minimal_result() {
        let result = CniResult {
            cni_version: "1.0.0".to_string(),
            ..CniResult::default()
        };
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"cniVersion":"1.0.0"}"#
        );
    }

    #[test]
    fn error_and_version_documents() {
        let error: CniError =
            serde_json::from_str(r#"{"cniVersion":"1.0.0","code":11,"msg":"busy"}"#).unwrap();
        assert_eq!(error.to_string(), "busy (code 11)");
        let version = serde_json::to_value(VersionInfo::default()).unwrap();
        assert_eq!(version["cniVersion"], "1.0.0");
        assert_eq!(version["supportedVersions"][3], "0.3.1");
    }
}
