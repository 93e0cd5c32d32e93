// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Values injected by the container runtime through capability arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

/// The network configuration as the runtime sent it.
///
/// Numeric fields are wide and signed so that out of range input is reported by validation
/// with a useful message instead of a serde type error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetConf {
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    #[serde(rename = "deviceID", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<i64>,
    #[serde(rename = "vlanQoS", default, skip_serializing_if = "Option::is_none")]
    pub vlan_qos: Option<i64>,
    #[serde(rename = "vlanProto", default, skip_serializing_if = "Option::is_none")]
    pub vlan_proto: Option<String>,
    #[serde(rename = "vlanTrunk", default, skip_serializing_if = "Option::is_none")]
    pub vlan_trunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_tx_rate: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tx_rate: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spoofchk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam: Option<serde_json::Value>,
    #[serde(rename = "runtimeConfig", default)]
    pub runtime_config: RuntimeConfig,
    #[serde(rename = "logLevel", default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(rename = "logFile", default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(rename = "dataDir", default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(rename = "prevResult", default, skip_serializing_if = "Option::is_none")]
    pub prev_result: Option<serde_json::Value>,
}

impl NetConf {
    /// Decode the configuration the runtime wrote on stdin.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The `type` of the IPAM plugin, if one is configured.
    #[must_use]
    pub fn ipam_type(&self) -> Option<&str> {
        self.ipam
            .as_ref()?
            .get("type")?
            .as_str()
            .filter(|kind| !kind.is_empty())
    }
}

#[cfg(test)]
mod test {
    use super::NetConf;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_runtime_document() {
        let conf = NetConf::from_slice(
            br#"{
                "cniVersion": "1.0.0",
                "name": "sriov-net",
                "type": "sriov",
                "deviceID": "0000:af:06.0",
                "vlan": 1259,
                "vlanQoS": 5,
                "spoofchk": "off",
                "max_tx_rate": 40,
                "ipam": { "type": "host-local", "subnet": "10.56.217.0/24" },
                "runtimeConfig": { "mac": "CA:FE:C0:FF:EE:00" },
                "logLevel": "debug"
            }"#,
        )
        .unwrap();
        assert_eq!(conf.device_id.as_deref(), Some("0000:af:06.0"));
        assert_eq!(conf.vlan, Some(1259));
        assert_eq!(conf.vlan_qos, Some(5));
        assert_eq!(conf.vlan_proto, None);
        assert_eq!(conf.max_tx_rate, Some(40));
        assert_eq!(conf.min_tx_rate, None);
        assert_eq!(conf.ipam_type(), Some("host-local"));
        assert_eq!(conf.runtime_config.mac.as_deref(), Some("CA:FE:C0:FF:EE:00"));
        assert_eq!(conf.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn minimal_document() {
        let conf = NetConf::from_slice(br#"{"cniVersion":"0.4.0","name":"n","type":"sriov"}"#)
            .unwrap();
        assert!(conf.device_id.is_none());
        assert!(conf.ipam_type().is_none());
        assert!(NetConf::from_slice(b"{").is_err());
    }
}
