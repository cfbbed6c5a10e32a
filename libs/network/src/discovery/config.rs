//! Network Description Loading
//!
//! Handles YAML network descriptions (organizations, peers, channels) with
//! environment variable substitution and reference validation.

use super::{NetworkPeer, TopologySource};
use crate::{LifecycleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Major version of the description format this crate understands
pub const DESCRIPTION_MAJOR_VERSION: &str = "1";

/// Complete network description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDescription {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub client: Option<ClientSection>,

    pub organizations: BTreeMap<String, OrganizationConfig>,

    #[serde(default)]
    pub peers: BTreeMap<String, PeerConfig>,

    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
}

/// Which organization the description was issued for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    pub organization: String,
}

/// Organization entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationConfig {
    #[serde(rename = "mspid")]
    pub msp_id: String,

    /// Peer names in anchor-first order
    #[serde(default)]
    pub peers: Vec<String>,
}

/// Peer endpoint entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub url: String,

    #[serde(rename = "tlsCACerts", default)]
    pub tls_ca_certs: Option<TlsCaCerts>,

    #[serde(rename = "grpcOptions", default)]
    pub grpc_options: BTreeMap<String, serde_yaml::Value>,
}

/// TLS trust roots for a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCaCerts {
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub pem: Option<String>,
}

/// Channel membership entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub peers: Vec<String>,
}

fn default_version() -> String {
    format!("{}.0.0", DESCRIPTION_MAJOR_VERSION)
}

impl NetworkDescription {
    /// Load description from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading network description: {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| {
            LifecycleError::config_with_source(
                format!("Failed to read network description {:?}", path),
                e,
            )
        })?;

        Self::from_yaml(&content)
    }

    /// Load description from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // Apply environment variable substitution
        let expanded_yaml = Self::expand_env_vars(yaml)?;

        let description: NetworkDescription = serde_yaml::from_str(&expanded_yaml)
            .map_err(|e| LifecycleError::config_with_source("Invalid network description", e))?;

        description.validate()?;

        Ok(description)
    }

    /// Convert description to YAML string
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LifecycleError::config_with_source("Failed to serialize description", e))
    }

    /// Validate version and cross references
    pub fn validate(&self) -> Result<()> {
        let major = self.version.split('.').next().unwrap_or_default();
        if major != DESCRIPTION_MAJOR_VERSION {
            return Err(LifecycleError::config(format!(
                "Network description version {} not compatible with expected {}.x",
                self.version, DESCRIPTION_MAJOR_VERSION
            )));
        }

        if self.organizations.is_empty() {
            return Err(LifecycleError::config(
                "Network description defines no organizations",
            ));
        }

        for (org_id, org) in &self.organizations {
            if org.msp_id.trim().is_empty() {
                return Err(LifecycleError::config(format!(
                    "Organization '{}' has an empty MSP id",
                    org_id
                )));
            }
            for peer in &org.peers {
                if !self.peers.contains_key(peer) {
                    return Err(LifecycleError::config(format!(
                        "Organization '{}' references undefined peer '{}'",
                        org_id, peer
                    )));
                }
            }
        }

        for (channel_id, channel) in &self.channels {
            for peer in &channel.peers {
                if !self.peers.contains_key(peer) {
                    return Err(LifecycleError::config(format!(
                        "Channel '{}' references undefined peer '{}'",
                        channel_id, peer
                    )));
                }
            }
        }

        Ok(())
    }

    /// Environment variable substitution for `${VAR}` and `${VAR:default}`
    fn expand_env_vars(yaml: &str) -> Result<String> {
        let env_var_regex = regex::Regex::new(r"\$\{([^}:]+)(?::([^}]*))?\}").map_err(|e| {
            LifecycleError::config(format!("Invalid environment variable pattern: {}", e))
        })?;

        let expanded = env_var_regex.replace_all(yaml, |captures: &regex::Captures<'_>| {
            let default_value = captures.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(&captures[1]).unwrap_or_else(|_| default_value.to_string())
        });

        Ok(expanded.into_owned())
    }
}

impl TopologySource for NetworkDescription {
    fn client_organization(&self) -> Option<String> {
        self.client.as_ref().map(|c| c.organization.clone())
    }

    fn organizations(&self) -> BTreeMap<String, OrganizationConfig> {
        self.organizations.clone()
    }

    fn peers_config(&self, org_id: &str) -> Option<Vec<NetworkPeer>> {
        let org = self.organizations.get(org_id)?;

        org.peers
            .iter()
            .map(|name| {
                self.peers.get(name).map(|config| NetworkPeer {
                    name: name.clone(),
                    org_id: org_id.to_string(),
                    config: config.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"
version: "1.0.0"
name: "sample-network"
client:
  organization: OrgA
organizations:
  OrgA:
    mspid: OrgAMSP
    peers: [peer0.orga.example.com, peer1.orga.example.com]
  OrgB:
    mspid: OrgBMSP
    peers: [peer0.orgb.example.com]
  OrdererOrg:
    mspid: OrdererMSP
peers:
  peer0.orga.example.com:
    url: "grpcs://${ORGA_PEER_HOST:localhost}:7051"
    tlsCACerts:
      path: /etc/fabric/orga/ca.pem
    grpcOptions:
      ssl-target-name-override: peer0.orga.example.com
  peer1.orga.example.com:
    url: grpcs://localhost:8051
  peer0.orgb.example.com:
    url: grpcs://localhost:9051
channels:
  mychannel:
    peers: [peer0.orga.example.com, peer0.orgb.example.com]
"#;

    #[test]
    fn test_parse_description() {
        let description = NetworkDescription::from_yaml(DESCRIPTION).unwrap();

        assert_eq!(description.name.as_deref(), Some("sample-network"));
        assert_eq!(description.client_organization().as_deref(), Some("OrgA"));
        assert_eq!(description.organizations.len(), 3);
        assert_eq!(description.organizations["OrgB"].msp_id, "OrgBMSP");
        assert!(description.organizations["OrdererOrg"].peers.is_empty());

        let peer0 = &description.peers["peer0.orga.example.com"];
        assert_eq!(
            peer0.tls_ca_certs.as_ref().unwrap().path,
            Some(PathBuf::from("/etc/fabric/orga/ca.pem"))
        );
        assert!(peer0.grpc_options.contains_key("ssl-target-name-override"));
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("FABRIC_TEST_PEER_HOST", "peer.internal");

        let yaml = r#"
url: "grpcs://${FABRIC_TEST_PEER_HOST}:7051"
fallback: "${FABRIC_TEST_MISSING_VAR:localhost}"
"#;
        let expanded = NetworkDescription::expand_env_vars(yaml).unwrap();

        assert!(expanded.contains("url: \"grpcs://peer.internal:7051\""));
        assert!(expanded.contains("fallback: \"localhost\""));
    }

    #[test]
    fn test_peers_config_keeps_anchor_first() {
        let description = NetworkDescription::from_yaml(DESCRIPTION).unwrap();

        let peers = description.peers_config("OrgA").unwrap();
        let names: Vec<&str> = peers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["peer0.orga.example.com", "peer1.orga.example.com"]);
        assert!(peers.iter().all(|p| p.org_id == "OrgA"));

        assert!(description.peers_config("OrgZ").is_none());
        assert_eq!(description.peers_config("OrdererOrg"), Some(vec![]));
    }

    #[test]
    fn test_undefined_peer_rejected() {
        let yaml = r#"
organizations:
  OrgA:
    mspid: OrgAMSP
    peers: [ghost.orga.example.com]
"#;
        let err = NetworkDescription::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("ghost.orga.example.com"));
    }

    #[test]
    fn test_incompatible_version_rejected() {
        let yaml = r#"
version: "2.0.0"
organizations:
  OrgA:
    mspid: OrgAMSP
"#;
        assert!(NetworkDescription::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_yaml_round_trip_preserves_orgs() {
        let description = NetworkDescription::from_yaml(DESCRIPTION).unwrap();
        let yaml = description.to_yaml().unwrap();
        let reparsed = NetworkDescription::from_yaml(&yaml).unwrap();
        assert_eq!(reparsed.organizations, description.organizations);
    }
}
