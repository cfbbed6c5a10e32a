//! Topology Resolution
//!
//! Resolves a client organization's view of the network: its MSP id, its
//! peers, its user and admin signing identities, and the peers of every
//! participating organization.

use super::{is_orderer_org, TopologySource};
use crate::fabric::{FabricConnector, FabricSdk, Peer, SigningIdentity};
use crate::{LifecycleError, Result};
use fabric_config::defaults::identities::ADMIN_USER;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fully populated topology of one client organization
#[derive(Debug, Clone)]
pub struct ResolvedTopology {
    client_org_id: String,
    client_org_msp_id: String,
    client_org_peers: Vec<Peer>,
    username: String,
    client_user: SigningIdentity,
    client_admin_user: SigningIdentity,
    all_org_ids: Vec<String>,
    msp_id_by_org: BTreeMap<String, String>,
    org_id_by_peer: HashMap<String, String>,
    peers_by_org: BTreeMap<String, Vec<Peer>>,
}

impl ResolvedTopology {
    pub fn client_org_id(&self) -> &str {
        &self.client_org_id
    }

    pub fn client_org_msp_id(&self) -> &str {
        &self.client_org_msp_id
    }

    /// Client organization peers in anchor-first order
    pub fn client_org_peers(&self) -> &[Peer] {
        &self.client_org_peers
    }

    /// Username the client organization signs invoke/query requests as
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn client_user(&self) -> &SigningIdentity {
        &self.client_user
    }

    pub fn client_admin_user(&self) -> &SigningIdentity {
        &self.client_admin_user
    }

    /// Participating organizations, ordering-service orgs excluded
    pub fn all_org_ids(&self) -> &[String] {
        &self.all_org_ids
    }

    /// MSP ids of participating organizations
    pub fn msp_ids(&self) -> impl Iterator<Item = &str> {
        self.msp_id_by_org.values().map(String::as_str)
    }

    pub fn msp_id_of(&self, org_id: &str) -> Option<&str> {
        self.msp_id_by_org.get(org_id).map(String::as_str)
    }

    /// Owning organization of a peer, by peer name
    pub fn org_id_of_peer(&self, peer_name: &str) -> Option<&str> {
        self.org_id_by_peer.get(peer_name).map(String::as_str)
    }

    pub fn peers_by_org(&self) -> &BTreeMap<String, Vec<Peer>> {
        &self.peers_by_org
    }
}

/// Resolved topology together with the SDK handle created for it
pub struct ResolvedNetwork {
    pub topology: Arc<ResolvedTopology>,
    pub sdk: Arc<dyn FabricSdk>,
}

/// Resolves topology sources through a fabric connector
pub struct TopologyResolver {
    connector: Arc<dyn FabricConnector>,
}

impl TopologyResolver {
    pub fn new(connector: Arc<dyn FabricConnector>) -> Self {
        Self { connector }
    }

    /// Resolve the view of `client_org_id` signing as `username`
    ///
    /// Connects exactly once. If anything after the connection fails, the
    /// handle is closed before the error is returned.
    pub async fn resolve(
        &self,
        source: &dyn TopologySource,
        client_org_id: &str,
        username: &str,
    ) -> Result<ResolvedNetwork> {
        if let Some(issued_for) = source.client_organization() {
            if issued_for != client_org_id {
                warn!(
                    "Network description was issued for org '{}', resolving for '{}'",
                    issued_for, client_org_id
                );
            }
        }

        let sdk = self.connector.connect(source).await.map_err(|e| {
            LifecycleError::config_with_source(
                format!("Network config initialization failed for org '{}'", client_org_id),
                e,
            )
        })?;

        match Self::populate(sdk.as_ref(), source, client_org_id, username).await {
            Ok(topology) => {
                info!(
                    "Resolved topology for client org {} ({}): {} participating org(s), {} client peer(s)",
                    topology.client_org_id,
                    topology.client_org_msp_id,
                    topology.all_org_ids.len(),
                    topology.client_org_peers.len()
                );
                Ok(ResolvedNetwork {
                    topology: Arc::new(topology),
                    sdk,
                })
            }
            Err(e) => {
                sdk.close();
                Err(e)
            }
        }
    }

    async fn populate(
        sdk: &dyn FabricSdk,
        source: &dyn TopologySource,
        client_org_id: &str,
        username: &str,
    ) -> Result<ResolvedTopology> {
        let organizations = source.organizations();

        let client_org = organizations.get(client_org_id).ok_or_else(|| {
            LifecycleError::config(format!(
                "OrgID: {} is invalid. Failed to find the MSPID.",
                client_org_id
            ))
        })?;

        let client_org_peers = Self::create_peers(sdk, source, client_org_id).await?;

        let client_user = sdk
            .signing_identity(client_org_id, username)
            .await
            .map_err(|e| LifecycleError::identity(username, client_org_id, e))?;

        let client_admin_user = sdk
            .signing_identity(client_org_id, ADMIN_USER)
            .await
            .map_err(|e| LifecycleError::identity(ADMIN_USER, client_org_id, e))?;

        let mut all_org_ids = Vec::new();
        let mut msp_id_by_org = BTreeMap::new();
        let mut org_id_by_peer = HashMap::new();

        for (org_id, org) in &organizations {
            if is_orderer_org(org_id) {
                debug!("Skipping ordering service org {}", org_id);
                continue;
            }
            all_org_ids.push(org_id.clone());
            msp_id_by_org.insert(org_id.clone(), org.msp_id.clone());
            for peer in &org.peers {
                org_id_by_peer.insert(peer.clone(), org_id.clone());
            }
        }

        if all_org_ids.is_empty() {
            return Err(LifecycleError::config(
                "Topology has no participating organizations",
            ));
        }

        let mut peers_by_org = BTreeMap::new();
        for org_id in &all_org_ids {
            let peers = if org_id == client_org_id {
                client_org_peers.clone()
            } else {
                Self::create_peers(sdk, source, org_id).await?
            };
            peers_by_org.insert(org_id.clone(), peers);
        }

        Ok(ResolvedTopology {
            client_org_id: client_org_id.to_string(),
            client_org_msp_id: client_org.msp_id.clone(),
            client_org_peers,
            username: username.to_string(),
            client_user,
            client_admin_user,
            all_org_ids,
            msp_id_by_org,
            org_id_by_peer,
            peers_by_org,
        })
    }

    async fn create_peers(
        sdk: &dyn FabricSdk,
        source: &dyn TopologySource,
        org_id: &str,
    ) -> Result<Vec<Peer>> {
        let configs = source.peers_config(org_id).ok_or_else(|| {
            LifecycleError::config(format!(
                "OrgID: {} is invalid. Failed to find the PeerConfigs.",
                org_id
            ))
        })?;

        let mut peers = Vec::with_capacity(configs.len());
        for config in &configs {
            let peer = sdk.create_peer(config).await.map_err(|e| {
                LifecycleError::config_with_source(
                    format!("Failed to create peer '{}' of org '{}'", config.name, org_id),
                    e,
                )
            })?;
            peers.push(peer);
        }

        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::NetworkDescription;
    use crate::fabric::memory::{InMemoryFabric, MemoryConnector};

    const DESCRIPTION: &str = r#"
organizations:
  OrgA:
    mspid: OrgAMSP
    peers: [peer0.orga, peer1.orga]
  OrgB:
    mspid: OrgBMSP
    peers: [peer0.orgb]
  OrdererOrg:
    mspid: OrdererMSP
peers:
  peer0.orga: { url: "grpcs://localhost:7051" }
  peer1.orga: { url: "grpcs://localhost:8051" }
  peer0.orgb: { url: "grpcs://localhost:9051" }
"#;

    fn fixture() -> (Arc<InMemoryFabric>, TopologyResolver, NetworkDescription) {
        let fabric = Arc::new(InMemoryFabric::new());
        fabric.enroll("OrgA", "OrgAMSP", &["Admin", "User1"]);
        fabric.enroll("OrgB", "OrgBMSP", &["Admin"]);
        let resolver = TopologyResolver::new(Arc::new(MemoryConnector::new(fabric.clone())));
        let description = NetworkDescription::from_yaml(DESCRIPTION).unwrap();
        (fabric, resolver, description)
    }

    #[tokio::test]
    async fn test_resolve_populates_everything() {
        let (fabric, resolver, description) = fixture();

        let resolved = resolver.resolve(&description, "OrgA", "User1").await.unwrap();
        let topology = &resolved.topology;

        assert_eq!(topology.client_org_id(), "OrgA");
        assert_eq!(topology.client_org_msp_id(), "OrgAMSP");
        assert_eq!(topology.client_user().id(), "User1");
        assert_eq!(topology.client_admin_user().id(), "Admin");
        assert_eq!(topology.all_org_ids(), &["OrgA".to_string(), "OrgB".to_string()]);
        assert_eq!(topology.client_org_peers()[0].name(), "peer0.orga");
        assert_eq!(topology.peers_by_org()["OrgB"].len(), 1);
        assert_eq!(topology.org_id_of_peer("peer1.orga"), Some("OrgA"));
        assert_eq!(topology.msp_id_of("OrgB"), Some("OrgBMSP"));
        assert!(topology.msp_id_of("OrdererOrg").is_none());
        assert_eq!(fabric.connect_count(), 1);
        assert_eq!(fabric.close_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_client_org_is_config_error() {
        let (fabric, resolver, description) = fixture();

        let err = resolver
            .resolve(&description, "OrgZ", "User1")
            .await
            .err()
            .unwrap();

        assert_eq!(err.category(), "config");
        assert!(err.to_string().contains("OrgZ"));
        // handle released on the failure path
        assert_eq!(fabric.close_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_is_identity_error() {
        let (fabric, resolver, description) = fixture();

        let err = resolver
            .resolve(&description, "OrgA", "Mallory")
            .await
            .err()
            .unwrap();

        match err {
            LifecycleError::IdentityResolution {
                username, org_id, ..
            } => {
                assert_eq!(username, "Mallory");
                assert_eq!(org_id, "OrgA");
            }
            other => panic!("Expected IdentityResolution error, got {other}"),
        }
        assert_eq!(fabric.close_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_config_error() {
        let (fabric, resolver, description) = fixture();
        fabric.fail_connect("tls handshake refused");

        let err = resolver
            .resolve(&description, "OrgA", "User1")
            .await
            .err()
            .unwrap();
        assert_eq!(err.category(), "config");
    }
}
