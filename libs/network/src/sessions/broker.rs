//! Session Broker
//!
//! Owns the SDK handle produced by topology resolution and hands out
//! resource-management and channel clients backed by cached sessions.
//! Identity-scoped sessions are keyed by `(MSP id, identity id)`,
//! channel-scoped sessions by `(MSP id, identity id, channel id)`.

use super::cache::KeyedCache;
use super::clients::{ChannelClient, ResourceMgmtClient};
use crate::discovery::{ResolvedNetwork, ResolvedTopology, TopologyResolver, TopologySource};
use crate::error::OperationContext;
use crate::fabric::{ChannelSession, FabricSdk, ResourceSession, SigningIdentity};
use crate::{LifecycleError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

type IdentityKey = (String, String);
type ChannelKey = (String, String, String);

/// Per-client-organization session broker
pub struct SessionBroker {
    topology: Arc<ResolvedTopology>,
    sdk: Arc<dyn FabricSdk>,
    resource_sessions: KeyedCache<IdentityKey, Arc<dyn ResourceSession>>,
    channel_sessions: KeyedCache<ChannelKey, Arc<dyn ChannelSession>>,
    closed: AtomicBool,
}

impl SessionBroker {
    /// Wrap an already resolved network
    pub fn new(network: ResolvedNetwork) -> Self {
        Self {
            topology: network.topology,
            sdk: network.sdk,
            resource_sessions: KeyedCache::new(),
            channel_sessions: KeyedCache::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Resolve `source` for `client_org_id` and wrap the result
    pub async fn connect(
        resolver: &TopologyResolver,
        source: &dyn TopologySource,
        client_org_id: &str,
        username: &str,
    ) -> Result<Self> {
        let network = resolver.resolve(source, client_org_id, username).await?;
        Ok(Self::new(network))
    }

    pub fn topology(&self) -> &Arc<ResolvedTopology> {
        &self.topology
    }

    pub fn client_org_id(&self) -> &str {
        self.topology.client_org_id()
    }

    pub fn client_org_msp_id(&self) -> &str {
        self.topology.client_org_msp_id()
    }

    pub fn sdk(&self) -> &Arc<dyn FabricSdk> {
        &self.sdk
    }

    /// Resource-management client for `identity`
    pub async fn resource_mgmt_client(
        &self,
        identity: &SigningIdentity,
    ) -> Result<ResourceMgmtClient> {
        self.ensure_open()?;

        let key = (identity.msp_id().to_string(), identity.id().to_string());
        let session = self
            .resource_sessions
            .get_or_try_init(key, || async {
                debug!(
                    "Opening resource session for {}@{}",
                    identity.id(),
                    identity.msp_id()
                );
                self.sdk.resource_session(identity).await.map_err(|e| {
                    LifecycleError::network_with_source(
                        OperationContext::new("open_resource_session").org(identity.org_id()),
                        e,
                    )
                })
            })
            .await?;

        // close() may have run while the session was being built
        self.ensure_open()?;
        Ok(ResourceMgmtClient::new(identity.clone(), session))
    }

    /// Resource-management client for `username` of any participating org
    pub async fn resource_mgmt_client_by_org(
        &self,
        username: &str,
        org_id: &str,
    ) -> Result<ResourceMgmtClient> {
        self.ensure_open()?;

        let identity = if org_id == self.topology.client_org_id() {
            self.client_identity(username)
        } else {
            None
        };

        let identity = match identity {
            Some(identity) => identity,
            None => self
                .sdk
                .signing_identity(org_id, username)
                .await
                .map_err(|e| LifecycleError::identity(username, org_id, e))?,
        };

        self.resource_mgmt_client(&identity).await
    }

    /// Resource-management client for the client organization's admin
    pub async fn resource_mgmt_client_by_admin(&self) -> Result<ResourceMgmtClient> {
        let admin = self.topology.client_admin_user().clone();
        self.resource_mgmt_client(&admin).await
    }

    /// Resource-management client for `username` of the client organization
    pub async fn resource_mgmt_client_by_user(&self, username: &str) -> Result<ResourceMgmtClient> {
        let org_id = self.topology.client_org_id().to_string();
        self.resource_mgmt_client_by_org(username, &org_id).await
    }

    /// Channel client for the client organization's user on `channel_id`
    pub async fn channel_client(&self, channel_id: &str) -> Result<ChannelClient> {
        self.ensure_open()?;

        let identity = self.topology.client_user().clone();
        let key = (
            identity.msp_id().to_string(),
            identity.id().to_string(),
            channel_id.to_string(),
        );

        let session = self
            .channel_sessions
            .get_or_try_init(key, || async {
                debug!(
                    "Opening channel session for {}@{} on {}",
                    identity.id(),
                    identity.msp_id(),
                    channel_id
                );
                self.sdk
                    .channel_session(channel_id, &identity)
                    .await
                    .map_err(|e| {
                        LifecycleError::network_with_source(
                            OperationContext::new("open_channel_session")
                                .channel(channel_id)
                                .org(identity.org_id()),
                            e,
                        )
                    })
            })
            .await?;

        self.ensure_open()?;
        Ok(ChannelClient::new(channel_id.to_string(), identity, session))
    }

    /// Release the SDK handle; repeated calls are no-ops
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Closing SDK for client org {}", self.topology.client_org_id());
        self.resource_sessions.clear();
        self.channel_sessions.clear();
        self.sdk.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of cached (identity, channel) sessions
    pub fn cached_sessions(&self) -> (usize, usize) {
        (self.resource_sessions.len(), self.channel_sessions.len())
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(LifecycleError::session_closed(self.topology.client_org_id()));
        }
        Ok(())
    }

    fn client_identity(&self, username: &str) -> Option<SigningIdentity> {
        [self.topology.client_user(), self.topology.client_admin_user()]
            .into_iter()
            .find(|identity| identity.id() == username)
            .cloned()
    }
}

impl Drop for SessionBroker {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::NetworkDescription;
    use crate::fabric::memory::{InMemoryFabric, MemoryConnector};
    use std::time::Duration;

    const DESCRIPTION: &str = r#"
organizations:
  OrgA:
    mspid: OrgAMSP
    peers: [peer0.orga]
  OrgB:
    mspid: OrgBMSP
    peers: [peer0.orgb]
peers:
  peer0.orga: { url: "grpcs://localhost:7051" }
  peer0.orgb: { url: "grpcs://localhost:9051" }
"#;

    async fn broker() -> (Arc<InMemoryFabric>, SessionBroker) {
        let fabric = Arc::new(InMemoryFabric::new());
        fabric.enroll("OrgA", "OrgAMSP", &["Admin", "User1"]);
        fabric.enroll("OrgB", "OrgBMSP", &["Admin"]);
        let resolver = TopologyResolver::new(Arc::new(MemoryConnector::new(fabric.clone())));
        let description = NetworkDescription::from_yaml(DESCRIPTION).unwrap();
        let broker = SessionBroker::connect(&resolver, &description, "OrgA", "User1")
            .await
            .unwrap();
        (fabric, broker)
    }

    #[tokio::test]
    async fn test_resource_session_is_memoized() {
        let (fabric, broker) = broker().await;

        let first = broker.resource_mgmt_client_by_admin().await.unwrap();
        let second = broker.resource_mgmt_client_by_admin().await.unwrap();

        assert!(Arc::ptr_eq(first.session(), second.session()));
        assert_eq!(fabric.resource_sessions_opened(), 1);
        assert_eq!(broker.cached_sessions(), (1, 0));
    }

    #[tokio::test]
    async fn test_by_org_resolves_foreign_identity() {
        let (fabric, broker) = broker().await;

        let client = broker
            .resource_mgmt_client_by_org("Admin", "OrgB")
            .await
            .unwrap();
        assert_eq!(client.identity().msp_id(), "OrgBMSP");

        let again = broker
            .resource_mgmt_client_by_org("Admin", "OrgB")
            .await
            .unwrap();
        assert!(Arc::ptr_eq(client.session(), again.session()));
        assert_eq!(fabric.resource_sessions_opened(), 1);
    }

    #[tokio::test]
    async fn test_by_org_unknown_user_caches_nothing() {
        let (_fabric, broker) = broker().await;

        let err = broker
            .resource_mgmt_client_by_org("Ghost", "OrgB")
            .await
            .err()
            .unwrap();

        assert_eq!(err.category(), "identity");
        assert!(err.to_string().contains("Ghost"));
        assert!(err.to_string().contains("OrgB"));
        assert_eq!(broker.cached_sessions(), (0, 0));
    }

    #[tokio::test]
    async fn test_channel_sessions_keyed_per_channel() {
        let (fabric, broker) = broker().await;

        let a = broker.channel_client("mychannel").await.unwrap();
        let b = broker.channel_client("mychannel").await.unwrap();
        let c = broker.channel_client("otherchannel").await.unwrap();

        assert!(Arc::ptr_eq(a.session(), b.session()));
        assert!(!Arc::ptr_eq(a.session(), c.session()));
        assert_eq!(a.identity().id(), "User1");
        assert_eq!(fabric.channel_sessions_opened(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (fabric, broker) = broker().await;

        broker.close();
        broker.close();
        assert!(broker.is_closed());
        assert_eq!(fabric.close_count(), 1);

        let err = broker.channel_client("mychannel").await.err().unwrap();
        assert_eq!(err.category(), "session_closed");

        drop(broker);
        assert_eq!(fabric.close_count(), 1);
    }

    #[tokio::test]
    async fn test_close_during_session_build_rejects_client() {
        let (fabric, broker) = broker().await;
        let broker = Arc::new(broker);
        fabric.set_session_delay(Duration::from_millis(50));

        let channel = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.channel_client("mychannel").await })
        };
        let resource = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.resource_mgmt_client_by_admin().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.close();

        let err = channel.await.unwrap().err().unwrap();
        assert_eq!(err.category(), "session_closed");
        let err = resource.await.unwrap().err().unwrap();
        assert_eq!(err.category(), "session_closed");
        assert_eq!(broker.cached_sessions(), (0, 0));
    }

    #[tokio::test]
    async fn test_drop_releases_handle() {
        let (fabric, broker) = broker().await;
        drop(broker);
        assert_eq!(fabric.close_count(), 1);
    }
}
