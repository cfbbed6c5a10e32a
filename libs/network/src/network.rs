//! Fabric Network Context
//!
//! Caller-owned entry point. Built from the application configuration and a
//! fabric connector, it keeps one [`SessionBroker`] per client organization
//! and hands out lifecycle operation handles bound to it. A broker closed by
//! an operation's `terminate` is rebuilt on the next request.

use crate::discovery::{NetworkDescription, TopologyResolver};
use crate::fabric::FabricConnector;
use crate::lifecycle::{
    ChaincodeCall, ChaincodeDescriptor, InstallOperation, InstantiateOperation, InvokeOperation,
    QueryOperation, UpgradeOperation,
};
use crate::policy::{ExpressionCompiler, PolicyCompiler};
use crate::routing::PeerSelector;
use crate::sessions::SessionBroker;
use crate::{LifecycleError, Result};
use bytes::Bytes;
use dashmap::DashMap;
use fabric_config::{load_config, AppConfig, ClientOrgSettings};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

type BrokerSlot = Arc<Mutex<Option<Arc<SessionBroker>>>>;

/// Network context for every configured client organization
pub struct FabricNetwork {
    app: AppConfig,
    resolver: TopologyResolver,
    selector: Arc<PeerSelector>,
    compiler: Arc<dyn PolicyCompiler>,
    descriptions: DashMap<String, Arc<NetworkDescription>>,
    brokers: DashMap<String, BrokerSlot>,
}

impl FabricNetwork {
    pub fn new(app: AppConfig, connector: Arc<dyn FabricConnector>) -> Self {
        Self {
            app,
            resolver: TopologyResolver::new(connector),
            selector: Arc::new(PeerSelector::new()),
            compiler: Arc::new(ExpressionCompiler),
            descriptions: DashMap::new(),
            brokers: DashMap::new(),
        }
    }

    /// Load the application configuration from `path` (or the default location)
    pub fn from_config_path(path: Option<&Path>, connector: Arc<dyn FabricConnector>) -> Result<Self> {
        let app = load_config(path)?;
        Ok(Self::new(app, connector))
    }

    pub fn with_selector(mut self, selector: Arc<PeerSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn PolicyCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Use `description` for `client_org` instead of reading it from disk
    pub fn with_description(self, client_org: &str, description: NetworkDescription) -> Self {
        self.descriptions
            .insert(client_org.to_string(), Arc::new(description));
        self
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.app
    }

    pub fn client_org_ids(&self) -> impl Iterator<Item = &str> {
        self.app.client_org_ids()
    }

    /// Live broker for `client_org`, resolving the topology on first use
    pub async fn broker(&self, client_org: &str) -> Result<Arc<SessionBroker>> {
        let settings = self.settings(client_org)?;

        let slot = self
            .brokers
            .entry(client_org.to_string())
            .or_default()
            .clone();
        let mut slot = slot.lock().await;

        if let Some(broker) = slot.as_ref() {
            if !broker.is_closed() {
                return Ok(broker.clone());
            }
            info!("Rebuilding closed session broker for client org {}", client_org);
        }

        let description = self.description(client_org, settings)?;
        let broker = Arc::new(
            SessionBroker::connect(
                &self.resolver,
                description.as_ref(),
                &settings.org_id,
                &settings.user,
            )
            .await?,
        );
        *slot = Some(broker.clone());

        Ok(broker)
    }

    pub async fn install_client(
        &self,
        client_org: &str,
        chaincode: ChaincodeDescriptor,
    ) -> Result<InstallOperation> {
        let broker = self.broker(client_org).await?;
        Ok(InstallOperation::new(broker, self.selector.clone(), chaincode))
    }

    pub async fn instantiate_client(
        &self,
        client_org: &str,
        channel_id: &str,
        chaincode: ChaincodeDescriptor,
        args: Vec<Bytes>,
    ) -> Result<InstantiateOperation> {
        let broker = self.broker(client_org).await?;
        InstantiateOperation::new(
            broker,
            self.selector.clone(),
            self.compiler.clone(),
            channel_id,
            chaincode,
            args,
        )
    }

    pub async fn upgrade_client(
        &self,
        client_org: &str,
        channel_id: &str,
        chaincode: ChaincodeDescriptor,
        args: Vec<Bytes>,
    ) -> Result<UpgradeOperation> {
        let broker = self.broker(client_org).await?;
        UpgradeOperation::new(
            broker,
            self.selector.clone(),
            self.compiler.clone(),
            channel_id,
            chaincode,
            args,
        )
    }

    pub async fn execution_client(
        &self,
        client_org: &str,
        call: ChaincodeCall,
    ) -> Result<InvokeOperation> {
        let broker = self.broker(client_org).await?;
        Ok(InvokeOperation::new(broker, self.selector.clone(), call))
    }

    pub async fn query_client(&self, client_org: &str, call: ChaincodeCall) -> Result<QueryOperation> {
        let broker = self.broker(client_org).await?;
        Ok(QueryOperation::new(broker, call))
    }

    /// Close every live broker
    pub async fn close(&self) {
        let slots: Vec<BrokerSlot> = self
            .brokers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for slot in slots {
            if let Some(broker) = slot.lock().await.take() {
                broker.close();
            }
        }
    }

    fn settings(&self, client_org: &str) -> Result<&ClientOrgSettings> {
        self.app.client_org(client_org).ok_or_else(|| {
            LifecycleError::config(format!("Client org '{}' is not configured", client_org))
        })
    }

    fn description(
        &self,
        client_org: &str,
        settings: &ClientOrgSettings,
    ) -> Result<Arc<NetworkDescription>> {
        if let Some(description) = self.descriptions.get(client_org) {
            return Ok(description.clone());
        }

        let description = Arc::new(NetworkDescription::from_file(&settings.network_config_path)?);
        self.descriptions
            .insert(client_org.to_string(), description.clone());
        Ok(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::memory::{InMemoryFabric, MemoryConnector};
    use crate::lifecycle::ChaincodeOperation;
    use fabric_config::defaults::files::APP_CONFIG_FILE;
    use std::fs;
    use tempfile::tempdir;

    const DESCRIPTION: &str = r#"
organizations:
  OrgA:
    mspid: OrgAMSP
    peers: [peer0.orga]
peers:
  peer0.orga: { url: "grpcs://localhost:7051" }
"#;

    fn fabric() -> Arc<InMemoryFabric> {
        let fabric = Arc::new(InMemoryFabric::new());
        fabric.enroll("OrgA", "OrgAMSP", &["Admin", "User1"]);
        fabric
    }

    #[tokio::test]
    async fn test_from_config_path_loads_descriptions() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("orga.yaml"), DESCRIPTION).unwrap();
        fs::write(
            dir.path().join(APP_CONFIG_FILE),
            r#"{
  "clientorgs": ["orga"],
  "orga": { "user": "User1", "orgid": "OrgA", "networkconfigpath": "orga.yaml" }
}"#,
        )
        .unwrap();

        let fabric = fabric();
        let network = FabricNetwork::from_config_path(
            Some(dir.path()),
            Arc::new(MemoryConnector::new(fabric.clone())),
        )
        .unwrap();

        let broker = network.broker("orga").await.unwrap();
        assert_eq!(broker.client_org_msp_id(), "OrgAMSP");

        let again = network.broker("orga").await.unwrap();
        assert!(Arc::ptr_eq(&broker, &again));
        assert_eq!(fabric.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_terminated_broker_is_rebuilt() {
        let fabric = fabric();
        let app = AppConfig::from_settings([(
            "orga".to_string(),
            ClientOrgSettings {
                user: "User1".to_string(),
                org_id: "OrgA".to_string(),
                network_config_path: "unused.yaml".into(),
            },
        )]);
        let network = FabricNetwork::new(app, Arc::new(MemoryConnector::new(fabric.clone())))
            .with_description("orga", NetworkDescription::from_yaml(DESCRIPTION).unwrap());

        let query = network
            .query_client("orga", ChaincodeCall::new("mychannel", "mycc", "get"))
            .await
            .unwrap();
        query.terminate();
        assert_eq!(fabric.close_count(), 1);

        let broker = network.broker("orga").await.unwrap();
        assert!(!broker.is_closed());
        assert_eq!(fabric.connect_count(), 2);

        network.close().await;
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_unknown_client_org() {
        let network = FabricNetwork::new(
            AppConfig::default(),
            Arc::new(MemoryConnector::new(fabric())),
        );
        let err = network.broker("nobody").await.err().unwrap();
        assert_eq!(err.category(), "config");
    }
}
