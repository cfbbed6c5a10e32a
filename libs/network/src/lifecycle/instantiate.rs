//! Chaincode Instantiate

use super::deploy::{DeployAction, Deployment};
use super::{ChaincodeDescriptor, ChaincodeOperation, OperationKind, OperationResult};
use crate::fabric::RequestOptions;
use crate::policy::{CollectionConfig, PolicyCompiler};
use crate::routing::PeerSelector;
use crate::sessions::SessionBroker;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Instantiate handle for one chaincode version on one channel
pub struct InstantiateOperation {
    deployment: Deployment,
}

impl InstantiateOperation {
    /// Fails if the collection configuration cannot be loaded
    pub fn new(
        broker: Arc<SessionBroker>,
        selector: Arc<PeerSelector>,
        compiler: Arc<dyn PolicyCompiler>,
        channel_id: impl Into<String>,
        chaincode: ChaincodeDescriptor,
        args: Vec<Bytes>,
    ) -> Result<Self> {
        let deployment = Deployment::new(
            broker,
            selector,
            compiler,
            channel_id.into(),
            chaincode,
            args,
        )?;
        Ok(Self { deployment })
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.deployment.set_options(options);
        self
    }

    pub fn chaincode(&self) -> &ChaincodeDescriptor {
        self.deployment.chaincode()
    }

    pub fn channel_id(&self) -> &str {
        self.deployment.channel_id()
    }

    pub fn collections(&self) -> &[CollectionConfig] {
        self.deployment.collections()
    }
}

#[async_trait]
impl ChaincodeOperation for InstantiateOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Instantiate
    }

    async fn execute(&self) -> Result<OperationResult> {
        self.deployment.run(DeployAction::Instantiate).await
    }

    fn terminate(&self) {
        self.deployment.broker.close();
    }
}
