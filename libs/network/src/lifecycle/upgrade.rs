//! Chaincode Upgrade

use super::deploy::{DeployAction, Deployment};
use super::{ChaincodeDescriptor, ChaincodeOperation, OperationKind, OperationResult};
use crate::fabric::RequestOptions;
use crate::policy::PolicyCompiler;
use crate::routing::PeerSelector;
use crate::sessions::SessionBroker;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Upgrade handle moving a channel to a new chaincode version
pub struct UpgradeOperation {
    deployment: Deployment,
}

impl UpgradeOperation {
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
}

#[async_trait]
impl ChaincodeOperation for UpgradeOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Upgrade
    }

    async fn execute(&self) -> Result<OperationResult> {
        self.deployment.run(DeployAction::Upgrade).await
    }

    fn terminate(&self) {
        self.deployment.broker.close();
    }
}
