//! Shared instantiate / upgrade flow
//!
//! Both operations sign as the client organization's admin, target the
//! client organization's anchor peer, carry an endorsement policy and the
//! private-data collections, and treat "chaincode exists" as a no-op.

use super::classify::{classify, Classified};
use super::{ChaincodeDescriptor, OperationKind, OperationResult};
use crate::error::OperationContext;
use crate::fabric::{DeployRequest, RequestOptions};
use crate::policy::{load_collections, resolve_policy, CollectionConfig, PolicyCompiler};
use crate::routing::PeerSelector;
use crate::sessions::SessionBroker;
use crate::Result;
use bytes::Bytes;
use std::sync::Arc;
use tracing::info;

/// The two lifecycle calls that deploy a chaincode onto a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeployAction {
    Instantiate,
    Upgrade,
}

impl DeployAction {
    pub(crate) fn kind(self) -> OperationKind {
        match self {
            DeployAction::Instantiate => OperationKind::Instantiate,
            DeployAction::Upgrade => OperationKind::Upgrade,
        }
    }

    fn completed(self) -> &'static str {
        match self {
            DeployAction::Instantiate => "instantiated",
            DeployAction::Upgrade => "upgraded",
        }
    }
}

pub(crate) struct Deployment {
    pub(crate) broker: Arc<SessionBroker>,
    selector: Arc<PeerSelector>,
    compiler: Arc<dyn PolicyCompiler>,
    channel_id: String,
    chaincode: ChaincodeDescriptor,
    args: Vec<Bytes>,
    collections: Vec<CollectionConfig>,
    options: RequestOptions,
}

impl Deployment {
    /// Collections are loaded and compiled here, once
    pub(crate) fn new(
        broker: Arc<SessionBroker>,
        selector: Arc<PeerSelector>,
        compiler: Arc<dyn PolicyCompiler>,
        channel_id: String,
        chaincode: ChaincodeDescriptor,
        args: Vec<Bytes>,
    ) -> Result<Self> {
        let collections = load_collections(chaincode.collections_path.as_deref(), compiler.as_ref())?;

        Ok(Self {
            broker,
            selector,
            compiler,
            channel_id,
            chaincode,
            args,
            collections,
            options: RequestOptions::default(),
        })
    }

    pub(crate) fn set_options(&mut self, options: RequestOptions) {
        self.options = options;
    }

    pub(crate) fn chaincode(&self) -> &ChaincodeDescriptor {
        &self.chaincode
    }

    pub(crate) fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub(crate) fn collections(&self) -> &[CollectionConfig] {
        &self.collections
    }

    pub(crate) async fn run(&self, action: DeployAction) -> Result<OperationResult> {
        self.broker.ensure_open()?;

        let kind = action.kind();
        let client = self.broker.resource_mgmt_client_by_admin().await?;
        let topology = self.broker.topology();
        let id_version = self.chaincode.id_version();
        info!("Sending {} {} ...", kind, id_version);

        let msp_ids: Vec<String> = topology.msp_ids().map(str::to_string).collect();
        let policy = resolve_policy(
            self.compiler.as_ref(),
            self.chaincode.policy.as_deref(),
            &msp_ids,
        )?;

        let anchor = self.selector.select_for_anchor(topology.client_org_peers())?;

        let request = DeployRequest {
            name: self.chaincode.id.clone(),
            path: self.chaincode.path.clone(),
            version: self.chaincode.version.clone(),
            args: self.args.clone(),
            policy,
            collections: self.collections.clone(),
        };

        let targets = [anchor];
        let outcome = match action {
            DeployAction::Instantiate => {
                client
                    .instantiate(&self.channel_id, &request, &targets, self.options)
                    .await
            }
            DeployAction::Upgrade => {
                client
                    .upgrade(&self.channel_id, &request, &targets, self.options)
                    .await
            }
        };

        match outcome {
            Ok(transaction_id) => {
                info!(
                    "Successfully completed {} of chaincode {} on channel {} (tx {})",
                    kind, id_version, self.channel_id, transaction_id
                );
                Ok(OperationResult::ok_marker())
            }
            Err(e) => {
                let context = OperationContext::new(kind.as_str())
                    .chaincode(&self.chaincode.id)
                    .channel(&self.channel_id)
                    .org(topology.client_org_id())
                    .peer(targets[0].name());

                match classify(e, &self.chaincode.id, context) {
                    Classified::AlreadyDone => {
                        info!(
                            "Chaincode {} already {} on channel {}",
                            id_version,
                            action.completed(),
                            self.channel_id
                        );
                        Ok(OperationResult::exists_marker())
                    }
                    Classified::Network(e) => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_map_to_their_own_kind() {
        assert_eq!(DeployAction::Instantiate.kind(), OperationKind::Instantiate);
        assert_eq!(DeployAction::Upgrade.kind(), OperationKind::Upgrade);
        assert_eq!(DeployAction::Upgrade.completed(), "upgraded");
    }
}
