//! Chaincode Invoke
//!
//! Submits a transaction through one randomly chosen client organization
//! peer, signing as the client organization's user. Any failure is final.

use super::{ChaincodeCall, ChaincodeOperation, OperationKind, OperationResult};
use crate::error::OperationContext;
use crate::fabric::{ChannelRequest, RequestOptions};
use crate::routing::PeerSelector;
use crate::sessions::SessionBroker;
use crate::{LifecycleError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Invoke handle for one chaincode function call
pub struct InvokeOperation {
    broker: Arc<SessionBroker>,
    selector: Arc<PeerSelector>,
    call: ChaincodeCall,
    options: RequestOptions,
}

impl InvokeOperation {
    pub fn new(broker: Arc<SessionBroker>, selector: Arc<PeerSelector>, call: ChaincodeCall) -> Self {
        Self {
            broker,
            selector,
            call,
            options: RequestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn call(&self) -> &ChaincodeCall {
        &self.call
    }
}

#[async_trait]
impl ChaincodeOperation for InvokeOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Invoke
    }

    async fn execute(&self) -> Result<OperationResult> {
        let client = self.broker.channel_client(&self.call.channel_id).await?;
        let target = self
            .selector
            .select_random(self.broker.topology().client_org_peers())?;

        debug!(
            "Invoking {} on chaincode {} through peer {}",
            self.call.function,
            self.call.chaincode_id,
            target.name()
        );

        let request = ChannelRequest {
            chaincode_id: self.call.chaincode_id.clone(),
            function: self.call.function.clone(),
            args: self.call.args.clone(),
        };

        let response = client
            .execute(&request, std::slice::from_ref(&target), self.options)
            .await
            .map_err(|e| {
                LifecycleError::network_with_source(
                    OperationContext::new(OperationKind::Invoke.as_str())
                        .function(&self.call.function)
                        .chaincode(&self.call.chaincode_id)
                        .channel(&self.call.channel_id)
                        .peer(target.name()),
                    e,
                )
            })?;

        Ok(OperationResult::Success(response.payload))
    }

    fn terminate(&self) {
        self.broker.close();
    }
}
