//! Chaincode Query

use super::{ChaincodeCall, ChaincodeOperation, OperationKind, OperationResult};
use crate::error::OperationContext;
use crate::fabric::{ChannelRequest, RequestOptions};
use crate::sessions::SessionBroker;
use crate::{LifecycleError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Query handle; peers are left to the channel client's discovery
pub struct QueryOperation {
    broker: Arc<SessionBroker>,
    call: ChaincodeCall,
    options: RequestOptions,
}

impl QueryOperation {
    pub fn new(broker: Arc<SessionBroker>, call: ChaincodeCall) -> Self {
        Self {
            broker,
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
impl ChaincodeOperation for QueryOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    async fn execute(&self) -> Result<OperationResult> {
        let client = self.broker.channel_client(&self.call.channel_id).await?;

        let request = ChannelRequest {
            chaincode_id: self.call.chaincode_id.clone(),
            function: self.call.function.clone(),
            args: self.call.args.clone(),
        };

        let response = client
            .query(&request, &[], self.options)
            .await
            .map_err(|e| {
                LifecycleError::network_with_source(
                    OperationContext::new(OperationKind::Query.as_str())
                        .function(&self.call.function)
                        .chaincode(&self.call.chaincode_id)
                        .channel(&self.call.channel_id),
                    e,
                )
            })?;

        Ok(OperationResult::Success(response.payload))
    }

    fn terminate(&self) {
        self.broker.close();
    }
}
