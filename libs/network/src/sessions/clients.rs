//! Session Client Handles
//!
//! Thin handles pairing a cached session with the identity (and channel)
//! it was opened for. Failures from the fabric come back as raw
//! [`SdkError`]s so the caller can classify them before wrapping.

use crate::fabric::{
    ChannelRequest, ChannelResponse, ChannelSession, DeployRequest, InstallRequest,
    InstallResponse, Peer, RequestOptions, ResourceSession, SdkResult, SigningIdentity,
};
use std::sync::Arc;

/// Resource-management client (install, instantiate, upgrade) for one identity
#[derive(Clone)]
pub struct ResourceMgmtClient {
    identity: SigningIdentity,
    session: Arc<dyn ResourceSession>,
}

impl ResourceMgmtClient {
    pub(crate) fn new(identity: SigningIdentity, session: Arc<dyn ResourceSession>) -> Self {
        Self { identity, session }
    }

    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// Underlying cached session, shared by every client for the same identity
    pub fn session(&self) -> &Arc<dyn ResourceSession> {
        &self.session
    }

    pub async fn install(
        &self,
        request: &InstallRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<Vec<InstallResponse>> {
        self.session.install_chaincode(request, targets, options).await
    }

    pub async fn instantiate(
        &self,
        channel_id: &str,
        request: &DeployRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<String> {
        self.session
            .instantiate_chaincode(channel_id, request, targets, options)
            .await
    }

    pub async fn upgrade(
        &self,
        channel_id: &str,
        request: &DeployRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<String> {
        self.session
            .upgrade_chaincode(channel_id, request, targets, options)
            .await
    }
}

/// Channel client (execute, query) for one identity on one channel
#[derive(Clone)]
pub struct ChannelClient {
    channel_id: String,
    identity: SigningIdentity,
    session: Arc<dyn ChannelSession>,
}

impl ChannelClient {
    pub(crate) fn new(
        channel_id: String,
        identity: SigningIdentity,
        session: Arc<dyn ChannelSession>,
    ) -> Self {
        Self {
            channel_id,
            identity,
            session,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    pub fn session(&self) -> &Arc<dyn ChannelSession> {
        &self.session
    }

    pub async fn execute(
        &self,
        request: &ChannelRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<ChannelResponse> {
        self.session.execute(request, targets, options).await
    }

    pub async fn query(
        &self,
        request: &ChannelRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<ChannelResponse> {
        self.session.query(request, targets, options).await
    }
}
