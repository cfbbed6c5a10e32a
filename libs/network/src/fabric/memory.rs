//! In-Memory Fabric
//!
//! A simulated network implementing every collaborator trait. It keeps
//! enrolled identities, installed and instantiated chaincode, configured
//! channel responses and a log of every call, and can be scripted to fail
//! at each step. Used by the test suites and for dry runs.

use super::{
    ChaincodePackage, ChannelRequest, ChannelResponse, ChannelSession, DeployRequest,
    FabricConnector, FabricSdk, InstallRequest, InstallResponse, Peer, RequestOptions,
    ResourceSession, SdkError, SdkErrorKind, SdkResult, SigningIdentity, STATUS_OK,
};
use crate::discovery::{NetworkPeer, TopologySource};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Status reported for a refused proposal
pub const STATUS_PROPOSAL_FAILED: i32 = 500;

/// Channel call kinds recorded by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCallKind {
    Execute,
    Query,
}

/// One recorded channel call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCall {
    pub kind: ChannelCallKind,
    pub channel_id: String,
    pub identity: SigningIdentity,
    pub request: ChannelRequest,
    pub targets: Vec<String>,
    pub options: RequestOptions,
}

/// One recorded install attempt on one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallAttempt {
    pub identity: SigningIdentity,
    pub peer: String,
    pub chaincode_id: String,
    pub version: String,
}

/// Deploy call kinds recorded by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployKind {
    Instantiate,
    Upgrade,
}

/// One recorded instantiate or upgrade
#[derive(Debug, Clone)]
pub struct DeployCall {
    pub kind: DeployKind,
    pub channel_id: String,
    pub identity: SigningIdentity,
    pub request: DeployRequest,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone)]
struct Enrollment {
    msp_id: String,
    users: HashSet<String>,
}

#[derive(Default)]
struct State {
    enrollments: HashMap<String, Enrollment>,
    connect_failure: Option<String>,
    packaging_failures: HashSet<String>,
    install_failures: HashMap<String, String>,
    install_call_failures: HashSet<String>,
    installed: HashSet<(String, String, String)>,
    instantiated: HashMap<(String, String), String>,
    deploy_failure: Option<SdkError>,
    structured_exists: bool,
    responses: HashMap<(String, String), Bytes>,
    channel_failure: Option<SdkError>,
    latency: Option<Duration>,
    session_delay: Option<Duration>,
    install_attempts: Vec<InstallAttempt>,
    deploy_calls: Vec<DeployCall>,
    channel_calls: Vec<ChannelCall>,
}

/// Simulated network shared by every SDK handle it hands out
#[derive(Default)]
pub struct InMemoryFabric {
    state: Mutex<State>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    resource_sessions: AtomicUsize,
    channel_sessions: AtomicUsize,
    transactions: AtomicU64,
}

impl InMemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll `users` for `org_id` under `msp_id`
    pub fn enroll(&self, org_id: &str, msp_id: &str, users: &[&str]) {
        let mut state = self.state.lock();
        let enrollment = state
            .enrollments
            .entry(org_id.to_string())
            .or_insert_with(|| Enrollment {
                msp_id: msp_id.to_string(),
                users: HashSet::new(),
            });
        enrollment.msp_id = msp_id.to_string();
        enrollment
            .users
            .extend(users.iter().map(|user| user.to_string()));
    }

    /// Make every connect attempt fail with `message`
    pub fn fail_connect(&self, message: &str) {
        self.state.lock().connect_failure = Some(message.to_string());
    }

    /// Make packaging of `path` fail
    pub fn fail_packaging(&self, path: &str) {
        self.state.lock().packaging_failures.insert(path.to_string());
    }

    /// Make `peer` answer installs with a failure status and `info`
    pub fn fail_install_on(&self, peer: &str, info: &str) {
        self.state
            .lock()
            .install_failures
            .insert(peer.to_string(), info.to_string());
    }

    /// Make install calls signed by `msp_id` fail outright
    pub fn fail_install_calls_for(&self, msp_id: &str) {
        self.state
            .lock()
            .install_call_failures
            .insert(msp_id.to_string());
    }

    /// Record `chaincode_id@version` as already installed on `peer`
    pub fn mark_installed(&self, peer: &str, chaincode_id: &str, version: &str) {
        self.state.lock().installed.insert((
            peer.to_string(),
            chaincode_id.to_string(),
            version.to_string(),
        ));
    }

    /// Record `chaincode_id@version` as instantiated on `channel_id`
    pub fn mark_instantiated(&self, channel_id: &str, chaincode_id: &str, version: &str) {
        self.state.lock().instantiated.insert(
            (channel_id.to_string(), chaincode_id.to_string()),
            version.to_string(),
        );
    }

    /// Fail the next instantiate or upgrade with `error`
    pub fn fail_next_deploy(&self, error: SdkError) {
        self.state.lock().deploy_failure = Some(error);
    }

    /// Report existing chaincode with [`SdkErrorKind::ChaincodeExists`]
    /// instead of only in the message text
    pub fn use_structured_exists(&self, structured: bool) {
        self.state.lock().structured_exists = structured;
    }

    /// Payload returned for `function` of `chaincode_id`
    pub fn respond_with(&self, chaincode_id: &str, function: &str, payload: impl Into<Bytes>) {
        self.state.lock().responses.insert(
            (chaincode_id.to_string(), function.to_string()),
            payload.into(),
        );
    }

    /// Fail the next execute or query with `error`
    pub fn fail_next_channel_call(&self, error: SdkError) {
        self.state.lock().channel_failure = Some(error);
    }

    /// Simulated processing time of resource and channel calls
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Simulated handshake time of session construction
    pub fn set_session_delay(&self, delay: Duration) {
        self.state.lock().session_delay = Some(delay);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn resource_sessions_opened(&self) -> usize {
        self.resource_sessions.load(Ordering::SeqCst)
    }

    pub fn channel_sessions_opened(&self) -> usize {
        self.channel_sessions.load(Ordering::SeqCst)
    }

    pub fn install_attempts(&self) -> Vec<InstallAttempt> {
        self.state.lock().install_attempts.clone()
    }

    pub fn deploy_calls(&self) -> Vec<DeployCall> {
        self.state.lock().deploy_calls.clone()
    }

    pub fn channel_calls(&self) -> Vec<ChannelCall> {
        self.state.lock().channel_calls.clone()
    }

    pub fn is_installed(&self, peer: &str, chaincode_id: &str, version: &str) -> bool {
        self.state.lock().installed.contains(&(
            peer.to_string(),
            chaincode_id.to_string(),
            version.to_string(),
        ))
    }

    pub fn instantiated_version(&self, channel_id: &str, chaincode_id: &str) -> Option<String> {
        self.state
            .lock()
            .instantiated
            .get(&(channel_id.to_string(), chaincode_id.to_string()))
            .cloned()
    }

    fn next_transaction_id(&self) -> String {
        format!("tx-{:08}", self.transactions.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Sleep for the configured latency, bounded by the caller's timeout
    async fn simulate_latency(&self, options: RequestOptions) -> SdkResult<()> {
        let latency = self.state.lock().latency;
        let Some(latency) = latency else {
            return Ok(());
        };

        match options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, tokio::time::sleep(latency))
                .await
                .map_err(|_| SdkError::timeout(format!("request timed out after {:?}", timeout))),
            None => {
                tokio::time::sleep(latency).await;
                Ok(())
            }
        }
    }

    async fn simulate_handshake(&self) {
        let delay = self.state.lock().session_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Connector handing out SDK handles over one [`InMemoryFabric`]
pub struct MemoryConnector {
    fabric: Arc<InMemoryFabric>,
}

impl MemoryConnector {
    pub fn new(fabric: Arc<InMemoryFabric>) -> Self {
        Self { fabric }
    }

    pub fn fabric(&self) -> &Arc<InMemoryFabric> {
        &self.fabric
    }
}

#[async_trait]
impl FabricConnector for MemoryConnector {
    async fn connect(&self, source: &dyn TopologySource) -> SdkResult<Arc<dyn FabricSdk>> {
        if let Some(message) = self.fabric.state.lock().connect_failure.clone() {
            return Err(SdkError::unreachable(message));
        }

        self.fabric.connects.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Connected simulated fabric for {} organization(s)",
            source.organizations().len()
        );

        Ok(Arc::new(MemorySdk {
            fabric: self.fabric.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemorySdk {
    fabric: Arc<InMemoryFabric>,
    closed: AtomicBool,
}

impl MemorySdk {
    fn ensure_open(&self) -> SdkResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SdkError::other("sdk handle is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl FabricSdk for MemorySdk {
    async fn create_peer(&self, peer: &NetworkPeer) -> SdkResult<Peer> {
        self.ensure_open()?;
        if peer.config.url.trim().is_empty() {
            return Err(SdkError::unreachable(format!("peer {} has no url", peer.name)));
        }
        Ok(Peer::new(&peer.name, &peer.config.url, &peer.org_id))
    }

    async fn signing_identity(&self, org_id: &str, username: &str) -> SdkResult<SigningIdentity> {
        self.ensure_open()?;
        let state = self.fabric.state.lock();

        let enrollment = state
            .enrollments
            .get(org_id)
            .ok_or_else(|| SdkError::identity(format!("org {} has no enrollments", org_id)))?;

        if !enrollment.users.contains(username) {
            return Err(SdkError::identity(format!(
                "user {} is not enrolled in org {}",
                username, org_id
            )));
        }

        Ok(SigningIdentity::new(username, &enrollment.msp_id, org_id))
    }

    async fn resource_session(
        &self,
        identity: &SigningIdentity,
    ) -> SdkResult<Arc<dyn ResourceSession>> {
        self.ensure_open()?;
        self.fabric.simulate_handshake().await;
        self.fabric.resource_sessions.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MemoryResourceSession {
            fabric: self.fabric.clone(),
            identity: identity.clone(),
        }))
    }

    async fn channel_session(
        &self,
        channel_id: &str,
        identity: &SigningIdentity,
    ) -> SdkResult<Arc<dyn ChannelSession>> {
        self.ensure_open()?;
        self.fabric.simulate_handshake().await;
        self.fabric.channel_sessions.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MemoryChannelSession {
            fabric: self.fabric.clone(),
            channel_id: channel_id.to_string(),
            identity: identity.clone(),
        }))
    }

    async fn package_chaincode(&self, path: &str) -> SdkResult<ChaincodePackage> {
        self.ensure_open()?;
        if path.trim().is_empty() || self.fabric.state.lock().packaging_failures.contains(path) {
            return Err(SdkError::other(format!("cannot package chaincode at '{}'", path)));
        }

        Ok(ChaincodePackage {
            path: path.to_string(),
            code: Bytes::from(format!("package:{}", path)),
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.fabric.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct MemoryResourceSession {
    fabric: Arc<InMemoryFabric>,
    identity: SigningIdentity,
}

impl MemoryResourceSession {
    async fn deploy(
        &self,
        kind: DeployKind,
        channel_id: &str,
        request: &DeployRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<String> {
        self.fabric.simulate_latency(options).await?;

        let mut state = self.fabric.state.lock();
        state.deploy_calls.push(DeployCall {
            kind,
            channel_id: channel_id.to_string(),
            identity: self.identity.clone(),
            request: request.clone(),
            targets: targets.iter().map(|p| p.name().to_string()).collect(),
        });

        if let Some(error) = state.deploy_failure.take() {
            return Err(error);
        }

        let key = (channel_id.to_string(), request.name.clone());
        let exists = match kind {
            DeployKind::Instantiate => state.instantiated.contains_key(&key),
            DeployKind::Upgrade => match state.instantiated.get(&key) {
                Some(version) => *version == request.version,
                None => {
                    return Err(SdkError::rejected(format!(
                        "cannot upgrade chaincode {}: not instantiated on channel {}",
                        request.name, channel_id
                    )))
                }
            },
        };

        if exists {
            let message = format!("chaincode exists {}", request.name);
            let kind = if state.structured_exists {
                SdkErrorKind::ChaincodeExists
            } else {
                SdkErrorKind::Rejected
            };
            return Err(SdkError::new(kind, message).with_status(STATUS_PROPOSAL_FAILED));
        }

        state.instantiated.insert(key, request.version.clone());
        drop(state);

        Ok(self.fabric.next_transaction_id())
    }
}

#[async_trait]
impl ResourceSession for MemoryResourceSession {
    async fn install_chaincode(
        &self,
        request: &InstallRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<Vec<InstallResponse>> {
        self.fabric.simulate_latency(options).await?;

        let mut state = self.fabric.state.lock();
        if state.install_call_failures.contains(self.identity.msp_id()) {
            return Err(SdkError::rejected(format!(
                "install rejected for {}",
                self.identity.msp_id()
            )));
        }

        let mut responses = Vec::with_capacity(targets.len());
        for peer in targets {
            state.install_attempts.push(InstallAttempt {
                identity: self.identity.clone(),
                peer: peer.name().to_string(),
                chaincode_id: request.name.clone(),
                version: request.version.clone(),
            });

            let key = (
                peer.name().to_string(),
                request.name.clone(),
                request.version.clone(),
            );

            let response = if let Some(info) = state.install_failures.get(peer.name()) {
                InstallResponse {
                    target: peer.name().to_string(),
                    status: STATUS_PROPOSAL_FAILED,
                    info: info.clone(),
                }
            } else if state.installed.contains(&key) {
                InstallResponse {
                    target: peer.name().to_string(),
                    status: STATUS_OK,
                    info: "already installed".to_string(),
                }
            } else {
                state.installed.insert(key);
                InstallResponse {
                    target: peer.name().to_string(),
                    status: STATUS_OK,
                    info: String::new(),
                }
            };
            responses.push(response);
        }

        Ok(responses)
    }

    async fn instantiate_chaincode(
        &self,
        channel_id: &str,
        request: &DeployRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<String> {
        self.deploy(DeployKind::Instantiate, channel_id, request, targets, options)
            .await
    }

    async fn upgrade_chaincode(
        &self,
        channel_id: &str,
        request: &DeployRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<String> {
        self.deploy(DeployKind::Upgrade, channel_id, request, targets, options)
            .await
    }
}

struct MemoryChannelSession {
    fabric: Arc<InMemoryFabric>,
    channel_id: String,
    identity: SigningIdentity,
}

impl MemoryChannelSession {
    async fn call(
        &self,
        kind: ChannelCallKind,
        request: &ChannelRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<ChannelResponse> {
        self.fabric.simulate_latency(options).await?;

        let mut state = self.fabric.state.lock();
        state.channel_calls.push(ChannelCall {
            kind,
            channel_id: self.channel_id.clone(),
            identity: self.identity.clone(),
            request: request.clone(),
            targets: targets.iter().map(|p| p.name().to_string()).collect(),
            options,
        });

        if let Some(error) = state.channel_failure.take() {
            return Err(error);
        }

        let payload = state
            .responses
            .get(&(request.chaincode_id.clone(), request.function.clone()))
            .cloned()
            .unwrap_or_default();
        drop(state);

        Ok(ChannelResponse {
            transaction_id: self.fabric.next_transaction_id(),
            status: STATUS_OK,
            payload,
        })
    }
}

#[async_trait]
impl ChannelSession for MemoryChannelSession {
    async fn execute(
        &self,
        request: &ChannelRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<ChannelResponse> {
        self.call(ChannelCallKind::Execute, request, targets, options)
            .await
    }

    async fn query(
        &self,
        request: &ChannelRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<ChannelResponse> {
        self.call(ChannelCallKind::Query, request, targets, options)
            .await
    }
}
