//! Network Fabric Collaborator Interfaces
//!
//! The lifecycle layer never speaks the ledger wire protocol itself. It
//! drives the network through the traits below:
//!
//! - [`FabricConnector`] builds the long-lived SDK handle for a network
//!   description. This is the expensive network/crypto setup.
//! - [`FabricSdk`] creates peers, resolves signing identities, packages
//!   chaincode and opens sessions.
//! - [`ResourceSession`] carries resource-management calls (install,
//!   instantiate, upgrade) for one identity.
//! - [`ChannelSession`] carries channel calls (execute, query) for one
//!   identity on one channel.
//!
//! [`memory::InMemoryFabric`] implements all of them over a simulated
//! network for tests and dry runs.

use crate::discovery::{NetworkPeer, TopologySource};
use crate::policy::{CollectionConfig, SignaturePolicyEnvelope};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;

pub use memory::InMemoryFabric;

/// Status code a peer reports for a successful proposal
pub const STATUS_OK: i32 = 200;

/// Result type alias for collaborator calls
pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// Failure classes reported by the network fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkErrorKind {
    /// Caller-supplied deadline elapsed
    Timeout,
    /// Caller cancelled the request
    Cancelled,
    /// Peer or orderer could not be reached
    Unreachable,
    /// Proposal or transaction was rejected
    Rejected,
    /// Structured "chaincode already instantiated" signal
    ChaincodeExists,
    /// Signing identity could not be loaded
    Identity,
    /// Anything else
    Other,
}

/// Error reported by the network fabric collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkError {
    pub kind: SdkErrorKind,
    pub message: String,
    pub status: Option<i32>,
}

impl fmt::Display for SdkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {})", self.message, status),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for SdkError {}

impl SdkError {
    pub fn new(kind: SdkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: i32) -> Self {
        self.status = Some(status);
        self
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SdkErrorKind::Timeout, message)
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(SdkErrorKind::Unreachable, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(SdkErrorKind::Rejected, message)
    }

    pub fn identity(message: impl Into<String>) -> Self {
        Self::new(SdkErrorKind::Identity, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(SdkErrorKind::Other, message)
    }
}

/// Opaque peer target reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    name: String,
    url: String,
    org_id: String,
}

impl Peer {
    pub fn new(name: impl Into<String>, url: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            org_id: org_id.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }
}

/// Signing identity (user or admin) bound to one organization
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SigningIdentity {
    id: String,
    msp_id: String,
    org_id: String,
}

impl SigningIdentity {
    pub fn new(id: impl Into<String>, msp_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msp_id: msp_id.into(),
            org_id: org_id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }
}

/// Per-request options forwarded untouched to the fabric
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Deadline for the whole call; `None` leaves the fabric default
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Packaged chaincode source ready for installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaincodePackage {
    pub path: String,
    pub code: Bytes,
}

/// Install proposal for one chaincode version
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub name: String,
    pub path: String,
    pub version: String,
    pub package: ChaincodePackage,
}

/// One peer's answer to an install proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResponse {
    pub target: String,
    pub status: i32,
    pub info: String,
}

/// Instantiate or upgrade proposal
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub name: String,
    pub path: String,
    pub version: String,
    pub args: Vec<Bytes>,
    pub policy: SignaturePolicyEnvelope,
    pub collections: Vec<CollectionConfig>,
}

/// Chaincode function call on a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub chaincode_id: String,
    pub function: String,
    pub args: Vec<Bytes>,
}

/// Result of a channel call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelResponse {
    pub transaction_id: String,
    pub status: i32,
    pub payload: Bytes,
}

/// Builds the long-lived SDK handle for a network description
#[async_trait]
pub trait FabricConnector: Send + Sync {
    async fn connect(&self, source: &dyn TopologySource) -> SdkResult<Arc<dyn FabricSdk>>;
}

/// Long-lived SDK handle
#[async_trait]
pub trait FabricSdk: Send + Sync {
    /// Create a peer target from its configuration
    async fn create_peer(&self, peer: &NetworkPeer) -> SdkResult<Peer>;

    /// Load the signing identity enrolled for `username` in `org_id`
    async fn signing_identity(&self, org_id: &str, username: &str) -> SdkResult<SigningIdentity>;

    /// Open an identity-scoped session (handshake)
    async fn resource_session(
        &self,
        identity: &SigningIdentity,
    ) -> SdkResult<Arc<dyn ResourceSession>>;

    /// Open an identity- and channel-scoped session (handshake)
    async fn channel_session(
        &self,
        channel_id: &str,
        identity: &SigningIdentity,
    ) -> SdkResult<Arc<dyn ChannelSession>>;

    /// Package chaincode source found at `path`
    async fn package_chaincode(&self, path: &str) -> SdkResult<ChaincodePackage>;

    /// Release the handle and everything opened through it
    fn close(&self);
}

/// Resource-management calls for one identity
#[async_trait]
pub trait ResourceSession: Send + Sync {
    async fn install_chaincode(
        &self,
        request: &InstallRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<Vec<InstallResponse>>;

    async fn instantiate_chaincode(
        &self,
        channel_id: &str,
        request: &DeployRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<String>;

    async fn upgrade_chaincode(
        &self,
        channel_id: &str,
        request: &DeployRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<String>;
}

/// Channel calls for one identity on one channel
#[async_trait]
pub trait ChannelSession: Send + Sync {
    /// Endorse and commit a transaction; empty `targets` lets discovery pick
    async fn execute(
        &self,
        request: &ChannelRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<ChannelResponse>;

    /// Evaluate without committing; empty `targets` lets discovery pick
    async fn query(
        &self,
        request: &ChannelRequest,
        targets: &[Peer],
        options: RequestOptions,
    ) -> SdkResult<ChannelResponse>;
}
