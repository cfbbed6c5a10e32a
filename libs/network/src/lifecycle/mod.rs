//! Chaincode Lifecycle Operations
//!
//! Install, instantiate, upgrade, invoke and query share one contract:
//! [`ChaincodeOperation::execute`] returns an [`OperationResult`] or fails,
//! and [`ChaincodeOperation::terminate`] releases the broker's SDK handle.
//!
//! | Operation   | Targets                       | Identity         | Payload            |
//! |-------------|-------------------------------|------------------|--------------------|
//! | install     | every peer of every org       | admin of each org| sentinel `0x00`    |
//! | instantiate | client org anchor peer        | client org admin | `OK` / `EXISTS`    |
//! | upgrade     | client org anchor peer        | client org admin | `OK` / `EXISTS`    |
//! | invoke      | one random client org peer    | client org user  | fabric payload     |
//! | query       | channel discovery             | client org user  | fabric payload     |

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use fabric_config::defaults::markers;
use std::fmt;
use std::path::PathBuf;

pub mod classify;
pub mod deploy;
pub mod install;
pub mod instantiate;
pub mod invoke;
pub mod query;
pub mod upgrade;

pub use classify::{classify, classify_install_response, Classified, InstallStatus};
pub use install::{InstallOperation, InstallReport, OrgInstallReport, PeerInstallOutcome};
pub use instantiate::InstantiateOperation;
pub use invoke::InvokeOperation;
pub use query::QueryOperation;
pub use upgrade::UpgradeOperation;

/// Lifecycle operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Install,
    Instantiate,
    Upgrade,
    Invoke,
    Query,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Install => "install",
            OperationKind::Instantiate => "instantiate",
            OperationKind::Upgrade => "upgrade",
            OperationKind::Invoke => "invoke",
            OperationKind::Query => "query",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful outcome of a lifecycle call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Completed; carries the operation payload
    Success(Bytes),
    /// Idempotent no-op; carries the `EXISTS` marker
    AlreadyDone(Bytes),
}

impl OperationResult {
    pub fn ok_marker() -> Self {
        OperationResult::Success(Bytes::from_static(markers::OK))
    }

    pub fn exists_marker() -> Self {
        OperationResult::AlreadyDone(Bytes::from_static(markers::EXISTS))
    }

    pub fn sentinel() -> Self {
        OperationResult::Success(Bytes::from_static(markers::SENTINEL))
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            OperationResult::Success(payload) | OperationResult::AlreadyDone(payload) => payload,
        }
    }

    pub fn into_payload(self) -> Bytes {
        match self {
            OperationResult::Success(payload) | OperationResult::AlreadyDone(payload) => payload,
        }
    }

    pub fn is_already_done(&self) -> bool {
        matches!(self, OperationResult::AlreadyDone(_))
    }
}

/// Byte-level encoding of an outcome; failures encode as the sentinel byte
pub fn encode_outcome(outcome: &Result<OperationResult>) -> Bytes {
    match outcome {
        Ok(result) => result.payload().clone(),
        Err(_) => Bytes::from_static(markers::SENTINEL),
    }
}

/// A lifecycle operation bound to a session broker
#[async_trait]
pub trait ChaincodeOperation: Send + Sync {
    fn kind(&self) -> OperationKind;

    /// Run the operation once
    async fn execute(&self) -> Result<OperationResult>;

    /// Release the broker's SDK handle; safe to call repeatedly
    fn terminate(&self);
}

/// Execute `operation` and terminate it on every exit path
pub async fn execute_and_terminate(operation: &dyn ChaincodeOperation) -> Result<OperationResult> {
    struct TerminateGuard<'a>(&'a dyn ChaincodeOperation);

    impl Drop for TerminateGuard<'_> {
        fn drop(&mut self) {
            self.0.terminate();
        }
    }

    let _guard = TerminateGuard(operation);
    operation.execute().await
}

/// Chaincode identity and deployment inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaincodeDescriptor {
    pub id: String,
    pub version: String,
    pub path: String,
    /// Endorsement policy expression; `None` or blank means any known member
    pub policy: Option<String>,
    /// Private-data collection file; `None` means no collections
    pub collections_path: Option<PathBuf>,
}

impl ChaincodeDescriptor {
    pub fn new(id: impl Into<String>, version: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            path: path.into(),
            policy: None,
            collections_path: None,
        }
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn with_collections(mut self, path: impl Into<PathBuf>) -> Self {
        self.collections_path = Some(path.into());
        self
    }

    /// `id.version`, as used in log lines
    pub fn id_version(&self) -> String {
        format!("{}.{}", self.id, self.version)
    }
}

/// Chaincode function call for invoke and query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaincodeCall {
    pub channel_id: String,
    pub chaincode_id: String,
    pub function: String,
    pub args: Vec<Bytes>,
}

impl ChaincodeCall {
    pub fn new(
        channel_id: impl Into<String>,
        chaincode_id: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            chaincode_id: chaincode_id.into(),
            function: function.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}
