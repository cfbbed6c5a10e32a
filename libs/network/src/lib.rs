//! Fabric Network Access Layer
//!
//! Client-side access to a permissioned multi-organization ledger network:
//! resolves network topology, caches per-identity sessions and exposes the
//! chaincode lifecycle (install, instantiate, upgrade, invoke, query) as
//! uniform [`lifecycle::ChaincodeOperation`] handles.
//!
//! ```text
//! FabricNetwork ──► SessionBroker ──► FabricSdk (collaborator)
//!      │                 ▲
//!      ▼                 │
//! ChaincodeOperation ────┼──► PeerSelector
//!                        └──► PolicyCompiler
//! ```
//!
//! The ledger itself (consensus, gossip, signing, wire protocol) sits behind
//! the traits in [`fabric`]; [`fabric::memory::InMemoryFabric`] simulates it.

pub mod discovery;
pub mod error;
pub mod fabric;
pub mod lifecycle;
pub mod network;
pub mod policy;
pub mod routing;
pub mod sessions;

// Re-export commonly used types
pub use discovery::{NetworkDescription, ResolvedTopology, TopologyResolver, TopologySource};
pub use error::{LifecycleError, OperationContext, Result};
pub use fabric::{FabricConnector, FabricSdk, InMemoryFabric, Peer, RequestOptions, SigningIdentity};
pub use lifecycle::{
    execute_and_terminate, ChaincodeCall, ChaincodeDescriptor, ChaincodeOperation, OperationKind,
    OperationResult,
};
pub use network::FabricNetwork;
pub use policy::{ExpressionCompiler, PolicyCompiler, SignaturePolicyEnvelope};
pub use routing::PeerSelector;
pub use sessions::SessionBroker;
