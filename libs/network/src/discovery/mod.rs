//! Topology Discovery and Resolution
//!
//! Maps a declarative network description onto the concrete organizations,
//! peers and signing identities a client organization works with.
//!
//! ## Architecture Role
//!
//! ```text
//! network.yaml ──► NetworkDescription ──► TopologySource
//!                                              │
//!                         FabricConnector ──► TopologyResolver ──► ResolvedNetwork
//!                                              │                     ├─ ResolvedTopology
//!                                              │                     └─ FabricSdk handle
//! ```
//!
//! The resolver performs the expensive SDK construction exactly once per
//! `resolve` call. Everything it returns is immutable afterwards; the
//! [`crate::sessions::SessionBroker`] borrows identities from it but never
//! owns or mutates them.
//!
//! Organizations whose id contains the ordering-service marker
//! (`orderer`, case-insensitive) are excluded from the participating set.

use std::collections::BTreeMap;

pub mod config;
pub mod resolution;

// Re-export main types
pub use config::{
    ChannelConfig, ClientSection, NetworkDescription, OrganizationConfig, PeerConfig, TlsCaCerts,
};
pub use resolution::{ResolvedNetwork, ResolvedTopology, TopologyResolver};

/// A peer as declared by the topology source
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkPeer {
    pub name: String,
    pub org_id: String,
    pub config: PeerConfig,
}

/// Declarative topology consumed by the resolver
pub trait TopologySource: Send + Sync {
    /// Organization the description was issued for, if it names one
    fn client_organization(&self) -> Option<String>;

    /// Every organization keyed by id
    fn organizations(&self) -> BTreeMap<String, OrganizationConfig>;

    /// Peers of an organization in declaration order; `None` if not found
    fn peers_config(&self, org_id: &str) -> Option<Vec<NetworkPeer>>;
}

/// Whether an organization id follows the ordering-service naming convention
pub fn is_orderer_org(org_id: &str) -> bool {
    org_id
        .to_lowercase()
        .contains(fabric_config::defaults::topology::ORDERER_ORG_MARKER)
}
