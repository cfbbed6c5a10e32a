//! Private-Data Collection Configuration
//!
//! Collection definitions are read from a JSON array:
//!
//! ```json
//! [
//!   {
//!     "name": "collectionMarbles",
//!     "policy": "OR('Org1MSP.member', 'Org2MSP.member')",
//!     "requiredPeerCount": 0,
//!     "maxPeerCount": 3
//!   }
//! ]
//! ```

use super::{PolicyCompiler, SignaturePolicyEnvelope};
use crate::{LifecycleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Collection entry as written in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDefinition {
    pub name: String,

    /// Member organizations policy expression
    pub policy: String,

    #[serde(rename = "requiredPeerCount")]
    pub required_peer_count: i32,

    #[serde(rename = "maxPeerCount")]
    pub max_peer_count: i32,
}

/// Compiled collection attached to instantiate and upgrade requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    pub name: String,
    pub member_orgs_policy: SignaturePolicyEnvelope,
    pub required_peer_count: i32,
    pub maximum_peer_count: i32,
}

impl CollectionDefinition {
    /// Compile the member policy and check peer counts
    pub fn compile(&self, compiler: &dyn PolicyCompiler) -> Result<CollectionConfig> {
        if self.name.trim().is_empty() {
            return Err(LifecycleError::config("Collection name must not be empty"));
        }

        if self.required_peer_count < 0 || self.max_peer_count < self.required_peer_count {
            return Err(LifecycleError::config(format!(
                "Collection '{}' has invalid peer counts: required {} max {}",
                self.name, self.required_peer_count, self.max_peer_count
            )));
        }

        let member_orgs_policy = compiler.compile(&self.policy).map_err(|e| {
            LifecycleError::config_with_source(
                format!(
                    "Invalid policy '{}' for collection '{}': {}",
                    self.policy, self.name, e
                ),
                e,
            )
        })?;

        Ok(CollectionConfig {
            name: self.name.clone(),
            member_orgs_policy,
            required_peer_count: self.required_peer_count,
            maximum_peer_count: self.max_peer_count,
        })
    }
}

/// Parse and compile collection definitions from a JSON string
pub fn parse_collections(json: &str, compiler: &dyn PolicyCompiler) -> Result<Vec<CollectionConfig>> {
    let definitions: Vec<CollectionDefinition> = serde_json::from_str(json)
        .map_err(|e| LifecycleError::config_with_source("Invalid collection configuration", e))?;

    let mut seen = HashSet::new();
    let mut collections = Vec::with_capacity(definitions.len());
    for definition in &definitions {
        if !seen.insert(definition.name.as_str()) {
            return Err(LifecycleError::config(format!(
                "Duplicate collection '{}'",
                definition.name
            )));
        }
        collections.push(definition.compile(compiler)?);
    }

    Ok(collections)
}

/// Load collections from `path`; no path means no collections
pub fn load_collections(
    path: Option<&Path>,
    compiler: &dyn PolicyCompiler,
) -> Result<Vec<CollectionConfig>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };

    debug!("Loading collection configuration: {:?}", path);
    let content = std::fs::read_to_string(path).map_err(|e| {
        LifecycleError::config_with_source(
            format!("Failed to read collection configuration {:?}", path),
            e,
        )
    })?;

    parse_collections(&content, compiler)
}
