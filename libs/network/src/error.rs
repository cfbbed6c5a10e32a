//! Lifecycle Error Types
//!
//! Error handling for topology resolution, session brokering and chaincode
//! lifecycle operations. Idempotent no-ops ("already installed", "chaincode
//! exists") are not errors and never appear here; see
//! [`crate::lifecycle::OperationResult`].

use std::fmt;
use thiserror::Error;

/// Boxed underlying cause
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Identifying context attached to every network failure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationContext {
    pub operation: String,
    pub function: Option<String>,
    pub chaincode_id: Option<String>,
    pub channel: Option<String>,
    pub org: Option<String>,
    pub peer: Option<String>,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn chaincode(mut self, chaincode_id: impl Into<String>) -> Self {
        self.chaincode_id = Some(chaincode_id.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn org(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    pub fn peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }
}

impl fmt::Display for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation)?;
        if let Some(function) = &self.function {
            write!(f, " function={}", function)?;
        }
        if let Some(chaincode_id) = &self.chaincode_id {
            write!(f, " chaincode={}", chaincode_id)?;
        }
        if let Some(channel) = &self.channel {
            write!(f, " channel={}", channel)?;
        }
        if let Some(org) = &self.org {
            write!(f, " org={}", org)?;
        }
        if let Some(peer) = &self.peer {
            write!(f, " peer={}", peer)?;
        }
        Ok(())
    }
}

/// Main lifecycle error type
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Topology, policy, collection or packaging configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        source: Option<BoxError>,
    },

    /// No signing identity for a (username, org) pair
    #[error("Identity resolution failed for user '{username}' of org '{org_id}': {message}")]
    IdentityResolution {
        username: String,
        org_id: String,
        message: String,
        source: Option<BoxError>,
    },

    /// Network fabric call failed
    #[error("Network error [{context}]: {message}")]
    Network {
        context: OperationContext,
        message: String,
        source: Option<BoxError>,
    },

    /// A client was requested after the broker released its handle
    #[error("Session broker for org '{org_id}' is closed")]
    SessionClosed { org_id: String },
}

impl LifecycleError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an identity resolution error with source
    pub fn identity(
        username: impl Into<String>,
        org_id: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::IdentityResolution {
            username: username.into(),
            org_id: org_id.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a network error
    pub fn network(context: OperationContext, message: impl Into<String>) -> Self {
        Self::Network {
            context,
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source
    pub fn network_with_source(
        context: OperationContext,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            context,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a session closed error
    pub fn session_closed(org_id: impl Into<String>) -> Self {
        Self::SessionClosed {
            org_id: org_id.into(),
        }
    }

    /// Operation context of a network error
    pub fn context(&self) -> Option<&OperationContext> {
        match self {
            Self::Network { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Lifecycle operations never retry; a caller may re-run a network failure
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Config { .. } => false,
            Self::IdentityResolution { .. } => false,
            Self::SessionClosed { .. } => false,
        }
    }

    /// Get error category for log labels
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::IdentityResolution { .. } => "identity",
            Self::Network { .. } => "network",
            Self::SessionClosed { .. } => "session_closed",
        }
    }
}

/// Configuration crate errors surface as configuration errors
impl From<anyhow::Error> for LifecycleError {
    fn from(error: anyhow::Error) -> Self {
        LifecycleError::Config {
            message: format!("{:#}", error),
            source: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_context_display() {
        let context = OperationContext::new("invoke")
            .function("transfer")
            .chaincode("mycc")
            .channel("mychannel")
            .peer("peer0.orga.example.com");

        assert_eq!(
            context.to_string(),
            "invoke function=transfer chaincode=mycc channel=mychannel peer=peer0.orga.example.com"
        );
    }

    #[test]
    fn test_network_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline exceeded");
        let err = LifecycleError::network_with_source(
            OperationContext::new("query").chaincode("mycc"),
            io,
        );

        assert_eq!(err.category(), "network");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("deadline exceeded"));
        assert!(err.to_string().contains("chaincode=mycc"));
        assert!(err.source().is_some());
        assert_eq!(err.context().unwrap().operation, "query");
    }

    #[test]
    fn test_identity_error_names_user_and_org() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no enrollment");
        let err = LifecycleError::identity("User9", "OrgB", io);

        let message = err.to_string();
        assert!(message.contains("User9"));
        assert!(message.contains("OrgB"));
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "identity");
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: LifecycleError = anyhow::anyhow!("missing section").into();
        match err {
            LifecycleError::Config { message, source } => {
                assert!(message.contains("missing section"));
                assert!(source.is_some());
            }
            _ => panic!("Expected Config error"),
        }
    }
}
