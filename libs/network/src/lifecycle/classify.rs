//! Response Classification
//!
//! The single place where fabric failures and per-peer install responses
//! are sorted into "done", "already done" and "failed". The fabric reports
//! an already instantiated chaincode either with
//! [`SdkErrorKind::ChaincodeExists`] or only through its message text
//! (`chaincode exists <id>`); both are handled here.

use crate::error::OperationContext;
use crate::fabric::{InstallResponse, SdkError, SdkErrorKind, STATUS_OK};
use crate::LifecycleError;

/// Message fragment the fabric uses for an instantiated chaincode
pub const CHAINCODE_EXISTS_PREFIX: &str = "chaincode exists ";

/// Install response info for a chaincode version already on the peer
pub const ALREADY_INSTALLED_INFO: &str = "already installed";

/// Outcome of classifying a deploy failure
#[derive(Debug)]
pub enum Classified {
    /// The chaincode is already instantiated; not an error
    AlreadyDone,
    /// A real failure, wrapped with context
    Network(LifecycleError),
}

/// Sort a fabric failure for chaincode `chaincode_id`
pub fn classify(error: SdkError, chaincode_id: &str, context: OperationContext) -> Classified {
    if error.kind == SdkErrorKind::ChaincodeExists
        || mentions_existing_chaincode(&error.message, chaincode_id)
    {
        return Classified::AlreadyDone;
    }

    Classified::Network(LifecycleError::network_with_source(context, error))
}

/// Whether `message` says that exactly `chaincode_id` exists
///
/// `chaincode exists mycc` matches `mycc` but not `myc` or `mycc2`.
pub fn mentions_existing_chaincode(message: &str, chaincode_id: &str) -> bool {
    if chaincode_id.is_empty() {
        return false;
    }

    let needle = format!("{}{}", CHAINCODE_EXISTS_PREFIX, chaincode_id);
    message.match_indices(&needle).any(|(start, _)| {
        message[start + needle.len()..]
            .chars()
            .next()
            .map_or(true, |next| !is_chaincode_name_char(next))
    })
}

fn is_chaincode_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Per-peer install outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    Installed,
    AlreadyInstalled,
    Failed(String),
}

impl InstallStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, InstallStatus::Failed(_))
    }
}

/// Sort one peer's install response
pub fn classify_install_response(response: &InstallResponse) -> InstallStatus {
    if response
        .info
        .to_ascii_lowercase()
        .contains(ALREADY_INSTALLED_INFO)
    {
        InstallStatus::AlreadyInstalled
    } else if response.status != STATUS_OK {
        InstallStatus::Failed(format!(
            "install returned status {} from peer {}: {}",
            response.status, response.target, response.info
        ))
    } else {
        InstallStatus::Installed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> OperationContext {
        OperationContext::new("instantiate").chaincode("mycc").channel("mychannel")
    }

    #[test]
    fn test_exists_message_for_same_id() {
        let err = SdkError::rejected("instantiate failed: chaincode exists mycc");
        assert!(matches!(classify(err, "mycc", ctx()), Classified::AlreadyDone));
    }

    #[test]
    fn test_exists_message_for_other_id_is_failure() {
        let err = SdkError::rejected("instantiate failed: chaincode exists othercc");
        match classify(err, "mycc", ctx()) {
            Classified::Network(e) => {
                assert_eq!(e.category(), "network");
                assert!(e.to_string().contains("chaincode=mycc"));
                assert!(e.to_string().contains("othercc"));
            }
            Classified::AlreadyDone => panic!("Expected a network failure"),
        }
    }

    #[test]
    fn test_id_boundaries() {
        assert!(mentions_existing_chaincode("chaincode exists mycc", "mycc"));
        assert!(mentions_existing_chaincode("error: chaincode exists mycc (status 500)", "mycc"));
        assert!(mentions_existing_chaincode("chaincode exists mycc.1.0", "mycc"));
        assert!(!mentions_existing_chaincode("chaincode exists mycc2", "mycc"));
        assert!(!mentions_existing_chaincode("chaincode exists mycc-v2", "mycc"));
        assert!(!mentions_existing_chaincode("chaincode exists myc", "mycc"));
        assert!(!mentions_existing_chaincode("chaincode exists ", ""));
        assert!(mentions_existing_chaincode(
            "chaincode exists mycc2; chaincode exists mycc",
            "mycc"
        ));
    }

    #[test]
    fn test_structured_signal_wins() {
        let err = SdkError::new(SdkErrorKind::ChaincodeExists, "duplicate deployment");
        assert!(matches!(classify(err, "mycc", ctx()), Classified::AlreadyDone));
    }

    #[test]
    fn test_install_responses() {
        let response = |status, info: &str| InstallResponse {
            target: "peer0.orga".to_string(),
            status,
            info: info.to_string(),
        };

        assert_eq!(classify_install_response(&response(200, "")), InstallStatus::Installed);
        assert_eq!(
            classify_install_response(&response(500, "already installed")),
            InstallStatus::AlreadyInstalled
        );
        assert!(classify_install_response(&response(500, "disk full")).is_failure());
    }
}
