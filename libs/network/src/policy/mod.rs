//! Endorsement Policies
//!
//! Structured signature policies, the [`PolicyCompiler`] seam that turns
//! policy expressions into them, and private-data collection configs.
//!
//! A policy is a tree of threshold rules over an indexed list of principals:
//!
//! ```text
//! OutOf(2, 'OrgA.member', 'OrgB.member', 'OrgC.admin')
//!
//!   NOutOf(2) ── SignedBy(0)  OrgAMSP member
//!             ├─ SignedBy(1)  OrgBMSP member
//!             └─ SignedBy(2)  OrgCMSP admin
//! ```

use crate::{LifecycleError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod collections;
pub mod expression;

pub use collections::{load_collections, parse_collections, CollectionConfig, CollectionDefinition};
pub use expression::ExpressionCompiler;

/// Signature policy envelope version understood by the fabric
pub const POLICY_VERSION: i32 = 0;

/// Role a principal must hold within its MSP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MspRole {
    Member,
    Admin,
    Client,
    Peer,
    Orderer,
}

impl MspRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MspRole::Member => "member",
            MspRole::Admin => "admin",
            MspRole::Client => "client",
            MspRole::Peer => "peer",
            MspRole::Orderer => "orderer",
        }
    }
}

impl FromStr for MspRole {
    type Err = PolicyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "member" => Ok(MspRole::Member),
            "admin" => Ok(MspRole::Admin),
            "client" => Ok(MspRole::Client),
            "peer" => Ok(MspRole::Peer),
            "orderer" => Ok(MspRole::Orderer),
            _ => Err(PolicyError::UnknownRole(s.to_string())),
        }
    }
}

/// An MSP id paired with a role
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MspPrincipal {
    pub msp_id: String,
    pub role: MspRole,
}

impl MspPrincipal {
    pub fn new(msp_id: impl Into<String>, role: MspRole) -> Self {
        Self {
            msp_id: msp_id.into(),
            role,
        }
    }

    pub fn member(msp_id: impl Into<String>) -> Self {
        Self::new(msp_id, MspRole::Member)
    }
}

impl fmt::Display for MspPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.msp_id, self.role.as_str())
    }
}

/// Threshold rule tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyRule {
    /// Signature of the principal at this index
    SignedBy(usize),
    /// At least `n` of the sub-rules
    NOutOf { n: usize, rules: Vec<PolicyRule> },
}

/// Compiled signature policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePolicyEnvelope {
    pub version: i32,
    pub rule: PolicyRule,
    pub identities: Vec<MspPrincipal>,
}

impl SignaturePolicyEnvelope {
    /// Principal referenced by a `SignedBy` index
    pub fn principal(&self, index: usize) -> Option<&MspPrincipal> {
        self.identities.get(index)
    }

    /// Whether a set of signers satisfies the policy
    pub fn is_satisfied_by(&self, signers: &[MspPrincipal]) -> bool {
        self.evaluate(&self.rule, signers)
    }

    fn evaluate(&self, rule: &PolicyRule, signers: &[MspPrincipal]) -> bool {
        match rule {
            PolicyRule::SignedBy(index) => self
                .identities
                .get(*index)
                .map(|principal| signers.contains(principal))
                .unwrap_or(false),
            PolicyRule::NOutOf { n, rules } => {
                rules
                    .iter()
                    .filter(|rule| self.evaluate(rule, signers))
                    .count()
                    >= *n
            }
        }
    }
}

/// Policy compilation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("empty policy expression")]
    Empty,

    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("threshold {n} out of range for {count} sub-policies")]
    InvalidThreshold { n: usize, count: usize },

    #[error("no organizations to build a policy from")]
    NoOrganizations,
}

/// Compiles endorsement policy expressions
pub trait PolicyCompiler: Send + Sync {
    /// Compile a policy expression
    fn compile(&self, expression: &str) -> std::result::Result<SignaturePolicyEnvelope, PolicyError>;

    /// Policy satisfied by any member of any of `msp_ids`
    fn any_member_of(
        &self,
        msp_ids: &[String],
    ) -> std::result::Result<SignaturePolicyEnvelope, PolicyError> {
        let mut identities: Vec<MspPrincipal> = Vec::with_capacity(msp_ids.len());
        for msp_id in msp_ids {
            let principal = MspPrincipal::member(msp_id.as_str());
            if !identities.contains(&principal) {
                identities.push(principal);
            }
        }

        if identities.is_empty() {
            return Err(PolicyError::NoOrganizations);
        }

        let rules = (0..identities.len()).map(PolicyRule::SignedBy).collect();
        Ok(SignaturePolicyEnvelope {
            version: POLICY_VERSION,
            rule: PolicyRule::NOutOf { n: 1, rules },
            identities,
        })
    }
}

/// Compile `expression`, or fall back to "any member of `msp_ids`" when blank
pub fn resolve_policy(
    compiler: &dyn PolicyCompiler,
    expression: Option<&str>,
    msp_ids: &[String],
) -> Result<SignaturePolicyEnvelope> {
    match expression.map(str::trim).filter(|e| !e.is_empty()) {
        Some(expression) => compiler.compile(expression).map_err(|e| {
            LifecycleError::config_with_source(
                format!("Invalid endorsement policy '{}': {}", expression, e),
                e,
            )
        }),
        None => compiler.any_member_of(msp_ids).map_err(|e| {
            LifecycleError::config_with_source(format!("Cannot build default policy: {}", e), e)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_accepts_any_member() {
        let compiler = ExpressionCompiler;
        let msp_ids = vec!["OrgAMSP".to_string(), "OrgBMSP".to_string()];

        let policy = resolve_policy(&compiler, None, &msp_ids).unwrap();

        assert_eq!(policy.identities.len(), 2);
        assert!(policy.is_satisfied_by(&[MspPrincipal::member("OrgBMSP")]));
        assert!(!policy.is_satisfied_by(&[MspPrincipal::member("OrgZMSP")]));
        assert!(!policy.is_satisfied_by(&[MspPrincipal::new("OrgAMSP", MspRole::Admin)]));
    }

    #[test]
    fn test_blank_expression_uses_default() {
        let compiler = ExpressionCompiler;
        let msp_ids = vec!["OrgAMSP".to_string()];
        let blank = resolve_policy(&compiler, Some("   "), &msp_ids).unwrap();
        let default = compiler.any_member_of(&msp_ids).unwrap();
        assert_eq!(blank, default);
    }

    #[test]
    fn test_compile_failure_names_expression() {
        let compiler = ExpressionCompiler;
        let err = resolve_policy(&compiler, Some("AND('OrgA.member'"), &[]).unwrap_err();

        assert_eq!(err.category(), "config");
        assert!(err.to_string().contains("AND('OrgA.member'"));
    }

    #[test]
    fn test_default_without_orgs_fails() {
        let compiler = ExpressionCompiler;
        assert!(resolve_policy(&compiler, None, &[]).is_err());
    }
}
