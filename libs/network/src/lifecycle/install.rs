//! Chaincode Install
//!
//! Broadcasts an install to every peer of every participating organization,
//! signing as each organization's admin. Organizations are attempted in
//! order; a failing organization does not stop the others. The first
//! failure of each organization is recorded and the last recorded failure
//! is returned once every organization has been attempted. The complete
//! per-peer breakdown stays available through [`InstallOperation::last_report`].

use super::classify::{classify_install_response, InstallStatus};
use super::{ChaincodeDescriptor, ChaincodeOperation, OperationKind, OperationResult};
use crate::error::OperationContext;
use crate::fabric::{InstallRequest, Peer, RequestOptions};
use crate::routing::PeerSelector;
use crate::sessions::SessionBroker;
use crate::{LifecycleError, Result};
use async_trait::async_trait;
use fabric_config::defaults::identities::ADMIN_USER;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};

/// One peer's install outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInstallOutcome {
    pub peer: String,
    pub status: InstallStatus,
}

/// Install outcome of one organization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrgInstallReport {
    pub org_id: String,
    pub peers: Vec<PeerInstallOutcome>,
    /// First failure of the organization, if any
    pub error: Option<String>,
}

impl OrgInstallReport {
    fn new(org_id: &str) -> Self {
        Self {
            org_id: org_id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Full breakdown of one install execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub chaincode_id: String,
    pub version: String,
    pub orgs: Vec<OrgInstallReport>,
}

impl InstallReport {
    pub fn is_success(&self) -> bool {
        self.orgs.iter().all(OrgInstallReport::is_success)
    }

    pub fn failed_orgs(&self) -> impl Iterator<Item = &str> {
        self.orgs
            .iter()
            .filter(|org| !org.is_success())
            .map(|org| org.org_id.as_str())
    }

    /// Every peer that was attempted, across organizations
    pub fn attempted_peers(&self) -> impl Iterator<Item = &PeerInstallOutcome> {
        self.orgs.iter().flat_map(|org| org.peers.iter())
    }
}

/// Install handle for one chaincode version
pub struct InstallOperation {
    broker: Arc<SessionBroker>,
    selector: Arc<PeerSelector>,
    chaincode: ChaincodeDescriptor,
    options: RequestOptions,
    last_report: Mutex<Option<InstallReport>>,
}

impl InstallOperation {
    pub fn new(
        broker: Arc<SessionBroker>,
        selector: Arc<PeerSelector>,
        chaincode: ChaincodeDescriptor,
    ) -> Self {
        Self {
            broker,
            selector,
            chaincode,
            options: RequestOptions::default(),
            last_report: Mutex::new(None),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn chaincode(&self) -> &ChaincodeDescriptor {
        &self.chaincode
    }

    /// Breakdown of the most recent execution
    pub fn last_report(&self) -> Option<InstallReport> {
        self.last_report.lock().clone()
    }

    fn context(&self, org_id: &str) -> OperationContext {
        OperationContext::new(OperationKind::Install.as_str())
            .chaincode(&self.chaincode.id)
            .org(org_id)
    }

    async fn install_on_org(
        &self,
        org_id: &str,
        peers: &[Peer],
        request: &InstallRequest,
    ) -> (OrgInstallReport, Option<LifecycleError>) {
        let mut report = OrgInstallReport::new(org_id);

        info!(
            "Installing chaincode {} on org[{}] peers: {}",
            self.chaincode.id,
            org_id,
            peers.iter().map(Peer::url).collect::<Vec<_>>().join(", ")
        );

        if peers.is_empty() {
            warn!("Org {} has no peers, nothing to install", org_id);
            return (report, None);
        }

        let client = match self.broker.resource_mgmt_client_by_org(ADMIN_USER, org_id).await {
            Ok(client) => client,
            Err(e) => {
                report.error = Some(e.to_string());
                return (report, Some(e));
            }
        };

        let responses = match client.install(request, peers, self.options).await {
            Ok(responses) => responses,
            Err(e) => {
                let e = LifecycleError::network_with_source(self.context(org_id), e);
                report.error = Some(e.to_string());
                return (report, Some(e));
            }
        };

        let id_version = self.chaincode.id_version();
        let mut first_failure = None;

        for response in &responses {
            let status = classify_install_response(response);
            match &status {
                InstallStatus::AlreadyInstalled => info!(
                    "Chaincode {} already installed on peer: {}",
                    id_version, response.target
                ),
                InstallStatus::Installed => info!(
                    "Successfully installed chaincode {} on peer {}",
                    id_version, response.target
                ),
                InstallStatus::Failed(message) => {
                    error!("{}", message);
                    if first_failure.is_none() {
                        first_failure = Some(LifecycleError::network(
                            self.context(org_id).peer(&response.target),
                            message.clone(),
                        ));
                    }
                }
            }
            report.peers.push(PeerInstallOutcome {
                peer: response.target.clone(),
                status,
            });
        }

        if let Some(e) = &first_failure {
            report.error = Some(e.to_string());
        }
        (report, first_failure)
    }
}

#[async_trait]
impl ChaincodeOperation for InstallOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Install
    }

    async fn execute(&self) -> Result<OperationResult> {
        self.broker.ensure_open()?;

        let targets = self
            .selector
            .select_for_install(self.broker.topology().peers_by_org());

        let package = self
            .broker
            .sdk()
            .package_chaincode(&self.chaincode.path)
            .await
            .map_err(|e| {
                LifecycleError::config_with_source(
                    format!("Failed to package chaincode at '{}'", self.chaincode.path),
                    e,
                )
            })?;

        let request = InstallRequest {
            name: self.chaincode.id.clone(),
            path: self.chaincode.path.clone(),
            version: self.chaincode.version.clone(),
            package,
        };

        let mut report = InstallReport {
            chaincode_id: self.chaincode.id.clone(),
            version: self.chaincode.version.clone(),
            orgs: Vec::with_capacity(targets.len()),
        };
        let mut last_error = None;

        for (org_id, peers) in &targets {
            let (org_report, failure) = self.install_on_org(org_id, peers, &request).await;
            report.orgs.push(org_report);
            if let Some(e) = failure {
                last_error = Some(e);
            }
        }

        let failed: Vec<&str> = report.failed_orgs().collect();
        if !failed.is_empty() {
            error!(
                "Install of {} failed for org(s): {}",
                self.chaincode.id_version(),
                failed.join(", ")
            );
        }
        *self.last_report.lock() = Some(report);

        match last_error {
            Some(e) => Err(e),
            None => Ok(OperationResult::sentinel()),
        }
    }

    fn terminate(&self) {
        self.broker.close();
    }
}
