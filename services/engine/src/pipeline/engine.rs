//! Pipeline Collaborators
//!
//! Seams between the runner and the outside world: the engine that applies a
//! stage, the verification suite behind post-deploy gates, and the operator
//! behind manual approvals.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::info;

use super::types::DeploymentStage;

/// Applies one stage to its target account
#[async_trait]
pub trait ApplyEngine: Send + Sync {
    async fn deploy(&self, stage: &DeploymentStage) -> Result<()>;
}

/// Runs a named verification suite against a deployed stage
#[async_trait]
pub trait VerificationSuite: Send + Sync {
    async fn verify(&self, stage: &DeploymentStage, suite: &str) -> Result<()>;
}

/// Operator decision on a manual approval gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected { reason: String },
}

/// Source of manual approval decisions
#[async_trait]
pub trait ApprovalGateway: Send + Sync {
    async fn await_decision(&self, stage: &DeploymentStage, gate: &str) -> Result<ApprovalDecision>;
}

/// Approves every gate immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGateway for AutoApprove {
    async fn await_decision(&self, stage: &DeploymentStage, gate: &str) -> Result<ApprovalDecision> {
        info!(stage = %stage.name, gate = %gate, "Auto-approving gate");
        Ok(ApprovalDecision::Approved)
    }
}

/// An approval waiting on an operator
#[derive(Debug)]
pub struct PendingApproval {
    pub stage: String,
    pub gate: String,
    responder: oneshot::Sender<ApprovalDecision>,
}

impl PendingApproval {
    pub fn approve(self) {
        // The runner may have gone away; nothing to report then
        let _ = self.responder.send(ApprovalDecision::Approved);
    }

    pub fn reject(self, reason: impl Into<String>) {
        let _ = self.responder.send(ApprovalDecision::Rejected { reason: reason.into() });
    }
}

/// Operator side of [`ChannelApprovals`]
#[derive(Debug)]
pub struct ApprovalHandle {
    requests: mpsc::Receiver<PendingApproval>,
}

impl ApprovalHandle {
    /// Next approval request, or `None` once the runner is dropped
    pub async fn next(&mut self) -> Option<PendingApproval> {
        self.requests.recv().await
    }
}

/// Approval gateway that forwards requests to an [`ApprovalHandle`]
#[derive(Debug, Clone)]
pub struct ChannelApprovals {
    requests: mpsc::Sender<PendingApproval>,
}

impl ChannelApprovals {
    pub fn new(buffer: usize) -> (Self, ApprovalHandle) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { requests: tx }, ApprovalHandle { requests: rx })
    }
}

#[async_trait]
impl ApprovalGateway for ChannelApprovals {
    async fn await_decision(&self, stage: &DeploymentStage, gate: &str) -> Result<ApprovalDecision> {
        let (responder, decision) = oneshot::channel();
        self.requests
            .send(PendingApproval {
                stage: stage.name.clone(),
                gate: gate.to_string(),
                responder,
            })
            .await
            .map_err(|_| anyhow::anyhow!("approval handle dropped"))?;

        info!(stage = %stage.name, gate = %gate, "Waiting for manual approval");
        decision
            .await
            .with_context(|| format!("approval for gate '{}' was abandoned", gate))
    }
}

/// Logs what would be applied and records the order
#[derive(Debug, Default)]
pub struct DryRunApplyEngine {
    deployed: Mutex<Vec<String>>,
}

impl DryRunApplyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage names deployed so far, in order
    pub async fn deployed(&self) -> Vec<String> {
        self.deployed.lock().await.clone()
    }
}

#[async_trait]
impl ApplyEngine for DryRunApplyEngine {
    async fn deploy(&self, stage: &DeploymentStage) -> Result<()> {
        match &stage.wiring {
            Some(wiring) => info!(
                stage = %stage.name,
                account = %stage.account,
                region = %stage.region,
                domain = %wiring.normalized_domain,
                trust_credential = %wiring.trust_credential_reference,
                zone_id = %wiring.zone_identifier,
                "[dry-run] Would deploy stage"
            ),
            None => info!(
                stage = %stage.name,
                account = %stage.account,
                region = %stage.region,
                "[dry-run] Would deploy shared delegation layer"
            ),
        }
        self.deployed.lock().await.push(stage.name.clone());
        Ok(())
    }
}

/// Logs the suite that would run and always passes
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunVerification;

#[async_trait]
impl VerificationSuite for DryRunVerification {
    async fn verify(&self, stage: &DeploymentStage, suite: &str) -> Result<()> {
        info!(stage = %stage.name, suite = %suite, "[dry-run] Would run verification suite");
        Ok(())
    }
}
