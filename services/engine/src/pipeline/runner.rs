//! Pipeline Runner
//!
//! Executes a topology wave by wave. The topology is validated first, so a
//! sequencing or propagation error is returned before any stage deploys.
//!
//! ## Failure semantics
//!
//! - A failed or rejected stage lets its wave siblings finish; no later wave
//!   starts and the remaining stages are reported `not_started`
//! - An abort raised before a stage reaches its gates, or while it waits on
//!   a manual approval, marks it `aborted`
//! - An abort raised mid-deploy lets that stage finish; nothing is rolled back

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::engine::{ApplyEngine, ApprovalDecision, ApprovalGateway, VerificationSuite};
use super::types::{DeploymentStage, Gate, PipelineTopology, TopologyStrategy, Wave};
use crate::error::Result;

/// Raises the abort signal
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiver side of the operator abort signal
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A connected handle and signal
    pub fn channel() -> (AbortHandle, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (AbortHandle { tx }, AbortSignal { rx })
    }

    /// A signal that is never raised
    pub fn never() -> Self {
        Self::channel().1
    }

    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal is raised; never resolves if the handle is
    /// dropped without raising it
    pub async fn raised(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|raised| *raised).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Final state of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    /// Apply engine or verification error, message kept as reported
    Failed { error: String },
    /// Manual approval rejected by the operator
    Rejected { reason: String },
    NotStarted,
    Aborted,
}

impl StageStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub wave: usize,
    #[serde(flatten)]
    pub status: StageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed,
    Aborted,
}

/// Result of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub strategy: TopologyStrategy,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn status_of(&self, stage: &str) -> Option<&StageStatus> {
        self.stages.iter().find(|s| s.name == stage).map(|s| &s.status)
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }
}

/// Drives a topology through the apply engine and its gates
#[derive(Clone)]
pub struct PipelineRunner {
    apply: Arc<dyn ApplyEngine>,
    verification: Arc<dyn VerificationSuite>,
    approvals: Arc<dyn ApprovalGateway>,
}

impl PipelineRunner {
    pub fn new(
        apply: Arc<dyn ApplyEngine>,
        verification: Arc<dyn VerificationSuite>,
        approvals: Arc<dyn ApprovalGateway>,
    ) -> Self {
        Self {
            apply,
            verification,
            approvals,
        }
    }

    /// Validate `topology`, then run it.
    ///
    /// Fails without deploying anything when the topology is invalid.
    pub async fn run(&self, topology: &PipelineTopology, abort: &AbortSignal) -> Result<RunReport> {
        topology.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(run_id = %run_id, strategy = %topology.strategy, waves = topology.waves.len(), "Pipeline run started");

        let mut stages = Vec::new();
        let mut halted: Option<RunOutcome> = None;

        for (index, wave) in topology.waves.iter().enumerate() {
            if halted.is_some() {
                stages.extend(reports(wave, index, |_| StageStatus::NotStarted));
                continue;
            }
            if abort.is_raised() {
                warn!(run_id = %run_id, wave = %wave.name, "Abort raised before wave start");
                stages.extend(reports(wave, index, |_| StageStatus::Aborted));
                halted = Some(RunOutcome::Aborted);
                continue;
            }

            info!(run_id = %run_id, wave = %wave.name, stages = wave.stages.len(), "Starting wave");
            let statuses = match topology.strategy {
                TopologyStrategy::WaveParallel => {
                    join_all(wave.stages.iter().map(|stage| self.run_stage(stage, abort))).await
                }
                TopologyStrategy::Serial => self.run_in_sequence(&wave.stages, abort).await,
            };

            halted = wave_outcome(&statuses);
            stages.extend(
                wave.stages
                    .iter()
                    .zip(statuses)
                    .map(|(stage, status)| StageReport {
                        name: stage.name.clone(),
                        wave: index,
                        status,
                    }),
            );
        }

        let outcome = halted.unwrap_or(RunOutcome::Succeeded);
        info!(run_id = %run_id, outcome = ?outcome, "Pipeline run finished");

        Ok(RunReport {
            run_id,
            strategy: topology.strategy,
            started_at,
            finished_at: Utc::now(),
            stages,
            outcome,
        })
    }

    async fn run_in_sequence(&self, stages: &[DeploymentStage], abort: &AbortSignal) -> Vec<StageStatus> {
        let mut statuses = Vec::with_capacity(stages.len());
        for stage in stages {
            if statuses.iter().any(|s: &StageStatus| !s.is_success()) {
                statuses.push(StageStatus::NotStarted);
                continue;
            }
            statuses.push(self.run_stage(stage, abort).await);
        }
        statuses
    }

    async fn run_stage(&self, stage: &DeploymentStage, abort: &AbortSignal) -> StageStatus {
        if abort.is_raised() {
            return StageStatus::Aborted;
        }

        for gate in &stage.pre_gates {
            if let Some(status) = self.check_gate(stage, gate, abort).await {
                return status;
            }
        }

        if abort.is_raised() {
            warn!(stage = %stage.name, "Abort raised before deploy");
            return StageStatus::Aborted;
        }

        info!(stage = %stage.name, account = %stage.account, region = %stage.region, "Deploying stage");
        if let Err(e) = self.apply.deploy(stage).await {
            error!(stage = %stage.name, error = %e, "Stage deploy failed");
            return StageStatus::Failed {
                error: format!("{:#}", e),
            };
        }

        for gate in &stage.post_gates {
            if let Some(status) = self.check_gate(stage, gate, abort).await {
                return status;
            }
        }

        info!(stage = %stage.name, "Stage succeeded");
        StageStatus::Succeeded
    }

    /// `None` when the gate passes
    async fn check_gate(&self, stage: &DeploymentStage, gate: &Gate, abort: &AbortSignal) -> Option<StageStatus> {
        match gate {
            Gate::ManualApproval { name } => {
                let decision = tokio::select! {
                    decision = self.approvals.await_decision(stage, name) => decision,
                    _ = abort.raised() => {
                        warn!(stage = %stage.name, gate = %name, "Abort raised while awaiting approval");
                        return Some(StageStatus::Aborted);
                    }
                };
                self.approval_status(stage, name, decision)
            }
            Gate::Verification { name, suite } => match self.verification.verify(stage, suite).await {
                Ok(()) => None,
                Err(e) => {
                    error!(stage = %stage.name, gate = %name, error = %e, "Verification failed");
                    Some(StageStatus::Failed {
                        error: format!("{:#}", e),
                    })
                }
            },
        }
    }

    fn approval_status(
        &self,
        stage: &DeploymentStage,
        name: &str,
        decision: anyhow::Result<ApprovalDecision>,
    ) -> Option<StageStatus> {
        match decision {
            Ok(ApprovalDecision::Approved) => {
                info!(stage = %stage.name, gate = %name, "Approval granted");
                None
            }
            Ok(ApprovalDecision::Rejected { reason }) => {
                warn!(stage = %stage.name, gate = %name, reason = %reason, "Approval rejected");
                Some(StageStatus::Rejected { reason })
            }
            Err(e) => Some(StageStatus::Failed {
                error: format!("{:#}", e),
            }),
        }
    }
}

fn reports(wave: &Wave, index: usize, status: impl Fn(&DeploymentStage) -> StageStatus) -> Vec<StageReport> {
    wave.stages
        .iter()
        .map(|stage| StageReport {
            name: stage.name.clone(),
            wave: index,
            status: status(stage),
        })
        .collect()
}

/// Outcome that halts the run after this wave, if any
fn wave_outcome(statuses: &[StageStatus]) -> Option<RunOutcome> {
    if statuses.iter().all(StageStatus::is_success) {
        None
    } else if statuses.iter().all(|s| s.is_success() || *s == StageStatus::Aborted) {
        Some(RunOutcome::Aborted)
    } else {
        Some(RunOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::engine::{AutoApprove, ChannelApprovals, DryRunApplyEngine, DryRunVerification};
    use crate::pipeline::{fixtures, PipelineOrchestrator, PipelineSettings};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::{Barrier, Mutex};

    /// Fails the named stages and optionally raises the abort while deploying
    struct ScriptedEngine {
        failing: HashSet<String>,
        abort_during: Option<(String, AbortHandle)>,
        deployed: Mutex<Vec<String>>,
    }

    impl ScriptedEngine {
        fn failing(stages: &[&str]) -> Self {
            Self {
                failing: stages.iter().map(|s| s.to_string()).collect(),
                abort_during: None,
                deployed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ApplyEngine for ScriptedEngine {
        async fn deploy(&self, stage: &DeploymentStage) -> Result<()> {
            if let Some((name, handle)) = &self.abort_during {
                if *name == stage.name {
                    handle.abort();
                }
            }
            self.deployed.lock().await.push(stage.name.clone());
            if self.failing.contains(&stage.name) {
                anyhow::bail!("stack {} rolled back: quota exceeded", stage.name);
            }
            Ok(())
        }
    }

    /// Every stage waits until `parties` stages are deploying at once
    struct BarrierEngine {
        barrier: Barrier,
    }

    #[async_trait]
    impl ApplyEngine for BarrierEngine {
        async fn deploy(&self, stage: &DeploymentStage) -> Result<()> {
            if stage.class != crate::environment::DeploymentClass::Shared {
                self.barrier.wait().await;
            }
            Ok(())
        }
    }

    fn topology(strategy: TopologyStrategy, environments: Vec<crate::environment::ProjectEnvironment>) -> PipelineTopology {
        let registry = fixtures::registry(environments);
        let settings = PipelineSettings {
            strategy,
            ..PipelineSettings::default()
        };
        PipelineOrchestrator::new(&registry, &settings).build().unwrap()
    }

    fn standard() -> PipelineTopology {
        topology(TopologyStrategy::Serial, vec![fixtures::staging(), fixtures::prod()])
    }

    fn runner(apply: Arc<dyn ApplyEngine>, approvals: Arc<dyn ApprovalGateway>) -> PipelineRunner {
        PipelineRunner::new(apply, Arc::new(DryRunVerification), approvals)
    }

    #[tokio::test]
    async fn test_successful_run_in_order() {
        let engine = Arc::new(DryRunApplyEngine::new());
        let report = runner(engine.clone(), Arc::new(AutoApprove))
            .run(&standard(), &AbortSignal::never())
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(
            engine.deployed().await,
            vec!["SharedLayer", "MealPlannerAppStaging", "MealPlannerAppProd"]
        );
        assert!(report.finished_at >= report.started_at);
        assert_eq!(report.stages[2].wave, 2);
    }

    #[tokio::test]
    async fn test_failure_stops_later_waves() {
        let engine = Arc::new(ScriptedEngine::failing(&["MealPlannerAppStaging"]));
        let report = runner(engine.clone(), Arc::new(AutoApprove))
            .run(&standard(), &AbortSignal::never())
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(
            report.status_of("MealPlannerAppStaging"),
            Some(&StageStatus::Failed {
                error: "stack MealPlannerAppStaging rolled back: quota exceeded".to_string()
            })
        );
        assert_eq!(report.status_of("MealPlannerAppProd"), Some(&StageStatus::NotStarted));
        assert!(!engine.deployed.lock().await.contains(&"MealPlannerAppProd".to_string()));
    }

    #[tokio::test]
    async fn test_rejected_approval_blocks_prod() {
        let (approvals, mut handle) = ChannelApprovals::new(1);
        let engine = Arc::new(DryRunApplyEngine::new());

        let operator = tokio::spawn(async move {
            if let Some(pending) = handle.next().await {
                pending.reject("not today");
            }
        });

        let report = runner(engine.clone(), Arc::new(approvals))
            .run(&standard(), &AbortSignal::never())
            .await
            .unwrap();
        operator.await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(
            report.status_of("MealPlannerAppProd"),
            Some(&StageStatus::Rejected {
                reason: "not today".to_string()
            })
        );
        assert_eq!(engine.deployed().await, vec!["SharedLayer", "MealPlannerAppStaging"]);
    }

    #[tokio::test]
    async fn test_abort_before_run() {
        let (handle, signal) = AbortSignal::channel();
        handle.abort();

        let engine = Arc::new(DryRunApplyEngine::new());
        let report = runner(engine.clone(), Arc::new(AutoApprove)).run(&standard(), &signal).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Aborted);
        assert_eq!(report.status_of("SharedLayer"), Some(&StageStatus::Aborted));
        assert_eq!(report.status_of("MealPlannerAppProd"), Some(&StageStatus::NotStarted));
        assert!(engine.deployed().await.is_empty());
    }

    #[tokio::test]
    async fn test_abort_mid_deploy_completes_stage() {
        let (handle, signal) = AbortSignal::channel();
        let engine = Arc::new(ScriptedEngine {
            failing: HashSet::new(),
            abort_during: Some(("MealPlannerAppStaging".to_string(), handle)),
            deployed: Mutex::new(Vec::new()),
        });

        let report = runner(engine.clone(), Arc::new(AutoApprove)).run(&standard(), &signal).await.unwrap();

        assert_eq!(report.status_of("MealPlannerAppStaging"), Some(&StageStatus::Succeeded));
        assert_eq!(report.status_of("MealPlannerAppProd"), Some(&StageStatus::Aborted));
        assert_eq!(report.outcome, RunOutcome::Aborted);
    }

    #[tokio::test]
    async fn test_wave_parallel_runs_siblings_concurrently() {
        let qa = crate::environment::ProjectEnvironment::new("Qa", "111111111111", "us-east-1").with_subdomain("qa");
        let topology = topology(TopologyStrategy::WaveParallel, vec![fixtures::staging(), qa]);
        let engine = Arc::new(BarrierEngine {
            barrier: Barrier::new(2),
        });

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            runner(engine, Arc::new(AutoApprove)).run(&topology, &AbortSignal::never()),
        )
        .await
        .expect("sibling stages did not run concurrently")
        .unwrap();

        assert!(report.succeeded());
    }

    #[tokio::test]
    async fn test_wave_parallel_sibling_finishes_after_failure() {
        let qa = crate::environment::ProjectEnvironment::new("Qa", "111111111111", "us-east-1").with_subdomain("qa");
        let topology = topology(TopologyStrategy::WaveParallel, vec![fixtures::staging(), qa, fixtures::prod()]);
        let engine = Arc::new(ScriptedEngine::failing(&["MealPlannerAppStaging"]));

        let report = runner(engine, Arc::new(AutoApprove))
            .run(&topology, &AbortSignal::never())
            .await
            .unwrap();

        assert!(matches!(
            report.status_of("MealPlannerAppStaging"),
            Some(StageStatus::Failed { .. })
        ));
        assert_eq!(report.status_of("MealPlannerAppQa"), Some(&StageStatus::Succeeded));
        assert_eq!(report.status_of("MealPlannerAppProd"), Some(&StageStatus::NotStarted));
    }

    #[tokio::test]
    async fn test_invalid_topology_deploys_nothing() {
        let shared = DeploymentStage::new("SharedLayer", "SharedLayer", crate::environment::DeploymentClass::Shared);
        let ungated = DeploymentStage::new("AppProd", "Prod", crate::environment::DeploymentClass::Production);
        let topology = PipelineTopology {
            strategy: TopologyStrategy::Serial,
            shared_stage: "SharedLayer".to_string(),
            waves: vec![
                Wave::new("Shared").with_stage(shared),
                Wave::new("Deploy1").with_stage(ungated),
            ],
        };

        let engine = Arc::new(DryRunApplyEngine::new());
        let err = runner(engine.clone(), Arc::new(AutoApprove))
            .run(&topology, &AbortSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, crate::error::TopologyError::PropagationDependency { .. }));
        assert!(engine.deployed().await.is_empty());

        let mut gated_edge_only = topology.clone();
        gated_edge_only.waves[1].stages[0].depends_on.push("SharedLayer".to_string());
        let err = runner(engine.clone(), Arc::new(AutoApprove))
            .run(&gated_edge_only, &AbortSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, crate::error::TopologyError::PipelineSequencing(_)));
        assert!(engine.deployed().await.is_empty());
    }

    #[tokio::test]
    async fn test_abort_while_awaiting_approval() {
        let (approvals, mut handle) = ChannelApprovals::new(1);
        let (abort, signal) = AbortSignal::channel();
        let engine = Arc::new(DryRunApplyEngine::new());

        // The operator aborts instead of answering and keeps the request open
        let operator = tokio::spawn(async move {
            let pending = handle.next().await;
            abort.abort();
            (pending, handle, abort)
        });

        let report = tokio::time::timeout(
            Duration::from_secs(2),
            runner(engine.clone(), Arc::new(approvals)).run(&standard(), &signal),
        )
        .await
        .expect("abort did not interrupt the pending approval")
        .unwrap();
        let _held = operator.await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Aborted);
        assert_eq!(report.status_of("MealPlannerAppStaging"), Some(&StageStatus::Succeeded));
        assert_eq!(report.status_of("MealPlannerAppProd"), Some(&StageStatus::Aborted));
        assert_eq!(engine.deployed().await, vec!["SharedLayer", "MealPlannerAppStaging"]);
    }

    #[tokio::test]
    async fn test_report_serializes_statuses() {
        let report = runner(Arc::new(ScriptedEngine::failing(&["SharedLayer"])), Arc::new(AutoApprove))
            .run(&standard(), &AbortSignal::never())
            .await
            .unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["stages"][0]["status"], "failed");
        assert_eq!(json["stages"][1]["status"], "not_started");
    }
}
