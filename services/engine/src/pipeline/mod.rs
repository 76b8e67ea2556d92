//! Deployment Pipeline
//!
//! Orders environment stages after the shared delegation layer, attaches
//! their gates and runs the result.
//!
//! ## Architecture
//!
//! ```text
//! SharedResourceRegistry ──> PipelineOrchestrator ──> PipelineTopology
//!                                                          │
//!                       ApplyEngine / VerificationSuite ──>│ PipelineRunner ──> RunReport
//!                                     ApprovalGateway ──> │
//! ```

pub mod engine;
mod orchestrator;
mod runner;
mod types;

pub use engine::{
    ApplyEngine, ApprovalDecision, ApprovalGateway, ApprovalHandle, AutoApprove, ChannelApprovals,
    DryRunApplyEngine, DryRunVerification, PendingApproval, VerificationSuite,
};
pub use orchestrator::PipelineOrchestrator;
pub use runner::{AbortHandle, AbortSignal, PipelineRunner, RunOutcome, RunReport, StageReport, StageStatus};
pub use types::{
    DeploymentStage, Gate, PipelineSettings, PipelineTopology, StageWiring, TopologyBuilder, TopologyStrategy, Wave,
};
