//! Meal Planner Deployment Engine
//!
//! Cross-account DNS delegation grants and the multi-account deployment
//! topology built on them.
//!
//! ## Architecture
//!
//! ```text
//! DeploymentConfig
//!   └─> SharedResourceRegistry   (parent zone + one DelegationGrant per environment)
//!         └─> PipelineOrchestrator   (SharedLayer -> Staging -> [approval] Prod)
//!               └─> PipelineRunner   (apply engine, verification, approvals)
//! ```

pub mod config;
pub mod delegation;
pub mod environment;
pub mod error;
pub mod pipeline;
pub mod registry;

pub use config::DeploymentConfig;
pub use delegation::{normalize, DelegationAuthorizationBuilder, DelegationGrant, NormalizedDomain};
pub use environment::{DeploymentClass, ProjectEnvironment, SharedEnvironment};
pub use error::TopologyError;
pub use pipeline::{PipelineOrchestrator, PipelineRunner, PipelineTopology, TopologyStrategy};
pub use registry::{EnvironmentOutputs, SharedResourceRegistry};
