//! Topology Errors
//!
//! Every error here is raised while synthesizing grants or the pipeline
//! topology, before any apply engine is called. None of them are retried.

use thiserror::Error;

/// Errors raised while building delegation grants or the deployment topology
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// Duplicate environment names, colliding domains, or missing required settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A grant was requested for a scope broader than one normalized domain
    #[error("Authorization scope error for '{domain}': {reason}")]
    AuthorizationScope { domain: String, reason: String },

    /// A stage is missing a gate or references a grant/stage that does not exist
    #[error("Pipeline sequencing error: {0}")]
    PipelineSequencing(String),

    /// A stage was scheduled without its parent delegation dependency edge
    #[error("Propagation dependency error: stage '{stage}' does not depend on '{dependency}'")]
    PropagationDependency { stage: String, dependency: String },
}

impl TopologyError {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        TopologyError::Configuration(msg.into())
    }

    pub(crate) fn scope(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        TopologyError::AuthorizationScope {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn sequencing(msg: impl Into<String>) -> Self {
        TopologyError::PipelineSequencing(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TopologyError>;
