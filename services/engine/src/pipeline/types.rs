//! Pipeline Topology Types
//!
//! Stages, gates and waves of a deployment pipeline. A topology is built
//! through consuming builders and validated before anything runs.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::delegation::{DelegationGrant, NormalizedDomain};
use crate::environment::DeploymentClass;
use crate::error::{Result, TopologyError};

/// How environment stages are grouped into waves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyStrategy {
    /// One environment stage per wave, in input order
    #[default]
    Serial,
    /// Consecutive environments of the same class share a wave
    WaveParallel,
}

impl std::fmt::Display for TopologyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyStrategy::Serial => write!(f, "serial"),
            TopologyStrategy::WaveParallel => write!(f, "wave_parallel"),
        }
    }
}

/// Naming and strategy settings for the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub strategy: TopologyStrategy,
    /// Prepended to the environment name to form the stage name
    pub stage_name_prefix: String,
    /// Name of the wave-0 stage that materializes the delegation grants
    pub shared_stage_name: String,
    /// Suite run by verification gates
    pub verification_suite: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            strategy: TopologyStrategy::Serial,
            stage_name_prefix: "MealPlannerApp".to_string(),
            shared_stage_name: "SharedLayer".to_string(),
            verification_suite: "e2e".to_string(),
        }
    }
}

/// A condition checked before or after a stage deploys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Gate {
    /// Blocks until an operator approves
    ManualApproval { name: String },
    /// Runs a verification suite against the deployed stage
    Verification { name: String, suite: String },
}

impl Gate {
    pub fn approval(name: impl Into<String>) -> Self {
        Gate::ManualApproval { name: name.into() }
    }

    pub fn verification(name: impl Into<String>, suite: impl Into<String>) -> Self {
        Gate::Verification {
            name: name.into(),
            suite: suite.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Gate::ManualApproval { name } | Gate::Verification { name, .. } => name,
        }
    }

    pub fn is_approval(&self) -> bool {
        matches!(self, Gate::ManualApproval { .. })
    }
}

/// Values a stage receives from its own delegation grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageWiring {
    pub trust_credential_reference: String,
    pub normalized_domain: NormalizedDomain,
    pub zone_identifier: String,
}

impl From<&DelegationGrant> for StageWiring {
    fn from(grant: &DelegationGrant) -> Self {
        Self {
            trust_credential_reference: grant.trust_credential_reference().to_string(),
            normalized_domain: grant.normalized_domain.clone(),
            zone_identifier: grant.zone_id().to_string(),
        }
    }
}

/// One deployable unit bound to a single account and region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStage {
    pub name: String,
    /// Environment the stage deploys; the shared stage uses its own name
    pub environment: String,
    pub class: DeploymentClass,
    pub account: String,
    pub region: String,
    /// Grant wiring; absent only on the shared stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wiring: Option<StageWiring>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub pre_gates: Vec<Gate>,
    #[serde(default)]
    pub post_gates: Vec<Gate>,
}

impl DeploymentStage {
    pub fn new(name: impl Into<String>, environment: impl Into<String>, class: DeploymentClass) -> Self {
        Self {
            name: name.into(),
            environment: environment.into(),
            class,
            account: String::new(),
            region: String::new(),
            wiring: None,
            depends_on: Vec::new(),
            pre_gates: Vec::new(),
            post_gates: Vec::new(),
        }
    }

    /// Target account and region
    pub fn in_account(mut self, account: impl Into<String>, region: impl Into<String>) -> Self {
        self.account = account.into();
        self.region = region.into();
        self
    }

    pub fn with_wiring(mut self, wiring: StageWiring) -> Self {
        self.wiring = Some(wiring);
        self
    }

    /// Add a dependency edge; repeated names are ignored
    pub fn depends_on(mut self, stage: impl Into<String>) -> Self {
        let stage = stage.into();
        if !self.depends_on.contains(&stage) {
            self.depends_on.push(stage);
        }
        self
    }

    pub fn pre_gate(mut self, gate: Gate) -> Self {
        self.pre_gates.push(gate);
        self
    }

    pub fn post_gate(mut self, gate: Gate) -> Self {
        self.post_gates.push(gate);
        self
    }

    pub fn has_approval(&self) -> bool {
        self.pre_gates.iter().any(Gate::is_approval)
    }
}

/// Stages that may run concurrently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    pub name: String,
    pub stages: Vec<DeploymentStage>,
}

impl Wave {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn with_stage(mut self, stage: DeploymentStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name.as_str())
    }
}

/// Ordered waves of stages; waves run strictly in sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTopology {
    pub strategy: TopologyStrategy,
    /// Stage every environment stage must depend on
    pub shared_stage: String,
    pub waves: Vec<Wave>,
}

impl PipelineTopology {
    pub fn stages(&self) -> impl Iterator<Item = &DeploymentStage> {
        self.waves.iter().flat_map(|w| w.stages.iter())
    }

    pub fn stage(&self, name: &str) -> Option<&DeploymentStage> {
        self.stages().find(|s| s.name == name)
    }

    /// Index of the wave containing `name`
    pub fn wave_of(&self, name: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|w| w.stages.iter().any(|s| s.name == name))
    }

    /// Stage names in execution order
    pub fn execution_order(&self) -> Vec<&str> {
        self.stages().map(|s| s.name.as_str()).collect()
    }

    /// Check ordering, gating and the parent-delegation edge of every stage
    pub fn validate(&self) -> Result<()> {
        let mut wave_index: HashMap<&str, usize> = HashMap::new();
        for (index, wave) in self.waves.iter().enumerate() {
            if wave.stages.is_empty() {
                return Err(TopologyError::sequencing(format!("wave '{}' has no stages", wave.name)));
            }
            if self.strategy == TopologyStrategy::Serial && wave.stages.len() > 1 {
                return Err(TopologyError::sequencing(format!(
                    "serial topology wave '{}' holds {} stages",
                    wave.name,
                    wave.stages.len()
                )));
            }
            for stage in &wave.stages {
                if wave_index.insert(stage.name.as_str(), index).is_some() {
                    return Err(TopologyError::sequencing(format!("duplicate stage name '{}'", stage.name)));
                }
            }
        }

        let mut environments = HashSet::new();
        for (index, wave) in self.waves.iter().enumerate() {
            for stage in &wave.stages {
                if stage.class != DeploymentClass::Shared && !environments.insert(stage.environment.as_str()) {
                    return Err(TopologyError::sequencing(format!(
                        "environment '{}' is deployed by more than one stage",
                        stage.environment
                    )));
                }
                self.validate_stage(stage, index, &wave_index)?;
            }
        }

        Ok(())
    }

    fn validate_stage(&self, stage: &DeploymentStage, index: usize, wave_index: &HashMap<&str, usize>) -> Result<()> {
        if stage.class != DeploymentClass::Shared && !stage.depends_on.iter().any(|d| *d == self.shared_stage) {
            return Err(TopologyError::PropagationDependency {
                stage: stage.name.clone(),
                dependency: self.shared_stage.clone(),
            });
        }

        for dependency in &stage.depends_on {
            match wave_index.get(dependency.as_str()) {
                None => {
                    return Err(TopologyError::sequencing(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        stage.name, dependency
                    )))
                }
                Some(&dep_index) if dep_index >= index => {
                    return Err(TopologyError::sequencing(format!(
                        "stage '{}' depends on '{}', which does not run in an earlier wave",
                        stage.name, dependency
                    )))
                }
                Some(_) => {}
            }
        }

        match (stage.class, stage.has_approval()) {
            (DeploymentClass::Production, false) => Err(TopologyError::sequencing(format!(
                "production stage '{}' has no manual approval gate",
                stage.name
            ))),
            (DeploymentClass::Production, true) => Ok(()),
            (_, true) => Err(TopologyError::sequencing(format!(
                "non-production stage '{}' carries a manual approval gate",
                stage.name
            ))),
            (_, false) => Ok(()),
        }
    }
}

/// Consuming builder for [`PipelineTopology`]
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    strategy: TopologyStrategy,
    shared_stage: String,
    waves: Vec<Wave>,
}

impl TopologyBuilder {
    pub fn new(strategy: TopologyStrategy, shared_stage: impl Into<String>) -> Self {
        Self {
            strategy,
            shared_stage: shared_stage.into(),
            waves: Vec::new(),
        }
    }

    pub fn wave(mut self, wave: Wave) -> Self {
        self.waves.push(wave);
        self
    }

    /// Finish and validate the topology
    pub fn build(self) -> Result<PipelineTopology> {
        let topology = PipelineTopology {
            strategy: self.strategy,
            shared_stage: self.shared_stage,
            waves: self.waves,
        };
        topology.validate()?;
        Ok(topology)
    }
}
