//! Deployment Pipeline Orchestrator
//!
//! Turns the registry's environments into an ordered, gated topology:
//!
//! ```text
//! wave 0: SharedLayer (shared account, all delegation grants)
//! wave 1: MealPlannerAppStaging  -> post: StagingVerification
//! wave 2: MealPlannerAppProd     <- pre:  ProdApproval
//! ```
//!
//! Every environment stage depends on the shared stage and on every stage of
//! the wave before it. Wiring comes only from the stage's own grant.

use tracing::{debug, info};

use super::types::{
    DeploymentStage, Gate, PipelineSettings, PipelineTopology, StageWiring, TopologyBuilder, TopologyStrategy, Wave,
};
use crate::environment::{DeploymentClass, ProjectEnvironment};
use crate::error::{Result, TopologyError};
use crate::registry::SharedResourceRegistry;

/// Builds a [`PipelineTopology`] over a populated registry
pub struct PipelineOrchestrator<'a> {
    registry: &'a SharedResourceRegistry,
    settings: &'a PipelineSettings,
}

impl<'a> PipelineOrchestrator<'a> {
    pub fn new(registry: &'a SharedResourceRegistry, settings: &'a PipelineSettings) -> Self {
        Self { registry, settings }
    }

    /// Build and validate the topology
    pub fn build(&self) -> Result<PipelineTopology> {
        let shared_name = self.settings.shared_stage_name.as_str();
        let shared = self.registry.shared();
        let shared_stage = DeploymentStage::new(shared_name, shared_name, DeploymentClass::Shared)
            .in_account(&shared.account, &shared.region);

        let mut builder = TopologyBuilder::new(self.settings.strategy, shared_name)
            .wave(Wave::new("Shared").with_stage(shared_stage));
        let mut previous: Vec<String> = vec![shared_name.to_string()];

        for (index, group) in self.group_environments()?.into_iter().enumerate() {
            let mut wave = Wave::new(format!("Deploy{}", index + 1));
            for env in group {
                let stage = self.environment_stage(env, &previous)?;
                debug!(stage = %stage.name, wave = %wave.name, class = %stage.class, "Scheduled stage");
                wave = wave.with_stage(stage);
            }
            previous = wave.stage_names().map(str::to_string).collect();
            builder = builder.wave(wave);
        }

        let topology = builder.build()?;
        info!(
            strategy = %topology.strategy,
            waves = topology.waves.len(),
            stages = topology.stages().count(),
            "Pipeline topology built"
        );
        Ok(topology)
    }

    /// Environments per wave, preserving input order
    fn group_environments(&self) -> Result<Vec<Vec<&'a ProjectEnvironment>>> {
        let mut groups: Vec<Vec<&ProjectEnvironment>> = Vec::new();
        for env in self.registry.environments() {
            let class = env.effective_class();
            if class == DeploymentClass::Shared {
                return Err(TopologyError::configuration(format!(
                    "environment '{}' cannot use the shared class",
                    env.name
                )));
            }
            let joins_last = self.settings.strategy == TopologyStrategy::WaveParallel
                && groups
                    .last()
                    .and_then(|g| g.last())
                    .is_some_and(|last| last.effective_class() == class);
            match groups.last_mut() {
                Some(group) if joins_last => group.push(env),
                _ => groups.push(vec![env]),
            }
        }
        Ok(groups)
    }

    fn environment_stage(&self, env: &ProjectEnvironment, previous: &[String]) -> Result<DeploymentStage> {
        let grant = self.registry.require_grant(&env.name)?;
        let class = env.effective_class();

        let mut stage = DeploymentStage::new(
            format!("{}{}", self.settings.stage_name_prefix, env.name),
            &env.name,
            class,
        )
        .in_account(&grant.trusting_account, &env.region)
        .with_wiring(StageWiring::from(grant))
        .depends_on(&self.settings.shared_stage_name);

        for dependency in previous {
            stage = stage.depends_on(dependency);
        }

        stage = match class {
            DeploymentClass::Production => stage.pre_gate(Gate::approval(format!("{}Approval", env.name))),
            _ => stage.post_gate(Gate::verification(
                format!("{}Verification", env.name),
                &self.settings.verification_suite,
            )),
        };
        Ok(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fixtures;

    #[test]
    fn test_staging_before_prod() {
        let registry = fixtures::registry(vec![fixtures::staging(), fixtures::prod()]);
        let topology = PipelineOrchestrator::new(&registry, &PipelineSettings::default())
            .build()
            .unwrap();

        assert_eq!(
            topology.execution_order(),
            vec!["SharedLayer", "MealPlannerAppStaging", "MealPlannerAppProd"]
        );
        assert!(topology.wave_of("MealPlannerAppStaging") < topology.wave_of("MealPlannerAppProd"));

        let prod = topology.stage("MealPlannerAppProd").unwrap();
        assert_eq!(prod.pre_gates, vec![Gate::approval("ProdApproval")]);
        assert!(prod.depends_on.contains(&"MealPlannerAppStaging".to_string()));

        let staging = topology.stage("MealPlannerAppStaging").unwrap();
        assert!(!staging.has_approval());
        assert_eq!(staging.post_gates, vec![Gate::verification("StagingVerification", "e2e")]);
    }

    #[test]
    fn test_every_stage_depends_on_shared_layer() {
        let registry = fixtures::registry(vec![fixtures::staging(), fixtures::prod()]);
        let topology = PipelineOrchestrator::new(&registry, &PipelineSettings::default())
            .build()
            .unwrap();

        assert_eq!(topology.waves[0].stages[0].class, DeploymentClass::Shared);
        assert_eq!(topology.waves[0].stages[0].account, "211125587522");
        for stage in topology.stages().filter(|s| s.class != DeploymentClass::Shared) {
            assert!(stage.depends_on.contains(&"SharedLayer".to_string()));
        }
    }

    #[test]
    fn test_wiring_comes_from_own_grant() {
        let registry = fixtures::registry(vec![fixtures::staging(), fixtures::prod()]);
        let topology = PipelineOrchestrator::new(&registry, &PipelineSettings::default())
            .build()
            .unwrap();

        let prod = topology.stage("MealPlannerAppProd").unwrap();
        let wiring = prod.wiring.as_ref().unwrap();
        assert_eq!(wiring.normalized_domain.as_str(), "example.com");
        assert_eq!(
            wiring.trust_credential_reference,
            "arn:aws:iam::211125587522:role/ProdHostedZoneDelegationRole"
        );
        assert_eq!(prod.account, "654654503876");

        let staging = topology.stage("MealPlannerAppStaging").unwrap();
        assert_eq!(
            staging.wiring.as_ref().unwrap().normalized_domain.as_str(),
            "staging.example.com"
        );
    }

    #[test]
    fn test_wave_parallel_groups_consecutive_classes() {
        let qa = ProjectEnvironment::new("Qa", "111111111111", "us-east-1").with_subdomain("qa");
        let registry = fixtures::registry(vec![fixtures::staging(), qa, fixtures::prod()]);
        let settings = PipelineSettings {
            strategy: TopologyStrategy::WaveParallel,
            ..PipelineSettings::default()
        };
        let topology = PipelineOrchestrator::new(&registry, &settings).build().unwrap();

        assert_eq!(topology.waves.len(), 3);
        assert_eq!(
            topology.waves[1].stage_names().collect::<Vec<_>>(),
            vec!["MealPlannerAppStaging", "MealPlannerAppQa"]
        );
        let prod = topology.stage("MealPlannerAppProd").unwrap();
        assert!(prod.depends_on.contains(&"MealPlannerAppQa".to_string()));
        assert!(prod.depends_on.contains(&"MealPlannerAppStaging".to_string()));
    }

    #[test]
    fn test_serial_gives_one_stage_per_wave() {
        let qa = ProjectEnvironment::new("Qa", "111111111111", "us-east-1").with_subdomain("qa");
        let registry = fixtures::registry(vec![fixtures::staging(), qa, fixtures::prod()]);
        let topology = PipelineOrchestrator::new(&registry, &PipelineSettings::default())
            .build()
            .unwrap();

        assert_eq!(topology.waves.len(), 4);
        assert!(topology.waves.iter().all(|w| w.stages.len() == 1));
    }

    #[test]
    fn test_staging_only_pipeline() {
        let registry = fixtures::registry(vec![fixtures::staging()]);
        let topology = PipelineOrchestrator::new(&registry, &PipelineSettings::default())
            .build()
            .unwrap();

        assert_eq!(topology.execution_order(), vec!["SharedLayer", "MealPlannerAppStaging"]);
        assert!(topology.stages().all(|s| !s.has_approval()));
    }

    #[test]
    fn test_shared_class_environment_rejected() {
        let bogus = ProjectEnvironment::new("Tools", "1", "us-east-1")
            .with_subdomain("tools")
            .with_class(DeploymentClass::Shared);
        let registry = fixtures::registry(vec![bogus]);
        let err = PipelineOrchestrator::new(&registry, &PipelineSettings::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, TopologyError::Configuration(_)));
    }

    #[test]
    fn test_custom_stage_prefix() {
        let registry = fixtures::registry(vec![fixtures::staging()]);
        let settings = PipelineSettings {
            stage_name_prefix: "Recipes".to_string(),
            ..PipelineSettings::default()
        };
        let topology = PipelineOrchestrator::new(&registry, &settings).build().unwrap();
        assert!(topology.stage("RecipesStaging").is_some());
    }
}
