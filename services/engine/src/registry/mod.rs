//! Shared Resource Registry
//!
//! Owns the one parent hosted zone and one delegation grant per environment,
//! built in the shared account and handed to downstream stages by
//! environment name.

mod zone;

pub use zone::{ParentZone, ParentZoneReference, StaticZoneResolver, ZoneResolver};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::DeploymentConfig;
use crate::delegation::{
    canonical_name, is_within, normalize, DelegationAuthorizationBuilder, DelegationGrant,
    GrantSettings, NormalizedDomain,
};
use crate::environment::{ProjectEnvironment, SharedEnvironment};
use crate::error::{Result, TopologyError};

/// IAM role names are limited to 64 characters
const MAX_ROLE_NAME_LEN: usize = 64;

/// What an environment's application layer receives from the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentOutputs {
    pub environment_name: String,
    pub trust_credential_reference: String,
    pub normalized_domain: NormalizedDomain,
    pub zone_identifier: String,
}

impl From<&DelegationGrant> for EnvironmentOutputs {
    fn from(grant: &DelegationGrant) -> Self {
        Self {
            environment_name: grant.environment_name.clone(),
            trust_credential_reference: grant.trust_credential_reference().to_string(),
            normalized_domain: grant.normalized_domain.clone(),
            zone_identifier: grant.zone_id().to_string(),
        }
    }
}

/// Parent zone plus one delegation grant per environment
#[derive(Debug, Clone, Serialize)]
pub struct SharedResourceRegistry {
    root_domain: String,
    shared: SharedEnvironment,
    parent_zone: ParentZone,
    environments: Vec<ProjectEnvironment>,
    grants: Vec<DelegationGrant>,
}

impl SharedResourceRegistry {
    /// Validate the configuration and build every grant.
    ///
    /// Duplicate names or colliding domains fail before any grant is built.
    pub fn build(config: &DeploymentConfig, resolver: &dyn ZoneResolver) -> Result<Self> {
        config.validate()?;

        let root_domain = canonical_name(&config.root_domain);
        let parent_zone = config
            .parent_zone
            .resolve(&root_domain, &config.grants.partition, resolver)?;

        if !is_within(&root_domain, &parent_zone.zone_name) {
            return Err(TopologyError::configuration(format!(
                "root domain '{}' is not within parent zone '{}'",
                root_domain, parent_zone.zone_name
            )));
        }

        validate_environments(&root_domain, &config.environments, &config.grants)?;

        let builder = DelegationAuthorizationBuilder::new(&root_domain, parent_zone.clone(), &config.shared.account)
            .with_default_trust_account(config.default_trust_account())
            .with_settings(config.grants.clone());

        let grants = config
            .environments
            .iter()
            .map(|env| builder.build_grant(env))
            .collect::<Result<Vec<_>>>()?;

        info!(
            zone_id = %parent_zone.zone_id,
            zone_name = %parent_zone.zone_name,
            grants = grants.len(),
            "Shared resource registry built"
        );

        Ok(Self {
            root_domain,
            shared: config.shared.clone(),
            parent_zone,
            environments: config.environments.clone(),
            grants,
        })
    }

    /// Grant for an environment, if one was built
    pub fn grant_for(&self, environment_name: &str) -> Option<&DelegationGrant> {
        self.grants
            .iter()
            .find(|g| g.environment_name == environment_name)
    }

    /// Grant for an environment, or a sequencing error when absent
    pub fn require_grant(&self, environment_name: &str) -> Result<&DelegationGrant> {
        self.grant_for(environment_name).ok_or_else(|| {
            TopologyError::sequencing(format!("no delegation grant for environment '{}'", environment_name))
        })
    }

    pub fn grants(&self) -> &[DelegationGrant] {
        &self.grants
    }

    /// Environments in deployment order
    pub fn environments(&self) -> &[ProjectEnvironment] {
        &self.environments
    }

    pub fn parent_zone(&self) -> &ParentZone {
        &self.parent_zone
    }

    pub fn shared(&self) -> &SharedEnvironment {
        &self.shared
    }

    pub fn root_domain(&self) -> &str {
        &self.root_domain
    }

    /// Per-environment hand-off records, in deployment order
    pub fn outputs(&self) -> Vec<EnvironmentOutputs> {
        self.grants.iter().map(EnvironmentOutputs::from).collect()
    }
}

/// Reject duplicate names, colliding or nested normalized domains, and names
/// that cannot form a valid role name.
pub fn validate_environments(
    root_domain: &str,
    environments: &[ProjectEnvironment],
    settings: &GrantSettings,
) -> Result<()> {
    let mut names: HashMap<String, &str> = HashMap::new();
    let mut domains: HashMap<NormalizedDomain, &str> = HashMap::new();

    for env in environments {
        let name = env.name.as_str();
        if name.trim().is_empty() {
            return Err(TopologyError::configuration("environment name must not be empty"));
        }
        if name.trim() != name {
            return Err(TopologyError::configuration(format!(
                "environment name '{}' has surrounding whitespace",
                name
            )));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || "+=,.@_-".contains(*c)))
        {
            return Err(TopologyError::configuration(format!(
                "environment name '{}' contains invalid character '{}'",
                name, c
            )));
        }
        if name.len() + settings.role_name_suffix.len() > MAX_ROLE_NAME_LEN {
            return Err(TopologyError::configuration(format!(
                "role name for environment '{}' exceeds {} characters",
                name, MAX_ROLE_NAME_LEN
            )));
        }

        // Role names are case-insensitive, so "prod" and "Prod" collide
        if let Some(existing) = names.insert(name.to_ascii_lowercase(), name) {
            return Err(TopologyError::configuration(format!(
                "duplicate environment name '{}' (already defined as '{}')",
                name, existing
            )));
        }

        let domain = normalize(root_domain, env.subdomain());
        if let Some(owner) = domains.get(&domain) {
            return Err(TopologyError::configuration(format!(
                "environments '{}' and '{}' both normalize to '{}'",
                owner, name, domain
            )));
        }
        // A delegated subdomain hides any delegation beneath it; the apex owner is exempt
        if !domain.is_apex_of(root_domain) {
            if let Some((other, owner)) = domains.iter().find(|(other, _)| {
                !other.is_apex_of(root_domain)
                    && (is_within(domain.as_str(), other.as_str()) || is_within(other.as_str(), domain.as_str()))
            }) {
                return Err(TopologyError::configuration(format!(
                    "domain '{}' of environment '{}' overlaps '{}' of environment '{}'",
                    domain, name, other, owner
                )));
            }
        }
        debug!(environment = %name, domain = %domain, "Environment validated");
        domains.insert(domain, name);
    }

    Ok(())
}
