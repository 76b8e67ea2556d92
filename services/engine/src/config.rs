//! Deployment Configuration
//!
//! One flat, validated struct carrying everything the registry and the
//! orchestrator need: root domain, parent zone, shared account, naming
//! settings and the ordered environment list.
//!
//! Account ids and zone ids are never hardcoded. They are loaded from:
//! - A JSON file (via `DeploymentConfig::from_file()`)
//! - Environment variables (via `DeploymentConfig::from_env()`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use crate::delegation::{canonical_name, GrantSettings};
use crate::environment::{ProjectEnvironment, SharedEnvironment};
use crate::error::TopologyError;
use crate::pipeline::PipelineSettings;
use crate::registry::ParentZoneReference;

const DEFAULT_REGION: &str = "us-east-1";

/// Configuration for synthesizing grants and the deployment topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Root domain every environment domain ends with
    pub root_domain: String,
    /// Parent hosted zone, by id or by name
    pub parent_zone: ParentZoneReference,
    /// Account trusted for environments without one; defaults to the shared account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_trust_account: Option<String>,
    /// Shared account owning the parent zone and the delegation roles
    pub shared: SharedEnvironment,
    #[serde(default)]
    pub grants: GrantSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Known hosted zones (name -> id) for resolving a parent zone by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub zones: BTreeMap<String, String>,
    /// Environments in deployment order
    pub environments: Vec<ProjectEnvironment>,
}

impl DeploymentConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Load configuration from environment variables
    ///
    /// Expected env vars:
    /// - DEPLOY_ROOT_DOMAIN
    /// - DEPLOY_PARENT_ZONE_ID or DEPLOY_PARENT_ZONE_NAME
    /// - DEPLOY_SHARED_ACCOUNT
    /// - DEPLOY_SHARED_REGION (optional, default us-east-1)
    /// - DEPLOY_DEFAULT_ACCOUNT (optional)
    /// - DEPLOY_ENVIRONMENTS (JSON array of environments)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let root_domain = lookup("DEPLOY_ROOT_DOMAIN").context("DEPLOY_ROOT_DOMAIN not set")?;

        let parent_zone = match (lookup("DEPLOY_PARENT_ZONE_ID"), lookup("DEPLOY_PARENT_ZONE_NAME")) {
            (Some(zone_id), zone_name) => ParentZoneReference::ById { zone_id, zone_name },
            (None, Some(zone_name)) => ParentZoneReference::ByName { zone_name },
            (None, None) => anyhow::bail!("DEPLOY_PARENT_ZONE_ID or DEPLOY_PARENT_ZONE_NAME must be set"),
        };

        let environments = lookup("DEPLOY_ENVIRONMENTS").context("DEPLOY_ENVIRONMENTS not set")?;
        let environments: Vec<ProjectEnvironment> =
            serde_json::from_str(&environments).context("DEPLOY_ENVIRONMENTS is not a valid JSON array")?;

        Ok(Self {
            root_domain,
            parent_zone,
            default_trust_account: lookup("DEPLOY_DEFAULT_ACCOUNT"),
            shared: SharedEnvironment {
                account: lookup("DEPLOY_SHARED_ACCOUNT").context("DEPLOY_SHARED_ACCOUNT not set")?,
                region: lookup("DEPLOY_SHARED_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            },
            grants: GrantSettings::default(),
            pipeline: PipelineSettings::default(),
            zones: BTreeMap::new(),
            environments,
        })
    }

    /// Override file values with any DEPLOY_* variables that are set
    pub fn apply_env_overrides(self) -> Self {
        self.overridden_by(|key| env::var(key).ok())
    }

    fn overridden_by(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(root_domain) = lookup("DEPLOY_ROOT_DOMAIN") {
            self.root_domain = root_domain;
        }
        if let Some(zone_id) = lookup("DEPLOY_PARENT_ZONE_ID") {
            self.parent_zone = ParentZoneReference::ById {
                zone_id,
                zone_name: lookup("DEPLOY_PARENT_ZONE_NAME"),
            };
        }
        if let Some(account) = lookup("DEPLOY_SHARED_ACCOUNT") {
            self.shared.account = account;
        }
        if let Some(region) = lookup("DEPLOY_SHARED_REGION") {
            self.shared.region = region;
        }
        if let Some(account) = lookup("DEPLOY_DEFAULT_ACCOUNT") {
            self.default_trust_account = Some(account);
        }
        self
    }

    /// Account trusted by environments that have none of their own
    pub fn default_trust_account(&self) -> &str {
        self.default_trust_account
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or(&self.shared.account)
    }

    /// Check required fields eagerly
    pub fn validate(&self) -> Result<(), TopologyError> {
        if canonical_name(&self.root_domain).is_empty() {
            return Err(TopologyError::configuration("root_domain must not be empty"));
        }
        if self.shared.account.trim().is_empty() {
            return Err(TopologyError::configuration("shared.account must not be empty"));
        }
        if self.environments.is_empty() {
            return Err(TopologyError::configuration("at least one environment is required"));
        }
        for env in &self.environments {
            if env.name.trim().is_empty() {
                return Err(TopologyError::configuration("environment name must not be empty"));
            }
            if env.region.trim().is_empty() {
                return Err(TopologyError::configuration(format!(
                    "environment '{}' has no region",
                    env.name
                )));
            }
        }
        Ok(())
    }
}
