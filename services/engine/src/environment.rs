//! Project Environments
//!
//! Descriptors for the named deployment targets (staging, production, ...)
//! and the shared account that owns the parent hosted zone.

use serde::{Deserialize, Serialize};

/// Deployment class of an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentClass {
    /// Pre-production; verified automatically after deploy
    Staging,
    /// Production; blocked behind a manual approval
    Production,
    /// The shared account hosting the parent zone and delegation roles
    Shared,
}

impl std::fmt::Display for DeploymentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentClass::Staging => write!(f, "staging"),
            DeploymentClass::Production => write!(f, "production"),
            DeploymentClass::Shared => write!(f, "shared"),
        }
    }
}

/// A named deployment environment in its own cloud account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEnvironment {
    /// Unique environment name (e.g., "Staging", "Prod")
    pub name: String,
    /// Target account id; falls back to the default trust account when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Target region (e.g., "us-east-1")
    pub region: String,
    /// Subdomain label(s) under the root domain; absent means the apex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    /// Explicit class tag; inferred from the name when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<DeploymentClass>,
}

impl ProjectEnvironment {
    /// Create an environment with no subdomain and an inferred class
    pub fn new(name: impl Into<String>, account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account: Some(account.into()),
            region: region.into(),
            subdomain: None,
            class: None,
        }
    }

    /// Set the subdomain
    pub fn with_subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = Some(subdomain.into());
        self
    }

    /// Tag the environment with an explicit class
    pub fn with_class(mut self, class: DeploymentClass) -> Self {
        self.class = Some(class);
        self
    }

    /// Clear the account so the default trust account is used
    pub fn without_account(mut self) -> Self {
        self.account = None;
        self
    }

    /// Account id, treating an empty string as absent
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref().map(str::trim).filter(|a| !a.is_empty())
    }

    /// Subdomain, treating an empty string as absent
    pub fn subdomain(&self) -> Option<&str> {
        self.subdomain.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Class used for gating: the explicit tag, or production for names
    /// starting with "prod"
    pub fn effective_class(&self) -> DeploymentClass {
        if let Some(class) = self.class {
            return class;
        }
        if self.name.to_ascii_lowercase().starts_with("prod") {
            DeploymentClass::Production
        } else {
            DeploymentClass::Staging
        }
    }

    pub fn is_production(&self) -> bool {
        self.effective_class() == DeploymentClass::Production
    }
}

/// The shared account that owns the parent zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedEnvironment {
    pub account: String,
    pub region: String,
}
