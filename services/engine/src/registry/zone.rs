//! Parent Hosted Zone References
//!
//! The parent zone is supplied externally, either by id or by name, and
//! resolved exactly once when the registry is built.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::delegation::canonical_name;
use crate::error::{Result, TopologyError};

/// How the parent hosted zone is identified in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by")]
pub enum ParentZoneReference {
    /// Known zone id; the name defaults to the root domain
    #[serde(rename = "id")]
    ById {
        zone_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        zone_name: Option<String>,
    },
    /// Zone name, looked up through a [`ZoneResolver`]
    #[serde(rename = "name")]
    ByName { zone_name: String },
}

/// A resolved parent hosted zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentZone {
    pub zone_id: String,
    pub zone_name: String,
    pub arn: String,
}

impl ParentZone {
    pub fn new(zone_id: &str, zone_name: &str, partition: &str) -> Self {
        Self {
            zone_id: zone_id.to_string(),
            zone_name: canonical_name(zone_name),
            arn: format!("arn:{}:route53:::hostedzone/{}", partition, zone_id),
        }
    }
}

/// Looks up hosted zone ids by zone name
pub trait ZoneResolver {
    fn zone_id(&self, zone_name: &str) -> Option<String>;
}

/// Resolver over a fixed name -> id map
#[derive(Debug, Clone, Default)]
pub struct StaticZoneResolver {
    zones: BTreeMap<String, String>,
}

impl StaticZoneResolver {
    pub fn new(zones: &BTreeMap<String, String>) -> Self {
        Self {
            zones: zones
                .iter()
                .map(|(name, id)| (canonical_name(name), id.clone()))
                .collect(),
        }
    }

    pub fn with_zone(mut self, zone_name: &str, zone_id: &str) -> Self {
        self.zones.insert(canonical_name(zone_name), zone_id.to_string());
        self
    }
}

impl ZoneResolver for StaticZoneResolver {
    fn zone_id(&self, zone_name: &str) -> Option<String> {
        self.zones.get(&canonical_name(zone_name)).cloned()
    }
}

impl ParentZoneReference {
    /// Resolve to a concrete zone. `root_domain` names an id-only zone.
    pub fn resolve(&self, root_domain: &str, partition: &str, resolver: &dyn ZoneResolver) -> Result<ParentZone> {
        match self {
            ParentZoneReference::ById { zone_id, zone_name } => {
                if zone_id.trim().is_empty() {
                    return Err(TopologyError::configuration("parent zone id must not be empty"));
                }
                let name = zone_name.as_deref().unwrap_or(root_domain);
                Ok(ParentZone::new(zone_id.trim(), name, partition))
            }
            ParentZoneReference::ByName { zone_name } => {
                let zone_id = resolver.zone_id(zone_name).ok_or_else(|| {
                    TopologyError::configuration(format!("no hosted zone found for name '{}'", zone_name))
                })?;
                Ok(ParentZone::new(&zone_id, zone_name, partition))
            }
        }
    }
}
