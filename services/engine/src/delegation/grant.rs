//! Delegation Authorization Builder
//!
//! Builds the bidirectional grant that lets one environment's account manage
//! only the NS delegation records for its own normalized domain:
//!
//! - a cross-account role in the shared account, assumable by the
//!   environment's account, whose record-name condition lists exactly one
//!   domain;
//! - a counter-grant on the parent zone limited to `UPSERT`/`DELETE` of `NS`
//!   records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use super::normalize::{normalize, scoped_domain, NormalizedDomain};
use super::policy::{
    actions, condition_keys, ChangeAction, PolicyDocument, PolicyStatement, Principal, RecordType,
    FOR_ALL_VALUES_STRING_EQUALS,
};
use crate::environment::ProjectEnvironment;
use crate::error::{Result, TopologyError};
use crate::registry::ParentZone;

/// Sid of the unrestricted discovery statement
pub const DISCOVERY_SID: &str = "ListHostedZonesByName";
/// Sid of the record-name scoped statement
pub const SCOPED_SID: &str = "GetHostedZoneAndChangeResourceRecordSets";
/// Sid of the parent-zone counter-grant statement
pub const COUNTER_GRANT_SID: &str = "DelegateNameServerRecords";

/// Naming and partition settings for delegation roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantSettings {
    /// Cloud partition used in ARNs
    pub partition: String,
    /// Appended to the environment name to form the role name
    pub role_name_suffix: String,
    /// Name of the role's inline policy
    pub inline_policy_name: String,
}

impl Default for GrantSettings {
    fn default() -> Self {
        Self {
            partition: "aws".to_string(),
            role_name_suffix: "HostedZoneDelegationRole".to_string(),
            inline_policy_name: "crossAccountPolicy".to_string(),
        }
    }
}

/// Cross-account role assumed by the environment's account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRole {
    pub role_name: String,
    /// ARN of the role; this is the trust credential reference handed to the stage
    pub role_arn: String,
    pub trust_policy: PolicyDocument,
    pub inline_policy_name: String,
    pub inline_policy: PolicyDocument,
}

/// Grant attached on the parent-zone side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentZoneCounterGrant {
    pub zone_id: String,
    pub allowed_record_types: BTreeSet<RecordType>,
    pub allowed_actions: BTreeSet<ChangeAction>,
    pub policy: PolicyDocument,
}

/// Least-privilege delegation grant for one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationGrant {
    pub environment_name: String,
    pub trusting_account: String,
    pub normalized_domain: NormalizedDomain,
    /// Unscoped discovery actions (zone lookup by name)
    pub discovery_actions: BTreeSet<String>,
    /// Actions restricted to `normalized_domain`
    pub scoped_actions: BTreeSet<String>,
    pub role: DelegationRole,
    pub parent_zone_counter_grant: ParentZoneCounterGrant,
}

impl DelegationGrant {
    /// Trust credential reference (the delegation role ARN)
    pub fn trust_credential_reference(&self) -> &str {
        &self.role.role_arn
    }

    /// Record-name allow-list of the scoped statement
    pub fn record_name_condition(&self) -> &[String] {
        self.role
            .inline_policy
            .statement(SCOPED_SID)
            .and_then(|s| {
                s.condition_values(FOR_ALL_VALUES_STRING_EQUALS, condition_keys::NORMALIZED_RECORD_NAMES)
            })
            .unwrap_or(&[])
    }

    pub fn zone_id(&self) -> &str {
        &self.parent_zone_counter_grant.zone_id
    }
}

/// Builds delegation grants against one parent zone
#[derive(Debug, Clone)]
pub struct DelegationAuthorizationBuilder {
    root_domain: String,
    parent_zone: ParentZone,
    shared_account: String,
    default_trust_account: String,
    settings: GrantSettings,
}

impl DelegationAuthorizationBuilder {
    /// Create a builder for roles living in `shared_account`.
    ///
    /// The default trust account starts out as the shared account.
    pub fn new(root_domain: &str, parent_zone: ParentZone, shared_account: &str) -> Self {
        Self {
            root_domain: super::normalize::canonical_name(root_domain),
            parent_zone,
            shared_account: shared_account.to_string(),
            default_trust_account: shared_account.to_string(),
            settings: GrantSettings::default(),
        }
    }

    /// Account trusted when an environment has none of its own
    pub fn with_default_trust_account(mut self, account: &str) -> Self {
        self.default_trust_account = account.to_string();
        self
    }

    pub fn with_settings(mut self, settings: GrantSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn root_domain(&self) -> &str {
        &self.root_domain
    }

    /// Build the grant for `env`'s own normalized domain
    pub fn build_grant(&self, env: &ProjectEnvironment) -> Result<DelegationGrant> {
        let domain = normalize(&self.root_domain, env.subdomain());
        self.build_grant_for_domain(env, domain.as_str())
    }

    /// Build a grant scoped to an explicitly supplied domain.
    ///
    /// Fails with [`TopologyError::AuthorizationScope`] unless `domain` is a
    /// single concrete name within the root domain.
    pub fn build_grant_for_domain(&self, env: &ProjectEnvironment, domain: &str) -> Result<DelegationGrant> {
        if env.name.trim().is_empty() {
            return Err(TopologyError::configuration("environment name must not be empty"));
        }

        let normalized_domain = scoped_domain(domain, &self.root_domain)?;

        let trusting_account = env
            .account()
            .unwrap_or(self.default_trust_account.as_str())
            .to_string();
        if trusting_account.is_empty() {
            return Err(TopologyError::configuration(format!(
                "environment '{}' has no account and no default trust account is configured",
                env.name
            )));
        }

        let partition = &self.settings.partition;
        let role_name = format!("{}{}", env.name, self.settings.role_name_suffix);
        let role_arn = format!("arn:{}:iam::{}:role/{}", partition, self.shared_account, role_name);

        let trust_policy = PolicyDocument::new(vec![PolicyStatement::allow()
            .principal(Principal::account(partition, &trusting_account))
            .action(actions::ASSUME_ROLE)]);

        let discovery = PolicyStatement::allow()
            .sid(DISCOVERY_SID)
            .action(actions::LIST_HOSTED_ZONES_BY_NAME)
            .resource("*");

        let scoped = PolicyStatement::allow()
            .sid(SCOPED_SID)
            .action(actions::GET_HOSTED_ZONE)
            .action(actions::CHANGE_RESOURCE_RECORD_SETS)
            .resource(self.parent_zone.arn.as_str())
            .condition(
                FOR_ALL_VALUES_STRING_EQUALS,
                condition_keys::NORMALIZED_RECORD_NAMES,
                [normalized_domain.as_str()],
            );

        let allowed_record_types = BTreeSet::from([RecordType::Ns]);
        let allowed_actions = BTreeSet::from([ChangeAction::Upsert, ChangeAction::Delete]);

        let counter_grant = PolicyStatement::allow()
            .sid(COUNTER_GRANT_SID)
            .action(actions::CHANGE_RESOURCE_RECORD_SETS)
            .resource(self.parent_zone.arn.as_str())
            .condition(
                FOR_ALL_VALUES_STRING_EQUALS,
                condition_keys::RECORD_TYPES,
                allowed_record_types.iter().map(RecordType::as_str),
            )
            .condition(
                FOR_ALL_VALUES_STRING_EQUALS,
                condition_keys::ACTIONS,
                // UPSERT before DELETE, matching the change-batch order
                [ChangeAction::Upsert, ChangeAction::Delete].iter().map(ChangeAction::as_str),
            );

        let inline_policy = PolicyDocument::new(vec![discovery, scoped]);

        debug!(
            environment = %env.name,
            domain = %normalized_domain,
            role = %role_name,
            trusting_account = %trusting_account,
            "Built delegation grant"
        );

        Ok(DelegationGrant {
            environment_name: env.name.clone(),
            trusting_account,
            normalized_domain,
            discovery_actions: BTreeSet::from([actions::LIST_HOSTED_ZONES_BY_NAME.to_string()]),
            scoped_actions: BTreeSet::from([
                actions::GET_HOSTED_ZONE.to_string(),
                actions::CHANGE_RESOURCE_RECORD_SETS.to_string(),
            ]),
            role: DelegationRole {
                role_name,
                role_arn,
                trust_policy,
                inline_policy_name: self.settings.inline_policy_name.clone(),
                inline_policy,
            },
            parent_zone_counter_grant: ParentZoneCounterGrant {
                zone_id: self.parent_zone.zone_id.clone(),
                allowed_record_types,
                allowed_actions,
                policy: PolicyDocument::new(vec![counter_grant]),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> ParentZone {
        ParentZone::new("Z0712659E60WG40V5EW7", "example.com", "aws")
    }

    fn builder() -> DelegationAuthorizationBuilder {
        DelegationAuthorizationBuilder::new("example.com", zone(), "211125587522")
    }

    fn staging() -> ProjectEnvironment {
        ProjectEnvironment::new("Staging", "381491920629", "us-east-1").with_subdomain("staging")
    }

    #[test]
    fn test_record_name_condition_is_exact() {
        let grant = builder().build_grant(&staging()).unwrap();

        assert_eq!(grant.record_name_condition(), &["staging.example.com".to_string()]);
        assert!(grant.record_name_condition().iter().all(|d| !d.contains('*')));
        assert_eq!(grant.normalized_domain.as_str(), "staging.example.com");
    }

    #[test]
    fn test_condition_never_names_another_environment() {
        let b = builder();
        let staging = b.build_grant(&staging()).unwrap();
        let prod = b
            .build_grant(&ProjectEnvironment::new("Prod", "654654503876", "us-east-1"))
            .unwrap();

        assert_eq!(prod.record_name_condition(), &["example.com".to_string()]);
        assert!(!staging
            .record_name_condition()
            .contains(&prod.normalized_domain.to_string()));
        assert!(!prod
            .record_name_condition()
            .contains(&staging.normalized_domain.to_string()));
    }

    #[test]
    fn test_counter_grant_is_ns_upsert_delete_only() {
        let grant = builder().build_grant(&staging()).unwrap();
        let counter = &grant.parent_zone_counter_grant;

        assert_eq!(counter.allowed_record_types, BTreeSet::from([RecordType::Ns]));
        assert_eq!(
            counter.allowed_actions,
            BTreeSet::from([ChangeAction::Upsert, ChangeAction::Delete])
        );

        let statement = counter.policy.statement(COUNTER_GRANT_SID).unwrap();
        assert_eq!(statement.actions, vec![actions::CHANGE_RESOURCE_RECORD_SETS.to_string()]);
        assert_eq!(statement.resources, vec![zone().arn]);
        assert_eq!(
            statement.condition_values(FOR_ALL_VALUES_STRING_EQUALS, condition_keys::RECORD_TYPES),
            Some(&["NS".to_string()][..])
        );
        assert_eq!(
            statement.condition_values(FOR_ALL_VALUES_STRING_EQUALS, condition_keys::ACTIONS),
            Some(&["UPSERT".to_string(), "DELETE".to_string()][..])
        );
        assert_eq!(counter.policy.actions().count(), 1);
    }

    #[test]
    fn test_inline_policy_statements() {
        let grant = builder().build_grant(&staging()).unwrap();
        let policy = &grant.role.inline_policy;

        let discovery = policy.statement(DISCOVERY_SID).unwrap();
        assert_eq!(discovery.resources, vec!["*".to_string()]);
        assert!(discovery.conditions.is_empty());

        let scoped = policy.statement(SCOPED_SID).unwrap();
        assert_eq!(scoped.resources, vec!["arn:aws:route53:::hostedzone/Z0712659E60WG40V5EW7".to_string()]);
        assert_eq!(
            grant.scoped_actions,
            BTreeSet::from([
                "route53:GetHostedZone".to_string(),
                "route53:ChangeResourceRecordSets".to_string()
            ])
        );
        assert_eq!(grant.role.inline_policy_name, "crossAccountPolicy");
    }

    #[test]
    fn test_trust_principal_and_fallback() {
        let b = builder().with_default_trust_account("999999999999");

        let grant = b.build_grant(&staging()).unwrap();
        assert_eq!(grant.trusting_account, "381491920629");
        assert_eq!(
            grant.role.trust_policy.statements[0].principal,
            Some(Principal::account("aws", "381491920629"))
        );

        let unprovisioned = b.build_grant(&staging().without_account()).unwrap();
        assert_eq!(unprovisioned.trusting_account, "999999999999");
    }

    #[test]
    fn test_role_naming_and_arn() {
        let grant = builder().build_grant(&staging()).unwrap();
        assert_eq!(grant.role.role_name, "StagingHostedZoneDelegationRole");
        assert_eq!(
            grant.trust_credential_reference(),
            "arn:aws:iam::211125587522:role/StagingHostedZoneDelegationRole"
        );

        let custom = builder().with_settings(GrantSettings {
            role_name_suffix: "DelegateRole".to_string(),
            ..GrantSettings::default()
        });
        assert_eq!(custom.build_grant(&staging()).unwrap().role.role_name, "StagingDelegateRole");
    }

    #[test]
    fn test_build_is_idempotent() {
        let b = builder();
        assert_eq!(b.build_grant(&staging()).unwrap(), b.build_grant(&staging()).unwrap());
        assert_eq!(
            serde_json::to_string(&b.build_grant(&staging()).unwrap()).unwrap(),
            serde_json::to_string(&b.build_grant(&staging()).unwrap()).unwrap()
        );
    }

    #[test]
    fn test_scope_outside_root_is_rejected() {
        let err = builder().build_grant_for_domain(&staging(), "other.org").unwrap_err();
        assert!(matches!(err, TopologyError::AuthorizationScope { .. }));

        let err = builder()
            .build_grant_for_domain(&staging(), "*.example.com")
            .unwrap_err();
        assert!(matches!(err, TopologyError::AuthorizationScope { .. }));
    }

    #[test]
    fn test_explicit_domain_within_root() {
        let grant = builder()
            .build_grant_for_domain(&staging(), "api.staging.example.com")
            .unwrap();
        assert_eq!(grant.record_name_condition(), &["api.staging.example.com".to_string()]);
    }

    #[test]
    fn test_missing_trust_account_is_configuration_error() {
        let b = builder().with_default_trust_account("");
        let err = b.build_grant(&staging().without_account()).unwrap_err();
        assert!(matches!(err, TopologyError::Configuration(_)));
    }
}
