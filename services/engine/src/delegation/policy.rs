//! IAM Policy Documents
//!
//! Serializable policy documents in the IAM JSON shape, plus the Route 53
//! action, condition-key and record-type vocabulary used by delegation grants.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// IAM policy language version
pub const POLICY_VERSION: &str = "2012-10-17";

/// Route 53 / STS action names
pub mod actions {
    /// Zone discovery by name; cannot be resource-scoped
    pub const LIST_HOSTED_ZONES_BY_NAME: &str = "route53:ListHostedZonesByName";
    /// Read a hosted zone
    pub const GET_HOSTED_ZONE: &str = "route53:GetHostedZone";
    /// Create/update/delete record sets in a zone
    pub const CHANGE_RESOURCE_RECORD_SETS: &str = "route53:ChangeResourceRecordSets";
    /// Assume a cross-account role
    pub const ASSUME_ROLE: &str = "sts:AssumeRole";
}

/// Route 53 condition keys
pub mod condition_keys {
    pub const NORMALIZED_RECORD_NAMES: &str = "route53:ChangeResourceRecordSetsNormalizedRecordNames";
    pub const RECORD_TYPES: &str = "route53:ChangeResourceRecordSetsRecordTypes";
    pub const ACTIONS: &str = "route53:ChangeResourceRecordSetsActions";
}

/// Exact-match set operator; every requested value must be in the list
pub const FOR_ALL_VALUES_STRING_EQUALS: &str = "ForAllValues:StringEquals";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// DNS record types addressable through `ChangeResourceRecordSets`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Ns,
    Soa,
    Txt,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Mx => "MX",
            RecordType::Ns => "NS",
            RecordType::Soa => "SOA",
            RecordType::Txt => "TXT",
        }
    }
}

/// Change batch actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Create,
    Upsert,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "CREATE",
            ChangeAction::Upsert => "UPSERT",
            ChangeAction::Delete => "DELETE",
        }
    }
}

/// Principal block of a trust policy statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "AWS")]
    pub aws: String,
}

impl Principal {
    /// Principal for every identity in `account` (`arn:<partition>:iam::<account>:root`)
    pub fn account(partition: &str, account: &str) -> Self {
        Self {
            aws: format!("arn:{}:iam::{}:root", partition, account),
        }
    }
}

/// Condition operator -> condition key -> allowed values
pub type Conditions = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// A single policy statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Sid", skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Principal", skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(rename = "Action")]
    pub actions: Vec<String>,
    #[serde(rename = "Resource", default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(rename = "Condition", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: Conditions,
}

impl PolicyStatement {
    /// Start an `Allow` statement with no actions
    pub fn allow() -> Self {
        Self {
            sid: None,
            effect: Effect::Allow,
            principal: None,
            actions: Vec::new(),
            resources: Vec::new(),
            conditions: BTreeMap::new(),
        }
    }

    pub fn sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn action(mut self, action: &str) -> Self {
        self.actions.push(action.to_string());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    /// Add (or replace) the values for `key` under `operator`
    pub fn condition<I, S>(mut self, operator: &str, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions
            .entry(operator.to_string())
            .or_default()
            .insert(key.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Values bound to a condition key, if present
    pub fn condition_values(&self, operator: &str, key: &str) -> Option<&[String]> {
        self.conditions
            .get(operator)
            .and_then(|keys| keys.get(key))
            .map(Vec::as_slice)
    }
}

/// A versioned policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statements,
        }
    }

    /// Find a statement by its Sid
    pub fn statement(&self, sid: &str) -> Option<&PolicyStatement> {
        self.statements.iter().find(|s| s.sid.as_deref() == Some(sid))
    }

    /// Every action granted by any statement
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.statements
            .iter()
            .flat_map(|s| s.actions.iter().map(String::as_str))
    }
}
