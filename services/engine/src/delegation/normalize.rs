//! Domain Normalizer
//!
//! Maps an environment's optional subdomain plus the root domain to the one
//! canonical record name the environment may delegate.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TopologyError};

/// Fully-qualified record name owned by exactly one environment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedDomain(String);

impl NormalizedDomain {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this domain is the root itself (the environment owns the apex)
    pub fn is_apex_of(&self, root_domain: &str) -> bool {
        self.0 == canonical_name(root_domain)
    }
}

impl std::fmt::Display for NormalizedDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedDomain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lowercase a DNS name and strip surrounding whitespace and separators
pub fn canonical_name(name: &str) -> String {
    name.trim().trim_matches('.').to_ascii_lowercase()
}

/// Build the normalized domain for a subdomain under `root_domain`.
///
/// An absent or empty subdomain yields the root domain itself.
pub fn normalize(root_domain: &str, subdomain: Option<&str>) -> NormalizedDomain {
    let root = canonical_name(root_domain);
    match subdomain.map(canonical_name) {
        Some(sub) if !sub.is_empty() => NormalizedDomain(format!("{}.{}", sub, root)),
        _ => NormalizedDomain(root),
    }
}

/// Whether `domain` equals `root` or is a label-aligned descendant of it
pub fn is_within(domain: &str, root: &str) -> bool {
    let domain = canonical_name(domain);
    let root = canonical_name(root);
    if root.is_empty() {
        return false;
    }
    domain == root
        || domain
            .strip_suffix(root.as_str())
            .map(|prefix| prefix.ends_with('.') && prefix.len() > 1)
            .unwrap_or(false)
}

/// Validate that `domain` is exactly one concrete name inside `root`.
pub(crate) fn scoped_domain(domain: &str, root: &str) -> Result<NormalizedDomain> {
    let name = canonical_name(domain);

    if name.is_empty() {
        return Err(TopologyError::scope(domain, "empty domain"));
    }
    if name.contains('*') {
        return Err(TopologyError::scope(domain, "wildcards are not allowed in a delegation scope"));
    }
    if name.split('.').any(|label| label.is_empty()) {
        return Err(TopologyError::scope(domain, "domain contains an empty label"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_' || *c == '.'))
    {
        return Err(TopologyError::scope(domain, format!("invalid character '{}'", c)));
    }
    if !is_within(&name, root) {
        return Err(TopologyError::scope(
            domain,
            format!("outside root domain '{}'", canonical_name(root)),
        ));
    }

    Ok(NormalizedDomain(name))
}
