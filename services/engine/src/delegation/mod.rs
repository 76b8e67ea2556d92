//! Hosted Zone Delegation
//!
//! Per-environment DNS names and the cross-account grants that let an
//! environment delegate exactly that name from the shared parent zone.
//!
//! ## Security
//!
//! - Record-name conditions are exact-match allow-lists, never wildcards
//! - The parent-zone counter-grant covers `NS` records with `UPSERT`/`DELETE`
//!   only; it never grants general zone administration

mod grant;
mod normalize;
pub mod policy;

pub use grant::{
    DelegationAuthorizationBuilder, DelegationGrant, DelegationRole, GrantSettings,
    ParentZoneCounterGrant, COUNTER_GRANT_SID, DISCOVERY_SID, SCOPED_SID,
};
pub use normalize::{canonical_name, is_within, normalize, NormalizedDomain};
pub use policy::{ChangeAction, PolicyDocument, PolicyStatement, RecordType};
