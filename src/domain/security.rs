//! Access Control
//!
//! Object protection records and the capability check consulted at mutation
//! entry points. The loader and the drivers run with system trust and never
//! consult the policy.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity name of the controller itself
pub const SYSTEM_IDENTITY: &str = "SYSTEM";

/// Role of the controller itself
pub const SYSTEM_ROLE: &str = "SYSTEM";

/// Role assigned to unauthenticated actors
pub const PUBLIC_ROLE: &str = "PUBLIC";

/// Default security type of new objects
pub const DEFAULT_SECURITY_TYPE: &str = "PUBLIC";

/// Protection path of the node container
pub const NODES_MAP_PATH: &str = "/sys/controller/nodesMap";

/// Protection path of the resource definition container
pub const RSC_DFN_MAP_PATH: &str = "/sys/controller/rscDfnMap";

/// Protection path of the storage pool container
pub const STOR_POOL_MAP_PATH: &str = "/sys/controller/storPoolMap";

// =============================================================================
// Access Types
// =============================================================================

/// Access level, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessType {
    View,
    Use,
    Change,
    Control,
}

impl AccessType {
    /// Persisted numeric id
    pub fn id(self) -> i64 {
        match self {
            AccessType::View => 1,
            AccessType::Use => 3,
            AccessType::Change => 7,
            AccessType::Control => 15,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(AccessType::View),
            3 => Some(AccessType::Use),
            7 => Some(AccessType::Change),
            15 => Some(AccessType::Control),
            _ => None,
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessType::View => write!(f, "VIEW"),
            AccessType::Use => write!(f, "USE"),
            AccessType::Change => write!(f, "CHANGE"),
            AccessType::Control => write!(f, "CONTROL"),
        }
    }
}

// =============================================================================
// Access Context
// =============================================================================

/// The actor on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    pub identity: String,
    pub role: String,
}

impl AccessContext {
    pub fn new(identity: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            role: role.into(),
        }
    }

    /// The controller's own, fully privileged context
    pub fn system() -> Self {
        Self::new(SYSTEM_IDENTITY, SYSTEM_ROLE)
    }

    pub fn is_system(&self) -> bool {
        self.role == SYSTEM_ROLE
    }
}

// =============================================================================
// Object Protection
// =============================================================================

/// Access control record attached to a top-level object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectProtection {
    pub object_path: String,
    pub creator: String,
    pub owner_role: String,
    pub security_type: String,
    /// Role name -> granted access
    pub acl: BTreeMap<String, AccessType>,
}

impl ObjectProtection {
    /// New protection owned by the creating actor, whose role receives
    /// `CONTROL`
    pub fn new(object_path: impl Into<String>, creator: &AccessContext) -> Self {
        let mut acl = BTreeMap::new();
        acl.insert(creator.role.clone(), AccessType::Control);
        Self {
            object_path: object_path.into(),
            creator: creator.identity.clone(),
            owner_role: creator.role.clone(),
            security_type: DEFAULT_SECURITY_TYPE.to_string(),
            acl,
        }
    }

    /// Container protection granting `CHANGE` to every role
    pub fn container(object_path: impl Into<String>) -> Self {
        let mut protection = Self::new(object_path, &AccessContext::system());
        protection.acl.insert(PUBLIC_ROLE.to_string(), AccessType::Change);
        protection
    }

    /// Strongest access granted to the given role
    pub fn granted(&self, role: &str) -> Option<AccessType> {
        if role == self.owner_role {
            return Some(AccessType::Control);
        }
        let explicit = self.acl.get(role).copied();
        let public = self.acl.get(PUBLIC_ROLE).copied();
        explicit.max(public)
    }

    pub fn node_path(node: &str) -> String {
        format!("/nodes/{}", node)
    }

    pub fn rsc_dfn_path(rsc: &str) -> String {
        format!("/resourcedefinitions/{}", rsc)
    }

    pub fn stor_pool_path(node: &str, pool: &str) -> String {
        format!("/storpools/{}/{}", node, pool)
    }
}

// =============================================================================
// AccessPolicy Trait
// =============================================================================

/// Capability check: "does actor X have permission Y on object Z"
pub trait AccessPolicy: Send + Sync {
    fn require_access(
        &self,
        ctx: &AccessContext,
        protection: &ObjectProtection,
        required: AccessType,
    ) -> Result<()>;
}

/// Owner role and ACL based policy; the system context always passes
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAccessPolicy;

impl AccessPolicy for DefaultAccessPolicy {
    fn require_access(
        &self,
        ctx: &AccessContext,
        protection: &ObjectProtection,
        required: AccessType,
    ) -> Result<()> {
        if ctx.is_system() {
            return Ok(());
        }
        match protection.granted(&ctx.role) {
            Some(granted) if granted >= required => Ok(()),
            _ => Err(Error::AccessDenied {
                identity: ctx.identity.clone(),
                object: protection.object_path.clone(),
                required: required.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_owner_and_acl() {
        let alice = AccessContext::new("alice", "ops");
        let bob = AccessContext::new("bob", "dev");
        let protection = ObjectProtection::new("/resourcedefinitions/RSCA", &alice);
        let policy = DefaultAccessPolicy;

        assert!(policy.require_access(&alice, &protection, AccessType::Control).is_ok());
        assert_matches!(
            policy.require_access(&bob, &protection, AccessType::View),
            Err(Error::AccessDenied { .. })
        );

        let mut shared = protection.clone();
        shared.acl.insert("dev".into(), AccessType::Use);
        assert!(policy.require_access(&bob, &shared, AccessType::Use).is_ok());
        assert!(policy.require_access(&bob, &shared, AccessType::Change).is_err());
    }

    #[test]
    fn test_system_and_containers() {
        let policy = DefaultAccessPolicy;
        let anyone = AccessContext::new("carol", "guest");
        let container = ObjectProtection::container(NODES_MAP_PATH);

        assert!(policy.require_access(&anyone, &container, AccessType::Change).is_ok());
        assert!(policy.require_access(&anyone, &container, AccessType::Control).is_err());

        let private = ObjectProtection::new("/nodes/ALPHA", &AccessContext::new("x", "admin"));
        assert!(policy
            .require_access(&AccessContext::system(), &private, AccessType::Control)
            .is_ok());
    }

    #[test]
    fn test_access_type_ids() {
        for access in [AccessType::View, AccessType::Use, AccessType::Change, AccessType::Control] {
            assert_eq!(AccessType::from_id(access.id()), Some(access));
        }
        assert!(AccessType::View < AccessType::Control);
    }
}
