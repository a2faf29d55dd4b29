use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatehouse_core::{PrincipalId, TenantId};

use crate::privilege::builtin;
use crate::resolver::{PrivilegeResolver, ResolvedAuthority};
use crate::store::{AssignmentStore, RoleStore, StoreError, TenantRepository};
use crate::Privilege;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Read,
    Write,
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Write => write!(f, "write"),
        }
    }
}

/// Privilege an operation demands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredPrivilege {
    /// Always allowed.
    Unrestricted,
    Privilege(Privilege),
}

/// Per entity type requirement for reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityAccessPolicy {
    pub entity_type: &'static str,
    pub read: RequiredPrivilege,
    pub write: RequiredPrivilege,
}

impl EntityAccessPolicy {
    pub const fn new(
        entity_type: &'static str,
        read: RequiredPrivilege,
        write: RequiredPrivilege,
    ) -> Self {
        Self {
            entity_type,
            read,
            write,
        }
    }

    pub fn required(&self, operation: Operation) -> &RequiredPrivilege {
        match operation {
            Operation::Read => &self.read,
            Operation::Write => &self.write,
        }
    }
}

/// A protected entity type.
///
/// The requirement is per type, not per row. Rows only contribute the tenant
/// they are scoped to.
pub trait Protected {
    const ENTITY_TYPE: &'static str;

    fn access_policy() -> EntityAccessPolicy;

    /// Tenant the row is scoped to, if any.
    fn scope_tenant(&self) -> Option<TenantId>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: {operation} on '{entity_type}' requires '{privilege}'")]
    Forbidden {
        entity_type: String,
        operation: Operation,
        privilege: Privilege,
    },

    #[error("tenant {0} is pending removal")]
    TenantPendingRemoval(TenantId),

    #[error("no access policy registered for entity type '{0}'")]
    UnknownEntityType(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Decide one operation against an already resolved authority.
///
/// - No IO
/// - No panics
pub fn authorize(
    authority: &ResolvedAuthority,
    policy: &EntityAccessPolicy,
    operation: Operation,
    tenant_id: Option<TenantId>,
) -> Result<(), AuthzError> {
    let privilege = match policy.required(operation) {
        RequiredPrivilege::Unrestricted => return Ok(()),
        RequiredPrivilege::Privilege(p) => p,
    };

    if authority.has_in_tenant(privilege, tenant_id) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            entity_type: policy.entity_type.to_string(),
            operation,
            privilege: privilege.clone(),
        })
    }
}

/// Lookup table of access policies keyed by entity type.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: HashMap<&'static str, EntityAccessPolicy>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policies for the engine's own entities plus the common host entities.
    pub fn builtin() -> Self {
        use self::RequiredPrivilege::{Privilege as Needs, Unrestricted};

        let mut table = Self::new();
        table.register_type::<crate::role::Role>();
        table.register_type::<crate::role::RoleAssignment>();
        table.register_type::<crate::tenant::Tenant>();
        table.register_type::<crate::token::CredentialToken>();
        table.register(EntityAccessPolicy::new(
            "user",
            Needs(builtin::CAN_READ_USER_DATA),
            Needs(builtin::CAN_MANAGE_USER_DATA),
        ));
        table.register(EntityAccessPolicy::new(
            "audit",
            Needs(builtin::CAN_READ_ORG_AUDIT),
            Needs(builtin::CAN_MANAGE_BACKEND),
        ));
        table.register(EntityAccessPolicy::new(
            "org_data",
            Needs(builtin::CAN_READ_ORG_DATA),
            Needs(builtin::CAN_MANAGE_ORG_DATA),
        ));
        table.register(EntityAccessPolicy::new(
            "global_settings",
            Needs(builtin::CAN_ACCESS_GLOBAL_SETTINGS),
            Needs(builtin::CAN_ACCESS_GLOBAL_SETTINGS),
        ));
        table.register(EntityAccessPolicy::new(
            "frontend_resource",
            Unrestricted,
            Needs(builtin::CAN_MANAGE_BACKEND),
        ));
        table
    }

    /// Register (or replace) a policy.
    pub fn register(&mut self, policy: EntityAccessPolicy) {
        self.policies.insert(policy.entity_type, policy);
    }

    pub fn register_type<T: Protected>(&mut self) {
        self.register(T::access_policy());
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntityAccessPolicy> {
        self.policies.get(entity_type)
    }
}

/// Authorization gate consulted before any storage access.
///
/// Resolves the principal, refuses every operation inside a tenant whose
/// removal is in progress, then applies the entity policy.
#[derive(Debug)]
pub struct AccessGate<S> {
    store: Arc<S>,
    resolver: PrivilegeResolver<S>,
    policies: PolicyTable,
}

impl<S> AccessGate<S>
where
    S: RoleStore + AssignmentStore + TenantRepository,
{
    pub fn new(store: Arc<S>, policies: PolicyTable) -> Self {
        Self {
            resolver: PrivilegeResolver::new(Arc::clone(&store)),
            store,
            policies,
        }
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn authorize(
        &self,
        principal_id: PrincipalId,
        entity_type: &str,
        operation: Operation,
        tenant_id: Option<TenantId>,
    ) -> Result<(), AuthzError> {
        let authority = self.resolver.resolve(principal_id)?;
        self.authorize_with(&authority, entity_type, operation, tenant_id)
    }

    /// Same as [`AccessGate::authorize`] for callers memoizing the authority
    /// within one request.
    pub fn authorize_with(
        &self,
        authority: &ResolvedAuthority,
        entity_type: &str,
        operation: Operation,
        tenant_id: Option<TenantId>,
    ) -> Result<(), AuthzError> {
        let policy = self
            .policies
            .get(entity_type)
            .ok_or_else(|| AuthzError::UnknownEntityType(entity_type.to_string()))?;

        if let Some(tenant_id) = tenant_id {
            self.ensure_tenant_not_pending(tenant_id)?;
        }

        let result = authorize(authority, policy, operation, tenant_id);
        match &result {
            Ok(()) => tracing::debug!(
                principal_id = %authority.principal_id,
                entity_type,
                %operation,
                ?tenant_id,
                "access allowed"
            ),
            Err(err) => tracing::warn!(
                principal_id = %authority.principal_id,
                ?tenant_id,
                "access denied: {err}"
            ),
        }
        result
    }

    /// `Ok(false)` only for an access decision; unknown entity types and
    /// store failures are errors.
    pub fn is_allowed(
        &self,
        principal_id: PrincipalId,
        entity_type: &str,
        operation: Operation,
        tenant_id: Option<TenantId>,
    ) -> Result<bool, AuthzError> {
        match self.authorize(principal_id, entity_type, operation, tenant_id) {
            Ok(()) => Ok(true),
            Err(AuthzError::Forbidden { .. } | AuthzError::TenantPendingRemoval(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Whether the tenant row exists and is mid-removal.
    pub fn tenant_pending_removal(&self, tenant_id: TenantId) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get_tenant(tenant_id)?
            .is_some_and(|tenant| tenant.schema_deleted))
    }

    fn ensure_tenant_not_pending(&self, tenant_id: TenantId) -> Result<(), AuthzError> {
        if self.tenant_pending_removal(tenant_id)? {
            return Err(AuthzError::TenantPendingRemoval(tenant_id));
        }
        Ok(())
    }
}
