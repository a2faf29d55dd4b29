use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatehouse_core::{AssignmentId, DomainError, Entity, PrincipalId, RoleId, TenantId};

use crate::policy::{EntityAccessPolicy, Protected, RequiredPrivilege};
use crate::privilege::builtin;
use crate::store::StoreError;
use crate::{Privilege, PrivilegeSet};

/// Scope variant of a role.
///
/// All variants share one name namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleVariant {
    /// System-wide; assignments never carry a tenant.
    Global,
    /// Only meaningful inside a tenant; assignments always carry one.
    OrganizationScoped,
    /// Cross-tenant; assignable with or without a tenant.
    GlobalOrganization,
}

impl RoleVariant {
    /// Check that an assignment of this variant may carry `tenant_id`.
    pub fn check_scope(self, tenant_id: Option<TenantId>) -> Result<(), RoleError> {
        let ok = match self {
            RoleVariant::Global => tenant_id.is_none(),
            RoleVariant::OrganizationScoped => tenant_id.is_some(),
            RoleVariant::GlobalOrganization => true,
        };
        if ok {
            Ok(())
        } else {
            Err(RoleError::InvalidScopeForRoleVariant {
                variant: self,
                tenant_id,
            })
        }
    }
}

impl core::fmt::Display for RoleVariant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RoleVariant::Global => write!(f, "Global"),
            RoleVariant::OrganizationScoped => write!(f, "OrganizationScoped"),
            RoleVariant::GlobalOrganization => write!(f, "GlobalOrganization"),
        }
    }
}

/// Named bundle of privileges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub category: String,
    pub privileges: PrivilegeSet,
    pub removable: bool,
    pub variant: RoleVariant,
}

impl Role {
    /// Add privileges. Returns `true` if anything changed.
    pub fn grant<'a>(&mut self, privileges: impl IntoIterator<Item = &'a Privilege>) -> bool {
        privileges
            .into_iter()
            .fold(false, |changed, p| self.privileges.insert(p.clone()) | changed)
    }

    /// Remove privileges. Returns `true` if anything changed.
    pub fn revoke<'a>(&mut self, privileges: impl IntoIterator<Item = &'a Privilege>) -> bool {
        privileges
            .into_iter()
            .fold(false, |changed, p| self.privileges.remove(p) | changed)
    }
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> RoleId {
        self.id
    }
}

impl Protected for Role {
    const ENTITY_TYPE: &'static str = "role";

    fn access_policy() -> EntityAccessPolicy {
        EntityAccessPolicy::new(
            Self::ENTITY_TYPE,
            RequiredPrivilege::Privilege(builtin::CAN_READ_BACKEND),
            RequiredPrivilege::Privilege(builtin::CAN_MANAGE_USER_ROLES),
        )
    }

    fn scope_tenant(&self) -> Option<TenantId> {
        None
    }
}

/// Input for role creation (the store assigns the id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub category: String,
    pub variant: RoleVariant,
    pub privileges: PrivilegeSet,
    pub removable: bool,
}

impl NewRole {
    /// A removable role, as created by administrators.
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        variant: RoleVariant,
        privileges: PrivilegeSet,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            variant,
            privileges,
            removable: true,
        }
    }

    /// A non-removable role, as created by system bootstrap.
    pub fn system(mut self) -> Self {
        self.removable = false;
        self
    }

    pub fn validate(&self) -> Result<(), RoleError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("role name cannot be empty").into());
        }
        Ok(())
    }
}

/// Binding of a role to a principal (or to every member of a tenant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: AssignmentId,
    /// `None` means "default for every principal active in the tenant".
    pub principal_id: Option<PrincipalId>,
    pub role_id: RoleId,
    /// `None` means global scope.
    pub tenant_id: Option<TenantId>,
}

impl RoleAssignment {
    pub fn is_tenant_default(&self) -> bool {
        self.principal_id.is_none()
    }
}

impl Entity for RoleAssignment {
    type Id = AssignmentId;

    fn id(&self) -> AssignmentId {
        self.id
    }
}

impl Protected for RoleAssignment {
    const ENTITY_TYPE: &'static str = "user_role";

    fn access_policy() -> EntityAccessPolicy {
        EntityAccessPolicy::new(
            Self::ENTITY_TYPE,
            RequiredPrivilege::Privilege(builtin::CAN_READ_USER_DATA),
            RequiredPrivilege::Privilege(builtin::CAN_MANAGE_USER_ROLES),
        )
    }

    fn scope_tenant(&self) -> Option<TenantId> {
        self.tenant_id
    }
}

/// Input for an assignment (the store assigns the id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NewAssignment {
    pub principal_id: Option<PrincipalId>,
    pub role_id: RoleId,
    pub tenant_id: Option<TenantId>,
}

impl NewAssignment {
    /// Validate the scope against the role's variant and build the row input.
    pub fn for_role(
        principal_id: Option<PrincipalId>,
        role: &Role,
        tenant_id: Option<TenantId>,
    ) -> Result<Self, RoleError> {
        role.variant.check_scope(tenant_id)?;
        Ok(Self {
            principal_id,
            role_id: role.id,
            tenant_id,
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleError {
    #[error("role name '{0}' is already taken")]
    DuplicateName(String),

    #[error("{variant} role cannot be assigned with tenant {tenant_id:?}")]
    InvalidScopeForRoleVariant {
        variant: RoleVariant,
        tenant_id: Option<TenantId>,
    },

    #[error("role {0} not found")]
    UnknownRole(RoleId),

    #[error("privilege '{0}' is already in use")]
    PrivilegeNameInUse(Privilege),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
