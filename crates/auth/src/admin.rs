//! Role and assignment administration.

use std::sync::Arc;

use gatehouse_core::{AssignmentId, DomainError, PrincipalId, RoleId, TenantId};

use crate::privilege::builtin;
use crate::resolver::ResolvedAuthority;
use crate::role::{NewAssignment, NewRole, Role, RoleAssignment, RoleError, RoleVariant};
use crate::store::{AssignmentStore, RoleStore, StoreError};
use crate::{Privilege, PrivilegeCatalog, PrivilegeSet};

/// Names of the non-removable roles seeded at bootstrap.
pub mod system_roles {
    pub const ADMIN: &str = "ROLE_ADMIN";
    pub const ORG_ADMIN: &str = "ROLE_ORG_ADMIN";
    pub const ORG_MEMBER: &str = "ROLE_ORG_MEMBER";
    pub const USER: &str = "ROLE_USER";
}

#[derive(Debug)]
pub struct RoleAdmin<S> {
    store: Arc<S>,
}

impl<S> RoleAdmin<S>
where
    S: RoleStore + AssignmentStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Seed the system roles. Existing roles with the same names are kept
    /// untouched, so this is safe on every start.
    pub fn bootstrap_system_roles(&self) -> Result<Vec<Role>, RoleError> {
        use builtin::*;

        let all: PrivilegeSet = PrivilegeCatalog::builtin().iter().map(|d| d.privilege.clone()).collect();
        let seeds = [
            NewRole::new(system_roles::ADMIN, "system", RoleVariant::Global, all),
            NewRole::new(
                system_roles::ORG_ADMIN,
                "organization",
                RoleVariant::OrganizationScoped,
                [
                    CAN_READ_ORG_DATA,
                    CAN_MANAGE_ORG_DATA,
                    CAN_READ_USER_DATA,
                    CAN_MANAGE_USER_DATA,
                    CAN_READ_ORG_AUDIT,
                ]
                .into_iter()
                .collect(),
            ),
            NewRole::new(
                system_roles::ORG_MEMBER,
                "organization",
                RoleVariant::OrganizationScoped,
                [CAN_READ_ORG_DATA].into_iter().collect(),
            ),
            NewRole::new(
                system_roles::USER,
                "user",
                RoleVariant::GlobalOrganization,
                PrivilegeSet::new(),
            ),
        ];

        let mut roles = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let role = match self.store.find_role_by_name(&seed.name)? {
                Some(existing) => existing,
                None => self.create_role(seed.system())?,
            };
            roles.push(role);
        }
        Ok(roles)
    }

    pub fn create_role(&self, role: NewRole) -> Result<Role, RoleError> {
        role.validate()?;
        let name = role.name.clone();
        let role = self.store.insert_role(role).map_err(|err| match err {
            StoreError::Conflict(_) => RoleError::DuplicateName(name),
            other => other.into(),
        })?;
        tracing::info!(role_id = %role.id, name = %role.name, variant = %role.variant, "role created");
        Ok(role)
    }

    /// Returns `true` if the role gained at least one privilege.
    pub fn grant_privileges(&self, role_id: RoleId, privileges: &[Privilege]) -> Result<bool, RoleError> {
        let changed = self
            .store
            .modify_role(role_id, &mut |role| role.grant(privileges))?
            .ok_or(RoleError::UnknownRole(role_id))?;
        if changed {
            tracing::info!(role_id = %role_id, count = privileges.len(), "privileges granted");
        }
        Ok(changed)
    }

    /// Returns `true` if the role lost at least one privilege.
    pub fn revoke_privileges(&self, role_id: RoleId, privileges: &[Privilege]) -> Result<bool, RoleError> {
        let changed = self
            .store
            .modify_role(role_id, &mut |role| role.revoke(privileges))?
            .ok_or(RoleError::UnknownRole(role_id))?;
        if changed {
            tracing::info!(role_id = %role_id, count = privileges.len(), "privileges revoked");
        }
        Ok(changed)
    }

    /// Guarded conditional delete.
    ///
    /// Returns `false` (never an error) when the role is not removable, does
    /// not exist, or the requester lacks the role-management privilege, so the
    /// caller cannot tell those cases apart.
    pub fn delete_role(&self, role_id: RoleId, requester: &ResolvedAuthority) -> Result<bool, StoreError> {
        if !requester.has_global(&builtin::ROLE_MANAGEMENT) {
            tracing::warn!(role_id = %role_id, requester = %requester.principal_id, "role delete refused");
            return Ok(false);
        }

        let removed = self.store.delete_role_if_removable(role_id)?;
        if removed {
            let assignments = self.store.delete_assignments_for_role(role_id)?;
            tracing::info!(role_id = %role_id, assignments, "role deleted");
        } else {
            tracing::warn!(role_id = %role_id, "role delete refused");
        }
        Ok(removed)
    }

    /// Bind a role to a principal, or to every member of a tenant when
    /// `principal_id` is `None`.
    pub fn assign_role(
        &self,
        principal_id: Option<PrincipalId>,
        role_id: RoleId,
        tenant_id: Option<TenantId>,
    ) -> Result<RoleAssignment, RoleError> {
        let role = self
            .store
            .get_role(role_id)?
            .ok_or(RoleError::UnknownRole(role_id))?;

        let assignment = NewAssignment::for_role(principal_id, &role, tenant_id)?;
        let row = self.store.insert_assignment(assignment)?;

        tracing::info!(
            assignment_id = %row.id,
            role = %role.name,
            ?principal_id,
            ?tenant_id,
            "role assigned"
        );
        Ok(row)
    }

    pub fn revoke_assignment(&self, assignment_id: AssignmentId) -> Result<bool, RoleError> {
        let removed = self.store.delete_assignment(assignment_id)?;
        if removed {
            tracing::info!(assignment_id = %assignment_id, "role assignment revoked");
        }
        Ok(removed)
    }

    /// Drop every assignment held by a principal being removed.
    pub fn remove_principal(&self, principal_id: PrincipalId) -> Result<usize, RoleError> {
        let removed = self.store.delete_assignments_for_principal(principal_id)?;
        tracing::info!(principal_id = %principal_id, removed, "principal assignments removed");
        Ok(removed)
    }

    /// Rename a privilege in every stored role.
    ///
    /// `new` must not already appear in any role. Returns the number of roles
    /// rewritten.
    pub fn rename_privilege(&self, old: &Privilege, new: &Privilege) -> Result<usize, RoleError> {
        if old == new {
            return Err(DomainError::validation(format!("privilege '{old}' renamed to itself")).into());
        }

        let rewritten = self.store.rename_privilege(old, new).map_err(|err| match err {
            StoreError::Conflict(_) => RoleError::PrivilegeNameInUse(new.clone()),
            other => other.into(),
        })?;

        tracing::info!(%old, %new, rewritten, "privilege renamed");
        Ok(rewritten)
    }
}
