//! In-memory implementation of the engine's storage contracts.
//!
//! Intended for tests/dev. Role privileges are kept as encoded column strings,
//! exactly as a relational backend stores them, so the rename path exercises
//! the same bulk rewrite a database migration would.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use gatehouse_auth::{
    AssignmentStore, CredentialToken, NewAssignment, NewRole, Privilege, PrivilegeSet, Role,
    RoleAssignment, RoleStore, RoleVariant, StoreError, Tenant, TenantRepository, TokenStore,
    rename_encoded, token::NewToken,
};
use gatehouse_core::{AssignmentId, Entity, PrincipalId, RoleId, TenantId, TokenId};

/// Role table row: privileges as the encoded `(A)(B)` column.
#[derive(Debug, Clone)]
struct RoleRow {
    id: RoleId,
    name: String,
    category: String,
    privileges: String,
    removable: bool,
    variant: RoleVariant,
}

impl RoleRow {
    fn from_role(role: &Role) -> Self {
        Self {
            id: role.id,
            name: role.name.clone(),
            category: role.category.clone(),
            privileges: role.privileges.encode(),
            removable: role.removable,
            variant: role.variant,
        }
    }

    fn to_role(&self) -> Result<Role, StoreError> {
        let privileges = PrivilegeSet::decode(&self.privileges).map_err(|e| {
            StoreError::Storage(format!("role {} has a corrupt privilege column: {e}", self.id))
        })?;
        Ok(Role {
            id: self.id,
            name: self.name.clone(),
            category: self.category.clone(),
            privileges,
            removable: self.removable,
            variant: self.variant,
        })
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

#[derive(Debug)]
pub struct InMemoryAuthStore {
    roles: RwLock<BTreeMap<RoleId, RoleRow>>,
    assignments: RwLock<BTreeMap<AssignmentId, RoleAssignment>>,
    tokens: RwLock<BTreeMap<TokenId, CredentialToken>>,
    tenants: RwLock<BTreeMap<TenantId, Tenant>>,
    next_id: AtomicI64,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self {
            roles: RwLock::new(BTreeMap::new()),
            assignments: RwLock::new(BTreeMap::new()),
            tokens: RwLock::new(BTreeMap::new()),
            tenants: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The stored encoded privilege column of a role.
    pub fn encoded_privileges(&self, role_id: RoleId) -> Result<Option<String>, StoreError> {
        let roles = self.roles.read().map_err(poisoned)?;
        Ok(roles.get(&role_id).map(|row| row.privileges.clone()))
    }

    pub fn assignment_count(&self) -> Result<usize, StoreError> {
        Ok(self.assignments.read().map_err(poisoned)?.len())
    }
}

impl Default for InMemoryAuthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleStore for InMemoryAuthStore {
    fn insert_role(&self, role: NewRole) -> Result<Role, StoreError> {
        let mut roles = self.roles.write().map_err(poisoned)?;
        if roles.values().any(|row| row.name == role.name) {
            return Err(StoreError::Conflict(format!("role name '{}' exists", role.name)));
        }

        let role = Role {
            id: RoleId::new(self.next_id()),
            name: role.name,
            category: role.category,
            privileges: role.privileges,
            removable: role.removable,
            variant: role.variant,
        };
        roles.insert(role.id(), RoleRow::from_role(&role));
        Ok(role)
    }

    fn get_role(&self, role_id: RoleId) -> Result<Option<Role>, StoreError> {
        let roles = self.roles.read().map_err(poisoned)?;
        roles.get(&role_id).map(RoleRow::to_role).transpose()
    }

    fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let roles = self.roles.read().map_err(poisoned)?;
        roles
            .values()
            .find(|row| row.name == name)
            .map(RoleRow::to_role)
            .transpose()
    }

    fn get_roles(&self, role_ids: &[RoleId]) -> Result<Vec<Role>, StoreError> {
        let roles = self.roles.read().map_err(poisoned)?;
        role_ids
            .iter()
            .filter_map(|id| roles.get(id))
            .map(RoleRow::to_role)
            .collect()
    }

    fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let roles = self.roles.read().map_err(poisoned)?;
        roles.values().map(RoleRow::to_role).collect()
    }

    fn modify_role(
        &self,
        role_id: RoleId,
        apply: &mut dyn FnMut(&mut Role) -> bool,
    ) -> Result<Option<bool>, StoreError> {
        let mut roles = self.roles.write().map_err(poisoned)?;
        let Some(row) = roles.get_mut(&role_id) else {
            return Ok(None);
        };

        let mut role = row.to_role()?;
        let changed = apply(&mut role);
        if changed {
            *row = RoleRow::from_role(&role);
        }
        Ok(Some(changed))
    }

    fn delete_role_if_removable(&self, role_id: RoleId) -> Result<bool, StoreError> {
        let mut roles = self.roles.write().map_err(poisoned)?;
        match roles.get(&role_id) {
            Some(row) if row.removable => {
                roles.remove(&role_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn rename_privilege(&self, old: &Privilege, new: &Privilege) -> Result<usize, StoreError> {
        let mut roles = self.roles.write().map_err(poisoned)?;

        // Compute every rewrite before touching any row so a corrupt column
        // leaves the table unchanged.
        let mut rewrites = Vec::new();
        for row in roles.values() {
            let current = PrivilegeSet::decode(&row.privileges)
                .map_err(|e| StoreError::Storage(format!("role {}: {e}", row.id)))?;
            if current.contains(new) {
                return Err(StoreError::Conflict(format!(
                    "privilege '{new}' already present in role '{}'",
                    row.name
                )));
            }
            if let Some(encoded) = rename_encoded(&row.privileges, old, new)
                .map_err(|e| StoreError::Storage(format!("role {}: {e}", row.id)))?
            {
                rewrites.push((row.id, encoded));
            }
        }

        let count = rewrites.len();
        for (id, encoded) in rewrites {
            if let Some(row) = roles.get_mut(&id) {
                row.privileges = encoded;
            }
        }
        Ok(count)
    }
}

impl AssignmentStore for InMemoryAuthStore {
    fn insert_assignment(&self, assignment: NewAssignment) -> Result<RoleAssignment, StoreError> {
        let mut rows = self.assignments.write().map_err(poisoned)?;
        if let Some(existing) = rows.values().find(|row| {
            row.principal_id == assignment.principal_id
                && row.role_id == assignment.role_id
                && row.tenant_id == assignment.tenant_id
        }) {
            return Ok(existing.clone());
        }

        let row = RoleAssignment {
            id: AssignmentId::new(self.next_id()),
            principal_id: assignment.principal_id,
            role_id: assignment.role_id,
            tenant_id: assignment.tenant_id,
        };
        rows.insert(row.id(), row.clone());
        Ok(row)
    }

    fn delete_assignment(&self, assignment_id: AssignmentId) -> Result<bool, StoreError> {
        let mut rows = self.assignments.write().map_err(poisoned)?;
        Ok(rows.remove(&assignment_id).is_some())
    }

    fn assignments_for_principal(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Vec<RoleAssignment>, StoreError> {
        let rows = self.assignments.read().map_err(poisoned)?;
        Ok(rows
            .values()
            .filter(|row| row.principal_id == Some(principal_id))
            .cloned()
            .collect())
    }

    fn tenant_defaults(&self, tenant_ids: &[TenantId]) -> Result<Vec<RoleAssignment>, StoreError> {
        let rows = self.assignments.read().map_err(poisoned)?;
        Ok(rows
            .values()
            .filter(|row| {
                row.principal_id.is_none()
                    && row.tenant_id.is_some_and(|t| tenant_ids.contains(&t))
            })
            .cloned()
            .collect())
    }

    fn delete_assignments_for_principal(
        &self,
        principal_id: PrincipalId,
    ) -> Result<usize, StoreError> {
        let mut rows = self.assignments.write().map_err(poisoned)?;
        let before = rows.len();
        rows.retain(|_, row| row.principal_id != Some(principal_id));
        Ok(before - rows.len())
    }

    fn delete_assignments_for_tenant(&self, tenant_id: TenantId) -> Result<usize, StoreError> {
        let mut rows = self.assignments.write().map_err(poisoned)?;
        let before = rows.len();
        rows.retain(|_, row| row.tenant_id != Some(tenant_id));
        Ok(before - rows.len())
    }

    fn delete_assignments_for_role(&self, role_id: RoleId) -> Result<usize, StoreError> {
        let mut rows = self.assignments.write().map_err(poisoned)?;
        let before = rows.len();
        rows.retain(|_, row| row.role_id != role_id);
        Ok(before - rows.len())
    }
}

impl TokenStore for InMemoryAuthStore {
    fn insert_token(&self, token: NewToken) -> Result<CredentialToken, StoreError> {
        let mut tokens = self.tokens.write().map_err(poisoned)?;
        if tokens
            .values()
            .any(|t| t.principal_id == token.principal_id && t.secret == token.secret)
        {
            return Err(StoreError::Conflict(format!(
                "duplicate secret for principal {}",
                token.principal_id
            )));
        }

        let token = CredentialToken {
            id: TokenId::new(self.next_id()),
            principal_id: token.principal_id,
            secret: token.secret,
            kind: token.kind,
            created_at: token.created_at,
            expires_at: token.expires_at,
            used: false,
        };
        tokens.insert(token.id(), token.clone());
        Ok(token)
    }

    fn find_token(
        &self,
        principal_id: PrincipalId,
        secret: &str,
    ) -> Result<Option<CredentialToken>, StoreError> {
        let tokens = self.tokens.read().map_err(poisoned)?;
        Ok(tokens
            .values()
            .find(|t| t.principal_id == principal_id && t.secret == secret)
            .cloned())
    }

    fn mark_used(&self, token_id: TokenId) -> Result<bool, StoreError> {
        let mut tokens = self.tokens.write().map_err(poisoned)?;
        let token = tokens
            .get_mut(&token_id)
            .ok_or_else(|| StoreError::NotFound(format!("token {token_id}")))?;
        if token.used {
            return Ok(false);
        }
        token.used = true;
        Ok(true)
    }
}

impl TenantRepository for InMemoryAuthStore {
    fn get_tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>, StoreError> {
        let tenants = self.tenants.read().map_err(poisoned)?;
        Ok(tenants.get(&tenant_id).cloned())
    }

    fn save_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let mut tenants = self.tenants.write().map_err(poisoned)?;
        tenants.insert(tenant.id(), tenant.clone());
        Ok(())
    }

    fn delete_tenant(&self, tenant_id: TenantId) -> Result<bool, StoreError> {
        let mut tenants = self.tenants.write().map_err(poisoned)?;
        Ok(tenants.remove(&tenant_id).is_some())
    }
}
