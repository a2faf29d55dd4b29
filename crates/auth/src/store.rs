//! Persistence collaborator contracts.
//!
//! The engine never talks to a database directly. Hosts implement these traits
//! over their storage; `gatehouse-infra` ships in-memory implementations.

use thiserror::Error;

use gatehouse_core::{AssignmentId, DatastoreId, PrincipalId, RoleId, TenantId, TokenId};

use crate::role::{NewAssignment, NewRole, Role, RoleAssignment};
use crate::tenant::Tenant;
use crate::token::{CredentialToken, NewToken};
use crate::Privilege;

/// Storage operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness or state precondition of the write did not hold.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The row addressed by the write does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend failure (connection, poisoned lock, corrupt column).
    #[error("storage error: {0}")]
    Storage(String),
}

pub trait RoleStore: Send + Sync {
    /// Insert a role. Fails with `Conflict` if the name is taken by any variant.
    fn insert_role(&self, role: NewRole) -> Result<Role, StoreError>;

    fn get_role(&self, role_id: RoleId) -> Result<Option<Role>, StoreError>;

    fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError>;

    /// Fetch several roles at once. Missing ids are skipped.
    fn get_roles(&self, role_ids: &[RoleId]) -> Result<Vec<Role>, StoreError>;

    fn list_roles(&self) -> Result<Vec<Role>, StoreError>;

    /// Atomic read-modify-write of one role row.
    ///
    /// `apply` returns whether it changed the role; only then is the row
    /// written back. Returns `None` if the role does not exist.
    fn modify_role(
        &self,
        role_id: RoleId,
        apply: &mut dyn FnMut(&mut Role) -> bool,
    ) -> Result<Option<bool>, StoreError>;

    /// Delete the role only if its `removable` flag is set. Returns whether a
    /// row was deleted.
    fn delete_role_if_removable(&self, role_id: RoleId) -> Result<bool, StoreError>;

    /// Bulk replacement of `(OLD)` by `(NEW)` in every stored privilege set.
    ///
    /// Must be serialized with `modify_role`. Fails with `Conflict` if any role
    /// already holds `new`. Returns the number of rows rewritten.
    fn rename_privilege(&self, old: &Privilege, new: &Privilege) -> Result<usize, StoreError>;
}

pub trait AssignmentStore: Send + Sync {
    /// Insert an assignment; an identical (principal, role, tenant) row is
    /// returned instead of duplicated.
    fn insert_assignment(&self, assignment: NewAssignment) -> Result<RoleAssignment, StoreError>;

    fn delete_assignment(&self, assignment_id: AssignmentId) -> Result<bool, StoreError>;

    /// Rows whose principal is exactly `principal_id`.
    fn assignments_for_principal(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Vec<RoleAssignment>, StoreError>;

    /// Rows with no principal whose tenant is one of `tenant_ids`.
    fn tenant_defaults(&self, tenant_ids: &[TenantId]) -> Result<Vec<RoleAssignment>, StoreError>;

    fn delete_assignments_for_principal(&self, principal_id: PrincipalId)
    -> Result<usize, StoreError>;

    fn delete_assignments_for_tenant(&self, tenant_id: TenantId) -> Result<usize, StoreError>;

    fn delete_assignments_for_role(&self, role_id: RoleId) -> Result<usize, StoreError>;
}

pub trait TokenStore: Send + Sync {
    fn insert_token(&self, token: NewToken) -> Result<CredentialToken, StoreError>;

    /// Lookup by principal and verbatim secret.
    fn find_token(
        &self,
        principal_id: PrincipalId,
        secret: &str,
    ) -> Result<Option<CredentialToken>, StoreError>;

    /// Compare-and-swap `used: false -> true`.
    ///
    /// Returns `true` if this call performed the transition and `false` if the
    /// token was already used. Two concurrent callers never both get `true`.
    fn mark_used(&self, token_id: TokenId) -> Result<bool, StoreError>;
}

pub trait TenantRepository: Send + Sync {
    fn get_tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>, StoreError>;

    /// Insert or update the tenant row.
    fn save_tenant(&self, tenant: &Tenant) -> Result<(), StoreError>;

    fn delete_tenant(&self, tenant_id: TenantId) -> Result<bool, StoreError>;
}

/// Tenant-scoped physical storage (dedicated schema or partition).
pub trait TenantDatastore: Send + Sync {
    /// Drop foreign-key/check constraints of the datastore. Must be idempotent.
    fn drop_constraints(&self, datastore_id: DatastoreId) -> Result<(), StoreError>;

    /// Delete every row scoped to the tenant. Returns the number removed.
    fn purge_tenant(&self, tenant_id: TenantId) -> Result<usize, StoreError>;
}
