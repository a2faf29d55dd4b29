//! Effective privilege resolution.
//!
//! ```text
//! own rows (principal = P)  ──┐
//!                             ├─► union role privileges ─► global bucket   (tenant = NULL)
//! default rows              ──┘                          └► tenant buckets (tenant = T)
//! (principal = NULL, tenant ∈ tenants of P's own rows)
//! ```
//!
//! A privilege checked for tenant `T` is satisfied by `global ∪ tenant[T]`.
//! Global privileges always apply, whatever the tenant context.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use gatehouse_core::{PrincipalId, RoleId, TenantId};

use crate::role::{Role, RoleAssignment};
use crate::store::{AssignmentStore, RoleStore, StoreError};
use crate::{Privilege, PrivilegeSet};

/// Which bucket satisfied a privilege check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "tenant_id")]
pub enum GrantScope {
    Global,
    Tenant(TenantId),
}

/// Computed, non-persisted privilege projection of one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedAuthority {
    pub principal_id: PrincipalId,
    pub global_privileges: PrivilegeSet,
    pub tenant_privileges: BTreeMap<TenantId, PrivilegeSet>,
}

impl ResolvedAuthority {
    pub fn empty(principal_id: PrincipalId) -> Self {
        Self {
            principal_id,
            global_privileges: PrivilegeSet::new(),
            tenant_privileges: BTreeMap::new(),
        }
    }

    /// Build the projection from assignment rows and the roles they reference.
    ///
    /// Rows pointing at roles missing from `roles` contribute nothing.
    pub fn from_assignments<'a>(
        principal_id: PrincipalId,
        rows: impl IntoIterator<Item = &'a RoleAssignment>,
        roles: &HashMap<RoleId, Role>,
    ) -> Self {
        let mut authority = Self::empty(principal_id);
        for row in rows {
            let Some(role) = roles.get(&row.role_id) else {
                tracing::debug!(
                    principal_id = %principal_id,
                    role_id = %row.role_id,
                    "assignment references a missing role; skipping"
                );
                continue;
            };
            let bucket = match row.tenant_id {
                None => &mut authority.global_privileges,
                Some(tenant_id) => authority.tenant_privileges.entry(tenant_id).or_default(),
            };
            bucket.extend_from(&role.privileges);
        }
        authority
    }

    pub fn has_global(&self, privilege: &Privilege) -> bool {
        self.global_privileges.contains(privilege)
    }

    /// `privilege ∈ global ∪ tenant[tenant_id]`.
    pub fn has_in_tenant(&self, privilege: &Privilege, tenant_id: Option<TenantId>) -> bool {
        self.grant_scope(privilege, tenant_id).is_some()
    }

    /// The bucket that grants `privilege`, global first.
    pub fn grant_scope(&self, privilege: &Privilege, tenant_id: Option<TenantId>) -> Option<GrantScope> {
        if self.has_global(privilege) {
            return Some(GrantScope::Global);
        }
        let tenant_id = tenant_id?;
        self.tenant_privileges
            .get(&tenant_id)
            .filter(|set| set.contains(privilege))
            .map(|_| GrantScope::Tenant(tenant_id))
    }

    /// Effective privileges in a tenant context (`global ∪ tenant[T]`).
    pub fn effective_for(&self, tenant_id: Option<TenantId>) -> PrivilegeSet {
        let mut effective = self.global_privileges.clone();
        if let Some(set) = tenant_id.and_then(|t| self.tenant_privileges.get(&t)) {
            effective.extend_from(set);
        }
        effective
    }

    /// Tenants in which the principal holds at least one tenant-scoped privilege.
    pub fn tenants(&self) -> impl Iterator<Item = TenantId> + '_ {
        self.tenant_privileges.keys().copied()
    }
}

/// Resolves a principal's effective privileges from the assignment store.
#[derive(Debug)]
pub struct PrivilegeResolver<S> {
    store: Arc<S>,
}

impl<S> Clone for PrivilegeResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> PrivilegeResolver<S>
where
    S: RoleStore + AssignmentStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn resolve(&self, principal_id: PrincipalId) -> Result<ResolvedAuthority, StoreError> {
        let own = self.store.assignments_for_principal(principal_id)?;

        let tenant_ids: Vec<TenantId> = own
            .iter()
            .filter_map(|row| row.tenant_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let defaults = if tenant_ids.is_empty() {
            Vec::new()
        } else {
            self.store.tenant_defaults(&tenant_ids)?
        };

        let role_ids: Vec<RoleId> = own
            .iter()
            .chain(defaults.iter())
            .map(|row| row.role_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let roles: HashMap<RoleId, Role> = self
            .store
            .get_roles(&role_ids)?
            .into_iter()
            .map(|role| (role.id, role))
            .collect();

        let authority =
            ResolvedAuthority::from_assignments(principal_id, own.iter().chain(defaults.iter()), &roles);

        tracing::debug!(
            principal_id = %principal_id,
            own_rows = own.len(),
            default_rows = defaults.len(),
            global = authority.global_privileges.len(),
            tenants = authority.tenant_privileges.len(),
            "resolved authority"
        );

        Ok(authority)
    }
}

#[derive(Debug, Clone)]
struct CachedAuthority {
    modified_at: DateTime<Utc>,
    authority: ResolvedAuthority,
}

/// Memoized resolutions keyed by the principal-modified timestamp.
///
/// An entry is only reused while the caller presents the same timestamp it was
/// stored under; any change to the principal (role grant, revocation) must
/// bump that timestamp or call [`AuthorityCache::invalidate`].
///
/// A resolution that overlaps an invalidation is returned but not stored.
#[derive(Debug, Default)]
pub struct AuthorityCache {
    entries: RwLock<HashMap<PrincipalId, CachedAuthority>>,
    /// Bumped under the write lock by every invalidation.
    generation: AtomicU64,
}

impl AuthorityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_resolve<F>(
        &self,
        principal_id: PrincipalId,
        modified_at: DateTime<Utc>,
        resolve: F,
    ) -> Result<ResolvedAuthority, StoreError>
    where
        F: FnOnce(PrincipalId) -> Result<ResolvedAuthority, StoreError>,
    {
        if let Ok(entries) = self.entries.read() {
            if let Some(cached) = entries.get(&principal_id) {
                if cached.modified_at == modified_at {
                    return Ok(cached.authority.clone());
                }
            }
        }

        let generation = self.generation.load(Ordering::Acquire);
        let authority = resolve(principal_id)?;

        if let Ok(mut entries) = self.entries.write() {
            if self.generation.load(Ordering::Acquire) != generation {
                tracing::debug!(principal_id = %principal_id, "cache invalidated during resolution; not storing");
                return Ok(authority);
            }
            entries.insert(
                principal_id,
                CachedAuthority {
                    modified_at,
                    authority: authority.clone(),
                },
            );
        }

        Ok(authority)
    }

    pub fn invalidate(&self, principal_id: PrincipalId) {
        if let Ok(mut entries) = self.entries.write() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            entries.remove(&principal_id);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            entries.clear();
        }
    }
}
