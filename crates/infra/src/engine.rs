//! `AuthEngine`: one entry point wiring the resolver, the access gate, token
//! handling, role administration and the tenant lifecycle over shared stores.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use gatehouse_auth::{
    AccessGate, AssignmentStore, AuthorityCache, AuthorizationExplanation, AuthzError,
    CredentialToken, IssuedToken, NewRole, Operation, PolicyTable, Privilege, PrivilegeResolver,
    Protected, RemovalError, ResolvedAuthority, Role, RoleAdmin, RoleAssignment, RoleError,
    RoleStore, StoreError, Tenant, TenantDatastore, TenantLifecycle, TenantPhase,
    TenantRepository, TokenError, TokenKind, TokenService, TokenStore, TokenValidation, explain,
};
use gatehouse_core::{AssignmentId, PrincipalId, RoleId, TenantId};

use crate::config::AuthConfig;
use crate::datastore::InMemoryTenantDatastore;
use crate::memory::InMemoryAuthStore;

pub struct AuthEngine<S, D> {
    store: Arc<S>,
    datastore: Arc<D>,
    resolver: PrivilegeResolver<S>,
    gate: Arc<AccessGate<S>>,
    admin: RoleAdmin<S>,
    tokens: TokenService<S>,
    lifecycle: TenantLifecycle<S, D>,
    cache: AuthorityCache,
}

impl AuthEngine<InMemoryAuthStore, InMemoryTenantDatastore> {
    /// Engine over fresh in-memory stores (tests/dev).
    pub fn in_memory(config: &AuthConfig) -> Self {
        Self::new(InMemoryAuthStore::arc(), InMemoryTenantDatastore::arc(), config)
    }
}

impl<S, D> AuthEngine<S, D>
where
    S: RoleStore + AssignmentStore + TokenStore + TenantRepository,
    D: TenantDatastore,
{
    pub fn new(store: Arc<S>, datastore: Arc<D>, config: &AuthConfig) -> Self {
        Self {
            resolver: PrivilegeResolver::new(Arc::clone(&store)),
            gate: Arc::new(AccessGate::new(Arc::clone(&store), PolicyTable::builtin())),
            admin: RoleAdmin::new(Arc::clone(&store)),
            tokens: TokenService::new(Arc::clone(&store), config.tokens.clone()),
            lifecycle: TenantLifecycle::new(Arc::clone(&store), Arc::clone(&datastore)),
            cache: AuthorityCache::new(),
            store,
            datastore,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn datastore(&self) -> &Arc<D> {
        &self.datastore
    }

    /// Shared gate for guarded stores.
    pub fn gate(&self) -> Arc<AccessGate<S>> {
        Arc::clone(&self.gate)
    }

    pub fn lifecycle(&self) -> &TenantLifecycle<S, D> {
        &self.lifecycle
    }

    // ── Resolution and authorization ───────────────────────────────────────

    pub fn resolve(&self, principal_id: PrincipalId) -> Result<ResolvedAuthority, StoreError> {
        self.resolver.resolve(principal_id)
    }

    /// Resolve through the cache; `modified_at` is the principal's
    /// last-modified timestamp as known to the caller.
    pub fn resolve_cached(
        &self,
        principal_id: PrincipalId,
        modified_at: DateTime<Utc>,
    ) -> Result<ResolvedAuthority, StoreError> {
        self.cache
            .get_or_resolve(principal_id, modified_at, |id| self.resolver.resolve(id))
    }

    pub fn authorize(
        &self,
        principal_id: PrincipalId,
        entity_type: &str,
        operation: Operation,
        tenant_id: Option<TenantId>,
    ) -> Result<(), AuthzError> {
        self.gate.authorize(principal_id, entity_type, operation, tenant_id)
    }

    /// Authorize an operation on a concrete row, scoped to the row's tenant.
    pub fn authorize_entity<T: Protected>(
        &self,
        principal_id: PrincipalId,
        operation: Operation,
        row: &T,
    ) -> Result<(), AuthzError> {
        self.gate
            .authorize(principal_id, T::ENTITY_TYPE, operation, row.scope_tenant())
    }

    pub fn is_allowed(
        &self,
        principal_id: PrincipalId,
        entity_type: &str,
        operation: Operation,
        tenant_id: Option<TenantId>,
    ) -> Result<bool, AuthzError> {
        self.gate.is_allowed(principal_id, entity_type, operation, tenant_id)
    }

    pub fn explain(
        &self,
        principal_id: PrincipalId,
        entity_type: &str,
        operation: Operation,
        tenant_id: Option<TenantId>,
    ) -> Result<AuthorizationExplanation, AuthzError> {
        let policy = self
            .gate
            .policies()
            .get(entity_type)
            .ok_or_else(|| AuthzError::UnknownEntityType(entity_type.to_string()))?;
        let authority = self.resolver.resolve(principal_id)?;
        let pending = match tenant_id {
            Some(tenant_id) => self.gate.tenant_pending_removal(tenant_id)?,
            None => false,
        };
        Ok(explain(&authority, policy, operation, tenant_id, pending))
    }

    // ── Credential tokens ──────────────────────────────────────────────────

    pub fn validate_token(&self, bearer: &str, now: DateTime<Utc>) -> Result<TokenValidation, StoreError> {
        self.tokens.validate(bearer, now)
    }

    pub fn redeem_token(&self, token: &CredentialToken) -> Result<(), TokenError> {
        self.tokens.redeem(token)
    }

    pub fn consume_token(&self, bearer: &str, now: DateTime<Utc>) -> Result<TokenValidation, TokenError> {
        self.tokens.consume(bearer, now)
    }

    pub fn issue_token(
        &self,
        principal_id: PrincipalId,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        self.tokens.issue(principal_id, kind, now)
    }

    pub fn issue_token_on_behalf(
        &self,
        requester: PrincipalId,
        principal_id: PrincipalId,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let authority = self.resolver.resolve(requester)?;
        self.tokens.issue_on_behalf(&authority, principal_id, kind, now)
    }

    // ── Role administration ────────────────────────────────────────────────
    //
    // Role and assignment changes can affect any principal, so every
    // successful mutation drops the whole authority cache.

    pub fn bootstrap_system_roles(&self) -> Result<Vec<Role>, RoleError> {
        self.admin.bootstrap_system_roles()
    }

    pub fn create_role(&self, role: NewRole) -> Result<Role, RoleError> {
        self.admin.create_role(role)
    }

    pub fn grant_privileges(&self, role_id: RoleId, privileges: &[Privilege]) -> Result<bool, RoleError> {
        let changed = self.admin.grant_privileges(role_id, privileges)?;
        if changed {
            self.cache.clear();
        }
        Ok(changed)
    }

    pub fn revoke_privileges(&self, role_id: RoleId, privileges: &[Privilege]) -> Result<bool, RoleError> {
        let changed = self.admin.revoke_privileges(role_id, privileges)?;
        if changed {
            self.cache.clear();
        }
        Ok(changed)
    }

    pub fn assign_role(
        &self,
        principal_id: Option<PrincipalId>,
        role_id: RoleId,
        tenant_id: Option<TenantId>,
    ) -> Result<RoleAssignment, RoleError> {
        let row = self.admin.assign_role(principal_id, role_id, tenant_id)?;
        self.cache.clear();
        Ok(row)
    }

    pub fn revoke_assignment(&self, assignment_id: AssignmentId) -> Result<bool, RoleError> {
        let removed = self.admin.revoke_assignment(assignment_id)?;
        if removed {
            self.cache.clear();
        }
        Ok(removed)
    }

    pub fn remove_principal(&self, principal_id: PrincipalId) -> Result<usize, RoleError> {
        let removed = self.admin.remove_principal(principal_id)?;
        self.cache.invalidate(principal_id);
        Ok(removed)
    }

    /// `false` when the role is unknown, not removable, or the requester
    /// lacks global role management.
    pub fn delete_role(&self, role_id: RoleId, requester: PrincipalId) -> Result<bool, StoreError> {
        let authority = self.resolver.resolve(requester)?;
        let removed = self.admin.delete_role(role_id, &authority)?;
        if removed {
            self.cache.clear();
        }
        Ok(removed)
    }

    pub fn rename_privilege(&self, old: &Privilege, new: &Privilege) -> Result<usize, RoleError> {
        let rewritten = self.admin.rename_privilege(old, new)?;
        if rewritten > 0 {
            self.cache.clear();
        }
        Ok(rewritten)
    }

    // ── Tenants ────────────────────────────────────────────────────────────

    pub fn register_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        self.store.save_tenant(tenant)?;
        tracing::info!(tenant_id = %tenant.id, name = %tenant.name, "tenant registered");
        Ok(())
    }

    pub fn tenant_phase(&self, tenant_id: TenantId) -> Result<TenantPhase, StoreError> {
        self.lifecycle.phase(tenant_id)
    }

    /// Run or resume the removal sequence for a tenant.
    pub fn remove_tenant(
        &self,
        requester: &ResolvedAuthority,
        tenant_id: TenantId,
    ) -> Result<TenantPhase, RemovalError> {
        let phase = self.lifecycle.run_removal(requester, tenant_id)?;
        self.cache.clear();
        Ok(phase)
    }
}
