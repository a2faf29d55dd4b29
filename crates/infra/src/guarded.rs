//! Tenant store wrapper that enforces entity access policies on every call.

use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;

use gatehouse_auth::{
    AccessGate, AssignmentStore, AuthzError, Operation, Protected, ResolvedAuthority, RoleStore,
    StoreError, TenantRepository,
};
use gatehouse_core::TenantId;

use crate::read_model::TenantStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("access denied: {0}")]
    Denied(AuthzError),

    #[error("row scoped to tenant {row} cannot be written into tenant {partition}")]
    TenantMismatch { partition: TenantId, row: TenantId },

    #[error(transparent)]
    Store(StoreError),
}

impl From<AuthzError> for AccessError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Store(err) => Self::Store(err),
            denied => Self::Denied(denied),
        }
    }
}

impl From<StoreError> for AccessError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

pub struct GuardedTenantStore<S, T, K, V> {
    gate: Arc<AccessGate<S>>,
    inner: T,
    _marker: PhantomData<fn(K) -> V>,
}

impl<S, T, K, V> GuardedTenantStore<S, T, K, V>
where
    S: RoleStore + AssignmentStore + TenantRepository,
    T: TenantStore<K, V>,
    V: Protected,
{
    pub fn new(gate: Arc<AccessGate<S>>, inner: T) -> Self {
        Self {
            gate,
            inner,
            _marker: PhantomData,
        }
    }

    /// Absent rows are `Ok(None)`; the read check runs first either way.
    pub fn get(
        &self,
        authority: &ResolvedAuthority,
        tenant_id: TenantId,
        key: &K,
    ) -> Result<Option<V>, AccessError> {
        self.gate
            .authorize_with(authority, V::ENTITY_TYPE, Operation::Read, Some(tenant_id))?;
        self.inner.get(tenant_id, key).map_err(AccessError::from)
    }

    pub fn list(&self, authority: &ResolvedAuthority, tenant_id: TenantId) -> Result<Vec<V>, AccessError> {
        self.gate
            .authorize_with(authority, V::ENTITY_TYPE, Operation::Read, Some(tenant_id))?;
        self.inner.list(tenant_id).map_err(AccessError::from)
    }

    /// Rows that carry their own tenant must be written into that tenant.
    pub fn upsert(
        &self,
        authority: &ResolvedAuthority,
        tenant_id: TenantId,
        key: K,
        value: V,
    ) -> Result<(), AccessError> {
        if let Some(row) = value.scope_tenant().filter(|row| *row != tenant_id) {
            tracing::warn!(partition = %tenant_id, row = %row, entity_type = V::ENTITY_TYPE, "row written into a foreign tenant");
            return Err(AccessError::TenantMismatch { partition: tenant_id, row });
        }
        self.gate
            .authorize_with(authority, V::ENTITY_TYPE, Operation::Write, Some(tenant_id))?;
        self.inner.upsert(tenant_id, key, value).map_err(AccessError::from)
    }
}
