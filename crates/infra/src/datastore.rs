//! In-memory tenant datastore: organization-scoped rows plus the schema
//! constraint state of each dedicated datastore.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use gatehouse_auth::policy::{EntityAccessPolicy, Protected, RequiredPrivilege};
use gatehouse_auth::{StoreError, TenantDatastore, builtin};
use gatehouse_core::{DatastoreId, TenantId};

use crate::read_model::{InMemoryTenantStore, TenantStore};

/// A row of organization-scoped data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgRecord {
    pub tenant_id: TenantId,
    pub key: String,
    pub payload: serde_json::Value,
}

impl Protected for OrgRecord {
    const ENTITY_TYPE: &'static str = "org_data";

    fn access_policy() -> EntityAccessPolicy {
        EntityAccessPolicy::new(
            Self::ENTITY_TYPE,
            RequiredPrivilege::Privilege(builtin::CAN_READ_ORG_DATA),
            RequiredPrivilege::Privilege(builtin::CAN_MANAGE_ORG_DATA),
        )
    }

    fn scope_tenant(&self) -> Option<TenantId> {
        Some(self.tenant_id)
    }
}

/// Injectable failure for exercising partial removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    DropConstraints,
    Purge,
}

#[derive(Debug)]
pub struct InMemoryTenantDatastore {
    rows: Arc<InMemoryTenantStore<String, OrgRecord>>,
    /// `true` while the datastore's schema constraints are in place.
    constraints: RwLock<HashMap<DatastoreId, bool>>,
    placement: RwLock<HashMap<TenantId, DatastoreId>>,
    fail_next: RwLock<Option<FailPoint>>,
}

impl InMemoryTenantDatastore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(InMemoryTenantStore::new()),
            constraints: RwLock::new(HashMap::new()),
            placement: RwLock::new(HashMap::new()),
            fail_next: RwLock::new(None),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Row storage, shared with guarded accessors.
    pub fn rows(&self) -> Arc<InMemoryTenantStore<String, OrgRecord>> {
        self.rows.clone()
    }

    /// Place a tenant's rows in a dedicated datastore with constraints enabled.
    pub fn place_tenant(&self, tenant_id: TenantId, datastore_id: DatastoreId) -> Result<(), StoreError> {
        self.constraints
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?
            .insert(datastore_id, true);
        self.placement
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?
            .insert(tenant_id, datastore_id);
        Ok(())
    }

    pub fn insert_row(&self, record: OrgRecord) -> Result<(), StoreError> {
        self.rows.upsert(record.tenant_id, record.key.clone(), record)
    }

    pub fn constraints_present(&self, datastore_id: DatastoreId) -> bool {
        self.constraints
            .read()
            .map(|c| c.get(&datastore_id).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn row_count(&self, tenant_id: TenantId) -> Result<usize, StoreError> {
        Ok(self.rows.list(tenant_id)?.len())
    }

    /// Make the next matching operation fail once.
    pub fn fail_next(&self, point: FailPoint) {
        if let Ok(mut slot) = self.fail_next.write() {
            *slot = Some(point);
        }
    }

    fn take_failure(&self, point: FailPoint) -> Result<(), StoreError> {
        let mut slot = self
            .fail_next
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?;
        if *slot == Some(point) {
            *slot = None;
            return Err(StoreError::Storage(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

impl Default for InMemoryTenantDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl TenantDatastore for InMemoryTenantDatastore {
    fn drop_constraints(&self, datastore_id: DatastoreId) -> Result<(), StoreError> {
        self.take_failure(FailPoint::DropConstraints)?;
        let mut constraints = self
            .constraints
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?;
        constraints.insert(datastore_id, false);
        tracing::debug!(datastore_id = %datastore_id, "datastore constraints dropped");
        Ok(())
    }

    fn purge_tenant(&self, tenant_id: TenantId) -> Result<usize, StoreError> {
        self.take_failure(FailPoint::Purge)?;

        let placed = self
            .placement
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?
            .get(&tenant_id)
            .copied();
        if let Some(datastore_id) = placed {
            if self.constraints_present(datastore_id) {
                return Err(StoreError::Conflict(format!(
                    "datastore {datastore_id} still enforces constraints"
                )));
            }
        }

        let purged = self.rows.clear_tenant(tenant_id)?;
        self.placement
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?
            .remove(&tenant_id);
        tracing::debug!(tenant_id = %tenant_id, purged, "tenant rows purged");
        Ok(purged)
    }
}
