//! Organization-scoped rows, partitioned per tenant so a tenant purge touches
//! only its own partition.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use gatehouse_auth::StoreError;
use gatehouse_core::TenantId;

pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Result<Option<V>, StoreError>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> Result<(), StoreError>;
    fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, StoreError>;
    /// Drop a tenant's partition; returns the number of rows it held.
    fn clear_tenant(&self, tenant_id: TenantId) -> Result<usize, StoreError>;
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Result<Option<V>, StoreError> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> Result<(), StoreError> {
        (**self).upsert(tenant_id, key, value)
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, StoreError> {
        (**self).list(tenant_id)
    }

    fn clear_tenant(&self, tenant_id: TenantId) -> Result<usize, StoreError> {
        (**self).clear_tenant(tenant_id)
    }
}

type Partitions<K, V> = HashMap<TenantId, HashMap<K, V>>;

#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    partitions: RwLock<Partitions<K, V>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Partitions<K, V>>, StoreError> {
        self.partitions
            .read()
            .map_err(|_| StoreError::Storage("tenant rows lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Partitions<K, V>>, StoreError> {
        self.partitions
            .write()
            .map_err(|_| StoreError::Storage("tenant rows lock poisoned".into()))
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Result<Option<V>, StoreError> {
        Ok(self
            .read()?
            .get(&tenant_id)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> Result<(), StoreError> {
        self.write()?.entry(tenant_id).or_default().insert(key, value);
        Ok(())
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, StoreError> {
        Ok(self
            .read()?
            .get(&tenant_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn clear_tenant(&self, tenant_id: TenantId) -> Result<usize, StoreError> {
        Ok(self
            .write()?
            .remove(&tenant_id)
            .map_or(0, |rows| rows.len()))
    }
}
