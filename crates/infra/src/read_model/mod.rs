//! Tenant-partitioned storage for organization-scoped rows.

pub mod tenant_store;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
