//! Infrastructure layer: in-memory stores, guarded tenant data, configuration
//! and the `AuthEngine` facade.

pub mod config;
pub mod datastore;
pub mod engine;
pub mod guarded;
pub mod memory;
pub mod read_model;

#[cfg(test)]
mod integration_tests;

pub use config::AuthConfig;
pub use datastore::{FailPoint, InMemoryTenantDatastore, OrgRecord};
pub use engine::AuthEngine;
pub use guarded::{AccessError, GuardedTenantStore};
pub use memory::InMemoryAuthStore;
