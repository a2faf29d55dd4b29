//! `gatehouse-core` — identifiers and error primitives shared by the engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AssignmentId, DatastoreId, PrincipalId, RoleId, TenantId, TokenId};
pub use value_object::ValueObject;
