//! `gatehouse-auth` — role/privilege resolution and credential-token decisions.
//!
//! This crate is intentionally decoupled from HTTP and storage: persistence is
//! consumed through the traits in [`store`].

pub mod admin;
pub mod explain;
pub mod policy;
pub mod privilege;
pub mod privilege_set;
pub mod resolver;
pub mod role;
pub mod store;
pub mod tenant;
pub mod token;

pub use admin::RoleAdmin;
pub use explain::{AuthorizationExplanation, explain};
pub use policy::{
    AccessGate, AuthzError, EntityAccessPolicy, Operation, PolicyTable, Protected,
    RequiredPrivilege, authorize,
};
pub use privilege::{Privilege, PrivilegeCatalog, builtin};
pub use privilege_set::{PrivilegeSet, rename_encoded};
pub use resolver::{AuthorityCache, GrantScope, PrivilegeResolver, ResolvedAuthority};
pub use role::{NewAssignment, NewRole, Role, RoleAssignment, RoleError, RoleVariant};
pub use store::{
    AssignmentStore, RoleStore, StoreError, TenantDatastore, TenantRepository, TokenStore,
};
pub use tenant::{
    LifecycleError, RemovalError, RemovalStep, Tenant, TenantLifecycle, TenantPhase,
};
pub use token::{
    CredentialToken, IssuedToken, TokenError, TokenKind, TokenOutcome, TokenPolicy, TokenService,
    TokenValidation, decode_bearer, encode_bearer,
};
