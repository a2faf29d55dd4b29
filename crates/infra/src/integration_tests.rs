//! End-to-end tests for the engine over the in-memory stores.
//!
//! Covers:
//! - Resolution (global/tenant buckets, tenant-default inheritance)
//! - Role scope rules and guarded role deletion
//! - Credential token lifecycle, including concurrent redemption
//! - Tenant removal sequence, resume after partial failure
//! - Privilege rename across stored roles

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, Utc};

use gatehouse_auth::admin::system_roles;
use gatehouse_auth::{
    AssignmentStore, AuthzError, LifecycleError, NewRole, Operation, Privilege, PrivilegeSet, RemovalStep, Role,
    RoleError, RoleStore, RoleVariant, Tenant, TenantPhase, TenantRepository, TokenError, TokenKind,
    TokenOutcome, TokenPolicy, builtin, encode_bearer,
};
use gatehouse_core::{DatastoreId, PrincipalId, RoleId, TenantId};

use crate::datastore::{FailPoint, OrgRecord};
use crate::guarded::{AccessError, GuardedTenantStore};
use crate::{AuthConfig, AuthEngine, InMemoryAuthStore, InMemoryTenantDatastore};

type Engine = AuthEngine<InMemoryAuthStore, InMemoryTenantDatastore>;

const ADMIN: PrincipalId = PrincipalId::new(1);
const ALICE: PrincipalId = PrincipalId::new(2);
const BOB: PrincipalId = PrincipalId::new(3);
const ACME: TenantId = TenantId::new(10);
const GLOBEX: TenantId = TenantId::new(11);

fn set(privileges: &[Privilege]) -> PrivilegeSet {
    privileges.iter().cloned().collect()
}

fn role_named(engine: &Engine, name: &str) -> Role {
    engine.store().find_role_by_name(name).unwrap().unwrap()
}

/// Engine with system roles seeded and `ADMIN` holding the admin role.
fn setup() -> Engine {
    let engine = AuthEngine::in_memory(&AuthConfig::default());
    engine.bootstrap_system_roles().unwrap();
    let admin = role_named(&engine, system_roles::ADMIN);
    engine.assign_role(Some(ADMIN), admin.id, None).unwrap();
    engine.register_tenant(&Tenant::new(ACME, "acme")).unwrap();
    engine.register_tenant(&Tenant::new(GLOBEX, "globex")).unwrap();
    engine
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn principal_with_no_assignments_resolves_empty() {
    let engine = setup();
    let authority = engine.resolve(PrincipalId::new(404)).unwrap();
    assert!(authority.global_privileges.is_empty());
    assert!(authority.tenant_privileges.is_empty());
}

#[test]
fn tenant_check_uses_global_union_tenant_bucket() {
    let engine = setup();
    let member = role_named(&engine, system_roles::ORG_MEMBER);
    let backend = engine
        .create_role(NewRole::new(
            "backend reader",
            "ops",
            RoleVariant::Global,
            set(&[builtin::CAN_READ_BACKEND]),
        ))
        .unwrap();

    engine.assign_role(Some(ALICE), member.id, Some(ACME)).unwrap();
    engine.assign_role(Some(ALICE), backend.id, None).unwrap();

    let authority = engine.resolve(ALICE).unwrap();
    assert!(authority.has_in_tenant(&builtin::CAN_READ_ORG_DATA, Some(ACME)));
    assert!(!authority.has_in_tenant(&builtin::CAN_READ_ORG_DATA, Some(GLOBEX)));
    assert!(!authority.has_in_tenant(&builtin::CAN_READ_ORG_DATA, None));
    assert!(authority.has_in_tenant(&builtin::CAN_READ_BACKEND, Some(GLOBEX)));

    assert!(engine.is_allowed(ALICE, "org_data", Operation::Read, Some(ACME)).unwrap());
    assert!(!engine.is_allowed(ALICE, "org_data", Operation::Read, Some(GLOBEX)).unwrap());
    assert!(!engine.is_allowed(ALICE, "org_data", Operation::Write, Some(ACME)).unwrap());
}

#[test]
fn tenant_default_roles_apply_to_members_only() {
    let engine = setup();
    let member = role_named(&engine, system_roles::ORG_MEMBER);
    let auditor = engine
        .create_role(NewRole::new(
            "acme auditor",
            "organization",
            RoleVariant::OrganizationScoped,
            set(&[builtin::CAN_READ_ORG_AUDIT]),
        ))
        .unwrap();

    engine.assign_role(None, auditor.id, Some(ACME)).unwrap();
    engine.assign_role(Some(ALICE), member.id, Some(ACME)).unwrap();
    engine.assign_role(Some(BOB), member.id, Some(GLOBEX)).unwrap();

    let alice = engine.resolve(ALICE).unwrap();
    assert!(alice.has_in_tenant(&builtin::CAN_READ_ORG_AUDIT, Some(ACME)));
    assert!(!alice.has_global(&builtin::CAN_READ_ORG_AUDIT));

    let bob = engine.resolve(BOB).unwrap();
    assert!(!bob.has_in_tenant(&builtin::CAN_READ_ORG_AUDIT, Some(ACME)));
    assert!(!bob.has_in_tenant(&builtin::CAN_READ_ORG_AUDIT, Some(GLOBEX)));
}

#[test]
fn unrestricted_operations_are_allowed_without_privileges() {
    let engine = setup();
    engine
        .authorize(BOB, "frontend_resource", Operation::Read, None)
        .unwrap();
    let err = engine
        .authorize(BOB, "frontend_resource", Operation::Write, None)
        .unwrap_err();
    assert!(matches!(err, AuthzError::Forbidden { .. }));
}

#[test]
fn unknown_entity_type_is_an_error_not_a_denial() {
    let engine = setup();
    let err = engine.authorize(ADMIN, "spaceship", Operation::Read, None).unwrap_err();
    assert_eq!(err, AuthzError::UnknownEntityType("spaceship".to_string()));

    assert_eq!(
        engine.is_allowed(ADMIN, "spaceship", Operation::Read, None),
        Err(AuthzError::UnknownEntityType("spaceship".to_string()))
    );
}

#[test]
fn is_allowed_is_false_for_pending_tenant() {
    let engine = setup();
    let admin = engine.resolve(ADMIN).unwrap();
    engine.lifecycle().mark_schema_deleted(&admin, ACME, None).unwrap();

    assert_eq!(engine.is_allowed(ADMIN, "org_data", Operation::Read, Some(ACME)), Ok(false));
    assert_eq!(engine.is_allowed(ADMIN, "org_data", Operation::Read, Some(GLOBEX)), Ok(true));
}

#[test]
fn authorize_entity_uses_row_tenant() {
    let engine = setup();
    let member = role_named(&engine, system_roles::ORG_MEMBER);
    engine.assign_role(Some(ALICE), member.id, Some(ACME)).unwrap();

    let acme_tenant = Tenant::new(ACME, "acme");
    let globex_tenant = Tenant::new(GLOBEX, "globex");
    engine.authorize_entity(ALICE, Operation::Read, &acme_tenant).unwrap();
    assert!(engine.authorize_entity(ALICE, Operation::Read, &globex_tenant).is_err());
}

#[test]
fn explanation_names_granting_scope() {
    let engine = setup();
    let member = role_named(&engine, system_roles::ORG_MEMBER);
    engine.assign_role(Some(ALICE), member.id, Some(ACME)).unwrap();

    let allowed = engine.explain(ALICE, "org_data", Operation::Read, Some(ACME)).unwrap();
    assert!(allowed.granted);
    assert_eq!(allowed.granted_by, Some(gatehouse_auth::GrantScope::Tenant(ACME)));

    let denied = engine.explain(ALICE, "org_data", Operation::Write, Some(ACME)).unwrap();
    assert!(!denied.granted);
    assert!(denied.denial_reason.is_some());
}

#[test]
fn cached_resolution_tracks_modified_timestamp() {
    let engine = setup();
    let t0 = Utc::now();
    let before = engine.resolve_cached(ALICE, t0).unwrap();
    assert!(before.global_privileges.is_empty());

    let backend = engine
        .create_role(NewRole::new("reader", "ops", RoleVariant::Global, set(&[builtin::CAN_READ_BACKEND])))
        .unwrap();
    engine.assign_role(Some(ALICE), backend.id, None).unwrap();

    let after = engine.resolve_cached(ALICE, t0 + Duration::seconds(1)).unwrap();
    assert!(after.has_global(&builtin::CAN_READ_BACKEND));
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn assignment_scope_must_match_role_variant() {
    let engine = setup();
    let global = role_named(&engine, system_roles::ADMIN);
    let scoped = role_named(&engine, system_roles::ORG_MEMBER);
    let either = role_named(&engine, system_roles::USER);

    assert!(matches!(
        engine.assign_role(Some(ALICE), global.id, Some(ACME)),
        Err(RoleError::InvalidScopeForRoleVariant { .. })
    ));
    assert!(matches!(
        engine.assign_role(Some(ALICE), scoped.id, None),
        Err(RoleError::InvalidScopeForRoleVariant { .. })
    ));
    engine.assign_role(Some(ALICE), either.id, None).unwrap();
    engine.assign_role(Some(ALICE), either.id, Some(ACME)).unwrap();
}

#[test]
fn duplicate_role_names_are_rejected() {
    let engine = setup();
    let err = engine
        .create_role(NewRole::new(system_roles::ADMIN, "x", RoleVariant::Global, PrivilegeSet::new()))
        .unwrap_err();
    assert_eq!(err, RoleError::DuplicateName(system_roles::ADMIN.to_string()));
}

#[test]
fn bootstrap_is_idempotent() {
    let engine = setup();
    let again = engine.bootstrap_system_roles().unwrap();
    assert_eq!(again.len(), 4);
    assert_eq!(engine.store().list_roles().unwrap().len(), 4);
}

#[test]
fn grant_and_revoke_report_changes() {
    let engine = setup();
    let role = engine
        .create_role(NewRole::new("support", "ops", RoleVariant::Global, PrivilegeSet::new()))
        .unwrap();

    assert!(engine.grant_privileges(role.id, &[builtin::CAN_READ_USER_DATA]).unwrap());
    assert!(!engine.grant_privileges(role.id, &[builtin::CAN_READ_USER_DATA]).unwrap());
    assert!(engine.revoke_privileges(role.id, &[builtin::CAN_READ_USER_DATA]).unwrap());
    assert!(!engine.revoke_privileges(role.id, &[builtin::CAN_READ_USER_DATA]).unwrap());

    assert_eq!(
        engine.grant_privileges(RoleId::new(9999), &[builtin::CAN_READ_USER_DATA]),
        Err(RoleError::UnknownRole(RoleId::new(9999)))
    );
}

#[test]
fn delete_role_requires_removable_and_role_management() {
    let engine = setup();
    let custom = engine
        .create_role(NewRole::new("temp", "ops", RoleVariant::Global, set(&[builtin::CAN_READ_BACKEND])))
        .unwrap();
    engine.assign_role(Some(BOB), custom.id, None).unwrap();
    assert!(engine.resolve(BOB).unwrap().has_global(&builtin::CAN_READ_BACKEND));
    let system = role_named(&engine, system_roles::USER);

    // Requester without role management.
    assert!(!engine.delete_role(custom.id, ALICE).unwrap());
    // System roles are never removable.
    assert!(!engine.delete_role(system.id, ADMIN).unwrap());
    // Unknown role.
    assert!(!engine.delete_role(RoleId::new(9999), ADMIN).unwrap());

    assert!(engine.delete_role(custom.id, ADMIN).unwrap());
    assert!(engine.store().get_role(custom.id).unwrap().is_none());
    assert!(engine.resolve(BOB).unwrap().global_privileges.is_empty());
    assert!(engine.store().assignments_for_principal(BOB).unwrap().is_empty());
}

#[test]
fn revoke_assignment_and_remove_principal() {
    let engine = setup();
    let member = role_named(&engine, system_roles::ORG_MEMBER);
    let a = engine.assign_role(Some(ALICE), member.id, Some(ACME)).unwrap();
    engine.assign_role(Some(ALICE), member.id, Some(GLOBEX)).unwrap();

    assert!(engine.revoke_assignment(a.id).unwrap());
    assert!(!engine.revoke_assignment(a.id).unwrap());
    assert!(!engine.resolve(ALICE).unwrap().has_in_tenant(&builtin::CAN_READ_ORG_DATA, Some(ACME)));

    assert_eq!(engine.remove_principal(ALICE).unwrap(), 1);
    assert!(engine.resolve(ALICE).unwrap().tenant_privileges.is_empty());
}

#[test]
fn rename_privilege_rewrites_every_role() {
    let engine = setup();
    let old = builtin::CAN_READ_ORG_AUDIT;
    let new = Privilege::parse("canReadOrgAuditLog").unwrap();

    let member = role_named(&engine, system_roles::ORG_ADMIN);
    engine.assign_role(Some(ALICE), member.id, Some(ACME)).unwrap();

    // ROLE_ADMIN and ROLE_ORG_ADMIN both carry the privilege.
    assert_eq!(engine.rename_privilege(&old, &new).unwrap(), 2);

    let alice = engine.resolve(ALICE).unwrap();
    assert!(alice.has_in_tenant(&new, Some(ACME)));
    assert!(!alice.has_in_tenant(&old, Some(ACME)));
    assert!(alice.has_in_tenant(&builtin::CAN_READ_ORG_DATA, Some(ACME)));

    // Renaming a privilege no role carries touches nothing.
    let absent = Privilege::parse("canFly").unwrap();
    let fresh = Privilege::parse("canSoar").unwrap();
    assert_eq!(engine.rename_privilege(&absent, &fresh).unwrap(), 0);
}

#[test]
fn rename_to_name_in_use_is_rejected_and_changes_nothing() {
    let engine = setup();
    let org_admin = role_named(&engine, system_roles::ORG_ADMIN);
    let before = engine.store().encoded_privileges(org_admin.id).unwrap();

    let err = engine
        .rename_privilege(&builtin::CAN_READ_ORG_AUDIT, &builtin::CAN_READ_ORG_DATA)
        .unwrap_err();
    assert_eq!(err, RoleError::PrivilegeNameInUse(builtin::CAN_READ_ORG_DATA));
    assert_eq!(engine.store().encoded_privileges(org_admin.id).unwrap(), before);
}

// ─────────────────────────────────────────────────────────────────────────────
// Credential tokens
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn issued_token_validates_then_redeems_once() {
    let engine = setup();
    let now = Utc::now();
    let issued = engine.issue_token(ALICE, TokenKind::PasswordReset, now).unwrap();
    assert_eq!(issued.token.expires_at, now + Duration::minutes(60));

    let validation = engine.validate_token(&issued.bearer, now).unwrap();
    assert_eq!(validation.outcome, TokenOutcome::Valid);
    let token = validation.token.unwrap();
    assert_eq!(token.principal_id, ALICE);

    engine.redeem_token(&token).unwrap();
    assert_eq!(engine.redeem_token(&token), Err(TokenError::AlreadyUsed(token.id)));
    assert_eq!(
        engine.validate_token(&issued.bearer, now).unwrap().outcome,
        TokenOutcome::AlreadyUsed
    );
}

#[test]
fn token_expiry_boundary_and_used_wins_over_expired() {
    let engine = setup();
    let now = Utc::now();
    let issued = engine.issue_token(ALICE, TokenKind::MagicLink, now).unwrap();
    let expires_at = issued.token.expires_at;

    assert_eq!(engine.validate_token(&issued.bearer, expires_at).unwrap().outcome, TokenOutcome::Valid);
    let later = expires_at + Duration::seconds(1);
    assert_eq!(engine.validate_token(&issued.bearer, later).unwrap().outcome, TokenOutcome::Expired);

    // An expired token cannot be consumed.
    let consumed = engine.consume_token(&issued.bearer, later).unwrap();
    assert_eq!(consumed.outcome, TokenOutcome::Expired);

    engine.consume_token(&issued.bearer, now).unwrap();
    assert_eq!(
        engine.validate_token(&issued.bearer, later).unwrap().outcome,
        TokenOutcome::AlreadyUsed
    );
}

#[test]
fn malformed_or_unknown_bearers_are_invalid() {
    let engine = setup();
    let now = Utc::now();
    let issued = engine.issue_token(ALICE, TokenKind::Invitation, now).unwrap();

    let wrong_principal = encode_bearer(BOB, &issued.token.secret);
    let wrong_secret = encode_bearer(ALICE, "wrong-secret");

    for bearer in [
        "",
        "%%%not-base64%%%",
        "bm9jb2xvbg==", // "nocolon"
        wrong_principal.as_str(),
        wrong_secret.as_str(),
    ] {
        let validation = engine.validate_token(bearer, now).unwrap();
        assert_eq!(validation.outcome, TokenOutcome::Invalid, "bearer {bearer:?}");
        assert!(validation.token.is_none());
    }
}

#[test]
fn concurrent_consumers_see_exactly_one_valid() {
    const CONSUMERS: usize = 8;

    let engine = Arc::new(setup());
    let now = Utc::now();
    let bearer = engine.issue_token(ALICE, TokenKind::PasswordReset, now).unwrap().bearer;
    let barrier = Arc::new(Barrier::new(CONSUMERS));

    let handles: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let bearer = bearer.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.consume_token(&bearer, now).unwrap().outcome
            })
        })
        .collect();

    let outcomes: Vec<TokenOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let valid = outcomes.iter().filter(|o| **o == TokenOutcome::Valid).count();
    let used = outcomes.iter().filter(|o| **o == TokenOutcome::AlreadyUsed).count();
    assert_eq!(valid, 1);
    assert_eq!(used, CONSUMERS - 1);
}

#[test]
fn issuing_for_another_principal_requires_reset_privilege() {
    let engine = setup();
    let now = Utc::now();

    engine
        .issue_token_on_behalf(ALICE, ALICE, TokenKind::PasswordReset, now)
        .unwrap();
    assert_eq!(
        engine
            .issue_token_on_behalf(ALICE, BOB, TokenKind::PasswordReset, now)
            .unwrap_err(),
        TokenError::Forbidden(builtin::CAN_RESET_PASSWORD)
    );
    engine
        .issue_token_on_behalf(ADMIN, BOB, TokenKind::PasswordReset, now)
        .unwrap();
}

#[test]
fn lifetime_past_the_calendar_is_an_error() {
    let config = AuthConfig {
        tokens: TokenPolicy {
            invitation_ttl: Duration::days(1_000_000_000),
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = AuthEngine::in_memory(&config);
    let now = Utc::now();

    assert!(matches!(
        engine.issue_token(ALICE, TokenKind::Invitation, now),
        Err(TokenError::ExpiryOutOfRange { kind: TokenKind::Invitation, .. })
    ));
    engine.issue_token(ALICE, TokenKind::PasswordReset, now).unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tenant removal
// ─────────────────────────────────────────────────────────────────────────────

fn place_acme(engine: &Engine) {
    let datastore = DatastoreId::new(5);
    engine
        .register_tenant(&Tenant::new(ACME, "acme").with_datastore(datastore))
        .unwrap();
    engine.datastore().place_tenant(ACME, datastore).unwrap();
    for key in ["a", "b", "c"] {
        engine.datastore().insert_row(OrgRecord {
            tenant_id: ACME,
            key: key.to_string(),
            payload: serde_json::json!({ "key": key }),
        })
        .unwrap();
    }
}

#[test]
fn removal_deletes_tenant_assignments_and_rows() {
    let engine = setup();
    place_acme(&engine);
    let member = role_named(&engine, system_roles::ORG_MEMBER);
    engine.assign_role(Some(ALICE), member.id, Some(ACME)).unwrap();
    engine.assign_role(None, member.id, Some(ACME)).unwrap();
    let admin = engine.resolve(ADMIN).unwrap();

    assert_eq!(engine.remove_tenant(&admin, ACME).unwrap(), TenantPhase::Removed);
    assert_eq!(engine.tenant_phase(ACME).unwrap(), TenantPhase::Removed);
    assert_eq!(engine.datastore().row_count(ACME).unwrap(), 0);
    assert!(!engine.datastore().constraints_present(DatastoreId::new(5)));
    assert!(engine.resolve(ALICE).unwrap().tenant_privileges.is_empty());

    // Repeating the removal is a no-op.
    assert_eq!(engine.remove_tenant(&admin, ACME).unwrap(), TenantPhase::Removed);
    assert_eq!(engine.tenant_phase(GLOBEX).unwrap(), TenantPhase::Active);
}

#[test]
fn removal_resumes_after_failed_constraint_drop() {
    let engine = setup();
    place_acme(&engine);
    let member = role_named(&engine, system_roles::ORG_MEMBER);
    engine.assign_role(Some(ADMIN), member.id, Some(ACME)).unwrap();
    let admin = engine.resolve(ADMIN).unwrap();

    engine.datastore().fail_next(FailPoint::DropConstraints);
    let err = engine.remove_tenant(&admin, ACME).unwrap_err();
    assert_eq!(err.step, RemovalStep::DropSchemaConstraints);
    assert_eq!(err.committed, TenantPhase::SchemaMarkedDeleted);
    assert_eq!(engine.tenant_phase(ACME).unwrap(), TenantPhase::SchemaMarkedDeleted);
    assert_eq!(engine.datastore().row_count(ACME).unwrap(), 3);

    // Pending removal refuses every operation in the tenant, even for a
    // global administrator and even for unrestricted entity types.
    assert_eq!(
        engine.authorize(ADMIN, "org_data", Operation::Read, Some(ACME)),
        Err(AuthzError::TenantPendingRemoval(ACME))
    );
    assert_eq!(
        engine.authorize(ADMIN, "frontend_resource", Operation::Read, Some(ACME)),
        Err(AuthzError::TenantPendingRemoval(ACME))
    );
    engine.authorize(ADMIN, "org_data", Operation::Read, Some(GLOBEX)).unwrap();

    assert_eq!(engine.remove_tenant(&admin, ACME).unwrap(), TenantPhase::Removed);
    assert_eq!(engine.datastore().row_count(ACME).unwrap(), 0);
}

#[test]
fn removal_resumes_after_failed_purge() {
    let engine = setup();
    place_acme(&engine);
    let admin = engine.resolve(ADMIN).unwrap();

    engine.datastore().fail_next(FailPoint::Purge);
    let err = engine.remove_tenant(&admin, ACME).unwrap_err();
    assert_eq!(err.step, RemovalStep::RemoveTenant);
    assert_eq!(err.committed, TenantPhase::ConstraintsDropped);
    assert_eq!(engine.tenant_phase(ACME).unwrap(), TenantPhase::ConstraintsDropped);

    assert_eq!(engine.remove_tenant(&admin, ACME).unwrap(), TenantPhase::Removed);
}

#[test]
fn tenant_without_datastore_is_removed() {
    let engine = setup();
    let admin = engine.resolve(ADMIN).unwrap();
    assert_eq!(engine.remove_tenant(&admin, GLOBEX).unwrap(), TenantPhase::Removed);
}

#[test]
fn removal_requires_organization_management() {
    let engine = setup();
    let requester = engine.resolve(ALICE).unwrap();
    let err = engine.remove_tenant(&requester, ACME).unwrap_err();
    assert_eq!(err.step, RemovalStep::MarkSchemaDeleted);
    assert_eq!(err.committed, TenantPhase::Active);
    assert_eq!(err.source, LifecycleError::Forbidden(builtin::CAN_MANAGE_ORGANIZATIONS));
    assert_eq!(engine.tenant_phase(ACME).unwrap(), TenantPhase::Active);
}

#[test]
fn constraint_drop_requires_step_one_result_for_same_tenant() {
    let engine = setup();
    place_acme(&engine);
    let admin = engine.resolve(ADMIN).unwrap();
    let lifecycle = engine.lifecycle();

    let globex_marked = lifecycle.mark_schema_deleted(&admin, GLOBEX, None).unwrap();
    let err = lifecycle
        .drop_schema_constraints(&admin, ACME, &globex_marked, Some(DatastoreId::new(5)))
        .unwrap_err();
    assert!(matches!(err, LifecycleError::StepResultMismatch { .. }));

    assert!(matches!(
        lifecycle.remove_tenant(&admin, ACME),
        Err(LifecycleError::OutOfOrder { .. })
    ));
}

#[test]
fn repeated_mark_schema_deleted_changes_nothing() {
    let engine = setup();
    place_acme(&engine);
    let admin = engine.resolve(ADMIN).unwrap();
    let lifecycle = engine.lifecycle();
    let datastore = Some(DatastoreId::new(5));

    let first = lifecycle.mark_schema_deleted(&admin, ACME, datastore).unwrap();
    let after_first = engine.store().get_tenant(ACME).unwrap().unwrap();
    let second = lifecycle.mark_schema_deleted(&admin, ACME, datastore).unwrap();
    let after_second = engine.store().get_tenant(ACME).unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(after_first, after_second);
    assert_eq!(engine.tenant_phase(ACME).unwrap(), TenantPhase::SchemaMarkedDeleted);

    lifecycle.drop_schema_constraints(&admin, ACME, &second, datastore).unwrap();
    let removed = lifecycle.remove_tenant(&admin, ACME).unwrap();
    assert!(removed.removed);
    assert_eq!(removed.purged_rows, 3);
    assert_eq!(engine.tenant_phase(ACME).unwrap(), TenantPhase::Removed);
}

// ─────────────────────────────────────────────────────────────────────────────
// Guarded tenant rows
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn guarded_store_checks_before_touching_rows() {
    let engine = setup();
    let member = role_named(&engine, system_roles::ORG_MEMBER);
    let org_admin = role_named(&engine, system_roles::ORG_ADMIN);
    engine.assign_role(Some(ALICE), member.id, Some(ACME)).unwrap();
    engine.assign_role(Some(BOB), org_admin.id, Some(ACME)).unwrap();

    let rows: GuardedTenantStore<_, _, String, OrgRecord> =
        GuardedTenantStore::new(engine.gate(), engine.datastore().rows());
    let alice = engine.resolve(ALICE).unwrap();
    let bob = engine.resolve(BOB).unwrap();
    let record = OrgRecord {
        tenant_id: ACME,
        key: "plan".to_string(),
        payload: serde_json::json!({ "tier": "gold" }),
    };

    let denied = rows.upsert(&alice, ACME, "plan".to_string(), record.clone()).unwrap_err();
    assert!(matches!(denied, AccessError::Denied(AuthzError::Forbidden { .. })));

    rows.upsert(&bob, ACME, "plan".to_string(), record.clone()).unwrap();
    assert_eq!(rows.get(&alice, ACME, &"plan".to_string()).unwrap(), Some(record));
    assert_eq!(rows.get(&alice, ACME, &"missing".to_string()).unwrap(), None);
    assert_eq!(rows.list(&alice, ACME).unwrap().len(), 1);

    assert!(matches!(
        rows.list(&alice, GLOBEX),
        Err(AccessError::Denied(AuthzError::Forbidden { .. }))
    ));
}

#[test]
fn guarded_upsert_refuses_row_from_another_tenant() {
    let engine = setup();
    let org_admin = role_named(&engine, system_roles::ORG_ADMIN);
    engine.assign_role(Some(BOB), org_admin.id, Some(ACME)).unwrap();
    engine.assign_role(Some(BOB), org_admin.id, Some(GLOBEX)).unwrap();

    let rows: GuardedTenantStore<_, _, String, OrgRecord> =
        GuardedTenantStore::new(engine.gate(), engine.datastore().rows());
    let bob = engine.resolve(BOB).unwrap();
    let foreign = OrgRecord {
        tenant_id: GLOBEX,
        key: "plan".to_string(),
        payload: serde_json::json!({ "tier": "gold" }),
    };

    assert_eq!(
        rows.upsert(&bob, ACME, "plan".to_string(), foreign.clone()).unwrap_err(),
        AccessError::TenantMismatch { partition: ACME, row: GLOBEX }
    );
    assert!(rows.list(&bob, ACME).unwrap().is_empty());

    rows.upsert(&bob, GLOBEX, "plan".to_string(), foreign).unwrap();
    assert_eq!(rows.list(&bob, GLOBEX).unwrap().len(), 1);
}
