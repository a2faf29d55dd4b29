// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

use serde::Serialize;

use gatehouse_core::{PrincipalId, TenantId};

use crate::policy::{EntityAccessPolicy, Operation, RequiredPrivilege};
use crate::resolver::{GrantScope, ResolvedAuthority};

/// Detailed explanation of an authorization decision.
///
/// Answers "why was this request allowed/denied?" for audit logs and admin
/// tooling. It never changes the decision made by [`crate::authorize`].
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub entity_type: String,
    pub operation: Operation,
    /// `None` when the operation is unrestricted.
    pub required_privilege: Option<String>,
    pub tenant_id: Option<TenantId>,
    pub granted: bool,
    /// Bucket that satisfied the check, if granted by a privilege.
    pub granted_by: Option<GrantScope>,
    pub reason: String,
    pub principal: PrincipalState,
    pub denial_reason: Option<DenialReason>,
}

/// Snapshot of the principal's effective privileges in the checked context.
#[derive(Debug, Clone, Serialize)]
pub struct PrincipalState {
    pub principal_id: PrincipalId,
    pub global_privileges: Vec<String>,
    pub tenant_privileges: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    TenantPendingRemoval,
    MissingPermission,
}

/// Explain the decision for one operation.
///
/// `tenant_pending_removal` is the `schema_deleted` flag of the target tenant,
/// as read by the caller.
pub fn explain(
    authority: &ResolvedAuthority,
    policy: &EntityAccessPolicy,
    operation: Operation,
    tenant_id: Option<TenantId>,
    tenant_pending_removal: bool,
) -> AuthorizationExplanation {
    let principal = PrincipalState {
        principal_id: authority.principal_id,
        global_privileges: authority
            .global_privileges
            .iter()
            .map(|p| p.as_str().to_string())
            .collect(),
        tenant_privileges: tenant_id
            .and_then(|t| authority.tenant_privileges.get(&t))
            .map(|set| set.iter().map(|p| p.as_str().to_string()).collect())
            .unwrap_or_default(),
    };

    let required = match policy.required(operation) {
        RequiredPrivilege::Unrestricted => None,
        RequiredPrivilege::Privilege(p) => Some(p),
    };

    let mut explanation = AuthorizationExplanation {
        entity_type: policy.entity_type.to_string(),
        operation,
        required_privilege: required.map(|p| p.as_str().to_string()),
        tenant_id,
        granted: false,
        granted_by: None,
        reason: String::new(),
        principal,
        denial_reason: None,
    };

    if let (true, Some(tenant_id)) = (tenant_pending_removal, tenant_id) {
        explanation.reason = format!("Tenant {tenant_id} is being removed; all access is refused");
        explanation.denial_reason = Some(DenialReason {
            kind: DenialKind::TenantPendingRemoval,
            message: "The target tenant has schema_deleted set".to_string(),
            suggestions: vec![
                "Complete or resume the tenant removal sequence".to_string(),
            ],
        });
        return explanation;
    }

    let Some(required) = required else {
        explanation.granted = true;
        explanation.reason = format!("{operation} on '{}' is unrestricted", policy.entity_type);
        return explanation;
    };

    match authority.grant_scope(required, tenant_id) {
        Some(scope) => {
            explanation.granted = true;
            explanation.granted_by = Some(scope);
            explanation.reason = match scope {
                GrantScope::Global => format!("Principal holds '{required}' globally"),
                GrantScope::Tenant(t) => format!("Principal holds '{required}' in tenant {t}"),
            };
        }
        None => {
            let mut suggestions = vec![format!(
                "Assign a role granting '{required}' globally"
            )];
            if let Some(t) = tenant_id {
                suggestions.push(format!("Assign a role granting '{required}' in tenant {t}"));
                suggestions.push(format!(
                    "Add '{required}' to a default role of tenant {t}"
                ));
            }
            explanation.reason = format!("Principal does not hold '{required}'");
            explanation.denial_reason = Some(DenialReason {
                kind: DenialKind::MissingPermission,
                message: format!("Missing required privilege: '{required}'"),
                suggestions,
            });
        }
    }

    explanation
}
