use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use gatehouse_core::{DomainError, DomainResult, ValueObject};

/// Privilege identifier.
///
/// Privileges are opaque strings (e.g. "canReadOrgData"). They are stored
/// inside parenthesised encoded sets, so an identifier may never contain `(`
/// or `)` and may never be empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Privilege(Cow<'static, str>);

impl Privilege {
    /// Build a privilege from a trusted identifier (built-ins, literals).
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Build a privilege from untrusted input, rejecting identifiers the
    /// encoded set format cannot carry.
    pub fn parse(name: impl Into<Cow<'static, str>>) -> DomainResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(DomainError::validation("privilege name cannot be empty"));
        }
        if name.contains('(') || name.contains(')') {
            return Err(DomainError::validation(format!(
                "privilege name '{name}' cannot contain parentheses"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Privilege {}

impl core::fmt::Display for Privilege {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Built-in privilege identifiers.
pub mod builtin {
    use super::Privilege;

    pub const CAN_READ_ORG_DATA: Privilege = Privilege::from_static("canReadOrgData");
    pub const CAN_MANAGE_ORG_DATA: Privilege = Privilege::from_static("canManageOrgData");
    pub const CAN_READ_USER_DATA: Privilege = Privilege::from_static("canReadUserData");
    pub const CAN_MANAGE_USER_DATA: Privilege = Privilege::from_static("canManageUserData");
    pub const CAN_MANAGE_USER_ROLES: Privilege = Privilege::from_static("canManageUserRoles");
    pub const CAN_READ_BACKEND: Privilege = Privilege::from_static("canReadBackend");
    pub const CAN_MANAGE_BACKEND: Privilege = Privilege::from_static("canManageBackend");
    pub const CAN_ACCESS_GLOBAL_SETTINGS: Privilege =
        Privilege::from_static("canAccessGlobalSettings");
    pub const CAN_IMPERSONATE: Privilege = Privilege::from_static("canImpersonate");
    pub const CAN_RESET_PASSWORD: Privilege = Privilege::from_static("canResetPassword");
    pub const CAN_READ_ORG_AUDIT: Privilege = Privilege::from_static("canReadOrgAudit");
    pub const CAN_MANAGE_ORGANIZATIONS: Privilege =
        Privilege::from_static("canManageOrganizations");

    /// Privilege required to delete roles.
    pub const ROLE_MANAGEMENT: Privilege = CAN_MANAGE_USER_ROLES;
}

/// Display metadata for a privilege.
#[derive(Debug, Clone, Serialize)]
pub struct PrivilegeDefinition {
    pub privilege: Privilege,
    pub category: &'static str,
    pub description: &'static str,
}

/// Registry of the built-in privileges, grouped by display category.
///
/// Categories are presentation only; they never take part in evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct PrivilegeCatalog {
    definitions: Vec<PrivilegeDefinition>,
}

impl PrivilegeCatalog {
    pub fn builtin() -> Self {
        use builtin::*;

        let entries = [
            (CAN_READ_ORG_DATA, "organization", "View organization data"),
            (CAN_MANAGE_ORG_DATA, "organization", "Create/update/delete organization data"),
            (CAN_READ_ORG_AUDIT, "organization", "View the organization audit trail"),
            (CAN_READ_USER_DATA, "user", "View user accounts"),
            (CAN_MANAGE_USER_DATA, "user", "Create/update/delete user accounts"),
            (CAN_MANAGE_USER_ROLES, "user", "Grant, revoke and delete roles"),
            (CAN_RESET_PASSWORD, "user", "Issue password reset links for other users"),
            (CAN_IMPERSONATE, "user", "Act as another user"),
            (CAN_READ_BACKEND, "admin", "View administrative backend"),
            (CAN_MANAGE_BACKEND, "admin", "Change administrative backend"),
            (CAN_ACCESS_GLOBAL_SETTINGS, "admin", "Change system-wide settings"),
            (CAN_MANAGE_ORGANIZATIONS, "admin", "Provision and remove organizations"),
        ];

        Self {
            definitions: entries
                .into_iter()
                .map(|(privilege, category, description)| PrivilegeDefinition {
                    privilege,
                    category,
                    description,
                })
                .collect(),
        }
    }

    pub fn get(&self, privilege: &Privilege) -> Option<&PrivilegeDefinition> {
        self.definitions.iter().find(|d| &d.privilege == privilege)
    }

    pub fn contains(&self, privilege: &Privilege) -> bool {
        self.get(privilege).is_some()
    }

    /// All definitions grouped by category (categories sorted by name).
    pub fn by_category(&self) -> BTreeMap<&'static str, Vec<&PrivilegeDefinition>> {
        let mut grouped: BTreeMap<&'static str, Vec<&PrivilegeDefinition>> = BTreeMap::new();
        for def in &self.definitions {
            grouped.entry(def.category).or_default().push(def);
        }
        grouped
    }

    pub fn iter(&self) -> impl Iterator<Item = &PrivilegeDefinition> {
        self.definitions.iter()
    }
}
