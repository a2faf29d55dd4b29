//! Encoded privilege sets.
//!
//! A set is persisted as one string column of the form `(P1)(P2)(P3)`. Order
//! carries no meaning, but encoding is sorted so stored values diff cleanly.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use gatehouse_core::{DomainError, DomainResult, ValueObject};

use crate::Privilege;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivilegeSet(BTreeSet<Privilege>);

impl PrivilegeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, privilege: &Privilege) -> bool {
        self.0.contains(privilege)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Privilege> {
        self.0.iter()
    }

    /// Returns `true` if the privilege was not present.
    pub fn insert(&mut self, privilege: Privilege) -> bool {
        self.0.insert(privilege)
    }

    /// Returns `true` if the privilege was present.
    pub fn remove(&mut self, privilege: &Privilege) -> bool {
        self.0.remove(privilege)
    }

    /// Union `other` into `self`.
    pub fn extend_from(&mut self, other: &PrivilegeSet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Replace `old` with `new`. Returns `true` if `old` was present.
    ///
    /// Equivalent to substituting `(OLD)` by `(NEW)` in the encoded form, but
    /// operates on whole identifiers so a name that merely contains `OLD` is
    /// never touched.
    pub fn rename(&mut self, old: &Privilege, new: &Privilege) -> bool {
        if !self.0.remove(old) {
            return false;
        }
        self.0.insert(new.clone());
        true
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        for privilege in &self.0 {
            out.push('(');
            out.push_str(privilege.as_str());
            out.push(')');
        }
        out
    }

    pub fn decode(encoded: &str) -> DomainResult<Self> {
        if encoded.is_empty() {
            return Ok(Self::new());
        }

        let inner = encoded
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| {
                DomainError::validation(format!("malformed privilege set '{encoded}'"))
            })?;

        inner
            .split(")(")
            .map(|name| Privilege::parse(name.to_string()))
            .collect::<DomainResult<BTreeSet<_>>>()
            .map(Self)
    }
}

impl ValueObject for PrivilegeSet {}

impl FromIterator<Privilege> for PrivilegeSet {
    fn from_iter<I: IntoIterator<Item = Privilege>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PrivilegeSet {
    type Item = &'a Privilege;
    type IntoIter = std::collections::btree_set::Iter<'a, Privilege>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Rename a privilege inside an encoded column value.
///
/// This is the bulk-migration primitive: stores apply it to every role row.
/// Returns `None` when the value does not contain `old` (row unchanged).
pub fn rename_encoded(
    encoded: &str,
    old: &Privilege,
    new: &Privilege,
) -> DomainResult<Option<String>> {
    let mut set = PrivilegeSet::decode(encoded)?;
    if set.rename(old, new) {
        Ok(Some(set.encode()))
    } else {
        Ok(None)
    }
}
