//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Privileges and privilege sets are values: two sets holding the same
/// identifiers are interchangeable regardless of where they were decoded from.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
