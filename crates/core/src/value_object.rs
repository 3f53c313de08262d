//! Value object trait: equality by value, not identity.
//!
//! Value objects have **no identity**. `Money` and `Quantity` are the two the
//! marketplace uses everywhere; quote terms and reconciliation variances are
//! value objects too.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new one (e.g. `Money::checked_add` returns a fresh value).
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
