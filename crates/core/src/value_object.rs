//! Value object trait: equality by value, not identity.
//!
//! Value objects have **no identity**; two value objects with the same
//! attributes are the same value (e.g. a `Capacity` of 50 seats).

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by value. To "modify" one, build
/// a new one. The trait requires:
/// - **Clone**: values are cheap to copy
/// - **PartialEq**: compared by attribute values
/// - **Debug**: usable in logs and test assertions
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
