//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Events and registrations are entities: a registration stays the same
/// registration while its status moves from waitlisted to confirmed.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
