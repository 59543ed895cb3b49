//! Access guard: who may manage an event and the registrations under it.
//!
//! - No IO
//! - No panics
//! - No business logic (pure policy check)
//!
//! Cancelling a registration is deliberately *not* routed through here; only
//! the registrant may cancel their own registration.

use evently_core::UserId;

use crate::Role;

/// True if the actor owns the resource or is an admin.
pub fn can_manage(actor_role: &Role, actor_id: UserId, resource_owner_id: UserId) -> bool {
    let allowed = actor_id == resource_owner_id || actor_role.is_admin();
    if !allowed {
        tracing::debug!(
            actor_id = %actor_id,
            role = %actor_role,
            owner_id = %resource_owner_id,
            "access guard denied management"
        );
    }
    allowed
}

/// True if the actor may publish a new event.
pub fn can_create_event(actor_role: &Role) -> bool {
    actor_role.is_organizer() || actor_role.is_admin()
}
