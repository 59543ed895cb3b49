use evently_auth::Role;
use evently_core::UserId;

/// Authenticated caller of a request (identity + role from the bearer token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user_id: UserId,
    role: Role,
}

impl PrincipalContext {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }
}
