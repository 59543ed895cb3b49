use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role carried in the caller's token.
///
/// Roles stay opaque strings on the wire so an identity provider can mint
/// roles this service does not know about; those simply grant nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Plain attendee.
    pub const USER: Role = Role(Cow::Borrowed("user"));
    /// May publish events and manage the events they own.
    pub const ORGANIZER: Role = Role(Cow::Borrowed("organizer"));
    /// May manage every event.
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self) -> bool {
        self.as_str() == Self::ADMIN.as_str()
    }

    pub fn is_organizer(&self) -> bool {
        self.as_str() == Self::ORGANIZER.as_str()
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::USER
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
