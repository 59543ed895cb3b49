//! Capacity admission rule.

use evently_catalog::Seats;

use crate::RegistrationStatus;

/// Outcome of admitting a new registrant against an event's seats.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A seat is taken; the counter moves to `registered_count`.
    Confirmed { registered_count: u32 },
    /// Event is full; the counter is unchanged.
    Waitlisted,
}

impl Admission {
    pub fn status(&self) -> RegistrationStatus {
        match self {
            Admission::Confirmed { .. } => RegistrationStatus::Confirmed,
            Admission::Waitlisted => RegistrationStatus::Waitlisted,
        }
    }
}

/// Confirm while `registered_count < capacity`, otherwise waitlist.
pub fn decide_admission(seats: Seats) -> Admission {
    if seats.has_free_seat() {
        Admission::Confirmed {
            registered_count: seats.registered_count() + 1,
        }
    } else {
        Admission::Waitlisted
    }
}
