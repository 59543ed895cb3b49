//! Registration domain module.
//!
//! The per-registration state machine and the admission rule, implemented as
//! deterministic domain logic (no IO, no locking, no storage). Orchestration
//! across the event and registration stores lives in `evently-infra`.

pub mod admission;
pub mod registration;

pub use admission::{Admission, decide_admission};
pub use registration::{
    DEFAULT_CANCELLATION_REASON, Registration, RegistrationStatus, waitlist_order,
};
