//! Event catalog domain module.
//!
//! Listed events, their seat bookkeeping, and the public listing query. Pure
//! domain logic: no IO, no HTTP, no storage.

pub mod event;
pub mod query;

pub use event::{
    Capacity, Event, EventCategory, EventDetails, EventDetailsPatch, NewEvent, Seats,
};
pub use query::{EventQuery, Page};
