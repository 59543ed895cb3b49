//! `evently-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the catalog and
//! registration modules (no infrastructure concerns).

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use clock::{Clock, FixedClock, MonotonicClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{EventId, RegistrationId, UserId};
pub use value_object::ValueObject;
