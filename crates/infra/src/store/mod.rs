//! Event + registration storage boundary.
//!
//! Defines the store contracts consumed by the registration engine and the
//! catalog service, with an in-memory implementation (tests/dev) and a
//! Postgres implementation (production).

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use r#trait::{
    EventStore, LedgerCommit, RegistrationLedger, RegistrationStore, RegistrationWrite, StoreError,
};
