//! Infrastructure layer: storage, per-event locking, and the services that
//! orchestrate domain logic over them.

pub mod catalog;
pub mod engine;
pub mod locks;
pub mod store;

pub use catalog::{EventCatalog, EventView};
pub use engine::{
    CancelOutcome, CapacityChange, DEFAULT_MAX_ATTEMPTS, EngineConfig, ReconcileReport,
    RegistrationEngine, RegistrationError, RegistrationView,
};
pub use locks::{EventGuard, EventLocks};
pub use store::{
    EventStore, InMemoryLedger, LedgerCommit, PostgresLedger, RegistrationLedger, RegistrationStore,
    RegistrationWrite, StoreError,
};
