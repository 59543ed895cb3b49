use async_trait::async_trait;
use thiserror::Error;

use evently_catalog::{Event, EventDetails, EventQuery, Page, Seats};
use evently_core::{EventId, RegistrationId, UserId};
use evently_registration::{Registration, RegistrationStatus};

/// Storage operation error.
///
/// These are **infrastructure errors** (missing rows, stale compare-and-set,
/// uniqueness conflicts, backend failures) as opposed to domain errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// The seat compare-and-set saw different values than expected.
    #[error("seat counters for event {0} changed concurrently")]
    StaleSeats(EventId),

    /// A uniqueness constraint rejected the write.
    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One registration row written as part of a [`LedgerCommit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationWrite {
    Insert(Registration),
    /// Status change of an existing row. Applied only while the stored row
    /// still has status `from`; otherwise the whole commit is stale.
    Update {
        registration: Registration,
        from: RegistrationStatus,
    },
}

impl RegistrationWrite {
    pub fn update(registration: Registration, from: RegistrationStatus) -> Self {
        RegistrationWrite::Update { registration, from }
    }

    pub fn registration(&self) -> &Registration {
        match self {
            RegistrationWrite::Insert(r) | RegistrationWrite::Update { registration: r, .. } => r,
        }
    }

    pub fn into_registration(self) -> Registration {
        match self {
            RegistrationWrite::Insert(r) | RegistrationWrite::Update { registration: r, .. } => r,
        }
    }
}

/// Atomic unit of work over both stores.
///
/// ## Semantics
///
/// The store applies the commit **all or nothing**:
/// - compare-and-set the event's seats from `expected` to `next`
///   (both capacity and registered count must still equal `expected`)
/// - apply every registration write, each update guarded by the row's
///   prior status
///
/// If the seats moved or any updated row is no longer in its prior status,
/// nothing is written and `StoreError::StaleSeats` is returned; the caller
/// re-reads and decides again. Row guards cover commits that leave the seat
/// counter unchanged, such as a cancel that promotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCommit {
    pub event_id: EventId,
    pub expected: Seats,
    pub next: Seats,
    pub writes: Vec<RegistrationWrite>,
}

/// Store of listed events.
///
/// Seat counters are never written through the detail/publish operations;
/// they move only through [`RegistrationLedger::commit`] and
/// [`EventStore::try_set_registered_count`].
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError>;

    async fn insert_event(&self, event: Event) -> Result<Event, StoreError>;

    /// Replace the descriptive fields of an event.
    async fn update_details(&self, event_id: EventId, details: EventDetails) -> Result<Event, StoreError>;

    async fn set_published(&self, event_id: EventId, published: bool) -> Result<Event, StoreError>;

    /// Published events matching the query, date ascending.
    async fn list_events(&self, query: &EventQuery) -> Result<Page<Event>, StoreError>;

    /// Compare-and-set on the registered counter alone.
    ///
    /// Returns `false` (and writes nothing) when the stored value is not
    /// `expected`.
    async fn try_set_registered_count(
        &self,
        event_id: EventId,
        expected: u32,
        new: u32,
    ) -> Result<bool, StoreError>;
}

/// Store of registration records.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn get_registration(&self, id: RegistrationId) -> Result<Option<Registration>, StoreError>;

    /// The (user, event) registration that is not cancelled, if any.
    async fn find_non_cancelled(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<Option<Registration>, StoreError>;

    /// Insert a new registration. Rejects a second active (user, event) row
    /// with `StoreError::Duplicate`.
    async fn insert_registration(&self, registration: Registration) -> Result<Registration, StoreError>;

    /// Overwrite a registration's status, provided the stored row is still
    /// in `from`. A row that has moved on yields `StoreError::StaleSeats`.
    async fn update_registration(&self, registration: &Registration, from: RegistrationStatus) -> Result<(), StoreError>;

    /// Waitlisted registrations of an event in promotion order
    /// (`registered_at` ascending, id ascending), at most `limit`.
    async fn list_waitlisted(&self, event_id: EventId, limit: usize) -> Result<Vec<Registration>, StoreError>;

    async fn find_oldest_waitlisted(&self, event_id: EventId) -> Result<Option<Registration>, StoreError> {
        Ok(self.list_waitlisted(event_id, 1).await?.into_iter().next())
    }

    /// All registrations of a user, newest first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Registration>, StoreError>;

    /// All registrations of an event, newest first.
    async fn list_for_event(&self, event_id: EventId) -> Result<Vec<Registration>, StoreError>;

    async fn count_confirmed(&self, event_id: EventId) -> Result<u32, StoreError>;
}

/// Both stores plus the atomic commit spanning them.
#[async_trait]
pub trait RegistrationLedger: EventStore + RegistrationStore {
    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError>;

    /// Liveness check of the backing storage.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Human-readable backend name (for health output and logs).
    fn backend(&self) -> &'static str;
}
