//! Registration engine: admission, cancellation and waitlist promotion.
//!
//! ## Execution flow
//!
//! ```text
//! request
//!   ↓
//! 1. acquire the event's lock (fair, per event)
//!   ↓
//! 2. read event + registrations
//!   ↓
//! 3. decide (pure domain logic: admission rule, transition table)
//!   ↓
//! 4. one LedgerCommit (seat compare-and-set + registration writes)
//!   ↓
//! 5. on a stale compare-and-set, re-read and decide again (bounded)
//! ```
//!
//! Every mutation of an event's seats goes through exactly one commit, so a
//! failure at any step leaves nothing half-written.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use evently_auth::{Role, can_manage};
use evently_catalog::{Capacity, Event, Seats};
use evently_core::{
    Clock, DomainError, EventId, MonotonicClock, RegistrationId, SystemClock, UserId,
};
use evently_registration::{Admission, Registration, RegistrationStatus, decide_admission};

use crate::locks::EventLocks;
use crate::store::{LedgerCommit, RegistrationLedger, RegistrationWrite, StoreError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("already registered for this event")]
    AlreadyRegistered,

    #[error("not allowed to perform this action")]
    Forbidden,

    /// Another writer moved the event's seat counters on every attempt.
    #[error("seat counters for event {0} kept changing; try again")]
    CapacityRaceLost(EventId),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Storage(StoreError),
}

impl From<DomainError> for RegistrationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => RegistrationError::Validation(msg),
            DomainError::InvariantViolation(msg) | DomainError::InvalidTransition(msg) => {
                RegistrationError::InvalidState(msg)
            }
        }
    }
}

impl From<StoreError> for RegistrationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::StaleSeats(event_id) => RegistrationError::CapacityRaceLost(event_id),
            StoreError::Duplicate(_) => RegistrationError::AlreadyRegistered,
            StoreError::NotFound(what) => RegistrationError::NotFound(what),
            other => RegistrationError::Storage(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Attempts per operation before a stale compare-and-set is surfaced as
    /// `CapacityRaceLost` (at least 1).
    pub max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub cancelled: Registration,
    /// The waitlisted registration that took the freed seat, if any.
    pub promoted: Option<Registration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityChange {
    pub event: Event,
    pub promoted: Vec<Registration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub event_id: EventId,
    /// Counter value found on the event.
    pub previous: u32,
    /// Number of confirmed registrations.
    pub actual: u32,
    pub repaired: bool,
}

/// A user's registration together with its event, when the event still exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationView {
    #[serde(flatten)]
    pub registration: Registration,
    pub event: Option<Event>,
}

pub struct RegistrationEngine<L: RegistrationLedger + ?Sized> {
    ledger: Arc<L>,
    locks: EventLocks,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl<L: RegistrationLedger + ?Sized> std::fmt::Debug for RegistrationEngine<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationEngine")
            .field("backend", &self.ledger.backend())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<L: RegistrationLedger + ?Sized> RegistrationEngine<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self {
            ledger,
            locks: EventLocks::new(),
            clock: Arc::new(MonotonicClock::new(SystemClock)),
            config: EngineConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = EngineConfig {
            max_attempts: config.max_attempts.max(1),
        };
        self
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// The per-event lock table every seat-moving operation runs under.
    pub(crate) fn locks(&self) -> &EventLocks {
        &self.locks
    }

    /// Register `user_id` for `event_id`: confirmed while seats remain,
    /// waitlisted otherwise.
    #[instrument(skip(self), fields(user_id = %user_id, event_id = %event_id), err)]
    pub async fn register(&self, user_id: UserId, event_id: EventId) -> Result<Registration, RegistrationError> {
        let _guard = self.locks.acquire(event_id).await;
        let registration = self
            .retrying("register", event_id, move || self.try_register(user_id, event_id))
            .await?;

        info!(
            event_id = %event_id,
            registration_id = %registration.id,
            user_id = %user_id,
            status = %registration.status(),
            "registration created"
        );
        Ok(registration)
    }

    async fn try_register(&self, user_id: UserId, event_id: EventId) -> Result<Registration, RegistrationError> {
        let event = self.load_event(event_id).await?;
        if !event.is_published {
            return Err(RegistrationError::InvalidState(format!(
                "event {event_id} is not open for registration"
            )));
        }
        if self.ledger.find_non_cancelled(user_id, event_id).await?.is_some() {
            return Err(RegistrationError::AlreadyRegistered);
        }

        let seats = event.seats();
        let admission = decide_admission(seats);
        let next = match admission {
            Admission::Confirmed { registered_count } => seats.with_registered_count(registered_count)?,
            Admission::Waitlisted => seats,
        };

        let registration = Registration::admit(
            RegistrationId::new(),
            user_id,
            event_id,
            admission,
            self.clock.now(),
        );

        self.ledger
            .commit(LedgerCommit {
                event_id,
                expected: seats,
                next,
                writes: vec![RegistrationWrite::Insert(registration.clone())],
            })
            .await?;

        Ok(registration)
    }

    /// Cancel the requester's own registration; a freed confirmed seat goes
    /// to the oldest waitlisted registration of the same event.
    #[instrument(skip(self, reason), fields(registration_id = %registration_id, user_id = %requester_id), err)]
    pub async fn cancel(
        &self,
        registration_id: RegistrationId,
        requester_id: UserId,
        reason: Option<&str>,
    ) -> Result<CancelOutcome, RegistrationError> {
        let registration = self.load_registration(registration_id).await?;
        if registration.user_id != requester_id {
            return Err(RegistrationError::Forbidden);
        }
        let event_id = registration.event_id;

        let _guard = self.locks.acquire(event_id).await;
        let outcome = self
            .retrying("cancel", event_id, move || {
                self.try_cancel(registration_id, requester_id, reason)
            })
            .await?;

        info!(
            event_id = %event_id,
            registration_id = %registration_id,
            user_id = %requester_id,
            status = %outcome.cancelled.status(),
            "registration cancelled"
        );
        if let Some(promoted) = &outcome.promoted {
            info!(
                event_id = %event_id,
                registration_id = %promoted.id,
                user_id = %promoted.user_id,
                status = %promoted.status(),
                "waitlisted registration promoted"
            );
        }
        Ok(outcome)
    }

    async fn try_cancel(
        &self,
        registration_id: RegistrationId,
        requester_id: UserId,
        reason: Option<&str>,
    ) -> Result<CancelOutcome, RegistrationError> {
        let mut registration = self.load_registration(registration_id).await?;
        if registration.user_id != requester_id {
            return Err(RegistrationError::Forbidden);
        }
        let event_id = registration.event_id;
        let event = self.load_event(event_id).await?;
        let seats = event.seats();

        let prior = registration.cancel(reason)?;
        let mut writes = vec![RegistrationWrite::update(registration.clone(), prior)];
        let mut next = seats;
        let mut promoted = None;

        if prior == RegistrationStatus::Confirmed {
            let freed = Seats::from_storage(seats.capacity(), seats.registered_count().saturating_sub(1));
            next = freed;

            if freed.has_free_seat() {
                if let Some(mut candidate) = self.ledger.find_oldest_waitlisted(event_id).await? {
                    candidate.promote()?;
                    next = Seats::from_storage(seats.capacity(), freed.registered_count() + 1);
                    writes.push(RegistrationWrite::update(candidate.clone(), RegistrationStatus::Waitlisted));
                    promoted = Some(candidate);
                }
            }
        }

        self.ledger
            .commit(LedgerCommit {
                event_id,
                expected: seats,
                next,
                writes,
            })
            .await?;

        Ok(CancelOutcome {
            cancelled: registration,
            promoted,
        })
    }

    /// Resize an event. Growth promotes waitlisted registrations FIFO into
    /// the new seats; shrinking below the confirmed count is refused.
    #[instrument(skip(self, role), fields(event_id = %event_id, user_id = %requester_id), err)]
    pub async fn change_capacity(
        &self,
        event_id: EventId,
        requester_id: UserId,
        role: &Role,
        new_capacity: u32,
    ) -> Result<CapacityChange, RegistrationError> {
        let _guard = self.locks.acquire(event_id).await;
        let change = self
            .retrying("change_capacity", event_id, move || {
                self.try_change_capacity(event_id, requester_id, role, new_capacity)
            })
            .await?;

        info!(
            event_id = %event_id,
            capacity = new_capacity,
            registered_count = change.event.registered_count(),
            promoted = change.promoted.len(),
            "event capacity changed"
        );
        Ok(change)
    }

    async fn try_change_capacity(
        &self,
        event_id: EventId,
        requester_id: UserId,
        role: &Role,
        new_capacity: u32,
    ) -> Result<CapacityChange, RegistrationError> {
        let mut event = self.load_event(event_id).await?;
        if !can_manage(role, requester_id, event.organizer_id) {
            return Err(RegistrationError::Forbidden);
        }
        let capacity = Capacity::new(new_capacity)?;

        let seats = event.seats();
        let resized = seats.with_capacity(capacity).map_err(|_| {
            RegistrationError::InvalidState(format!(
                "capacity {new_capacity} is below the {} confirmed registrations",
                seats.registered_count()
            ))
        })?;

        let mut promoted = match resized.available() {
            0 => Vec::new(),
            free => self.ledger.list_waitlisted(event_id, free as usize).await?,
        };
        for registration in &mut promoted {
            registration.promote()?;
        }
        let promoted_count = u32::try_from(promoted.len())
            .map_err(|_| RegistrationError::InvalidState("too many promotions".to_string()))?;
        let next = resized.with_registered_count(resized.registered_count() + promoted_count)?;

        self.ledger
            .commit(LedgerCommit {
                event_id,
                expected: seats,
                next,
                writes: promoted
                    .iter()
                    .map(|r| RegistrationWrite::update(r.clone(), RegistrationStatus::Waitlisted))
                    .collect(),
            })
            .await?;

        event.set_seats(next);
        Ok(CapacityChange { event, promoted })
    }

    /// Recount confirmed registrations and repair a drifted counter.
    #[instrument(skip(self, role), fields(event_id = %event_id, user_id = %requester_id), err)]
    pub async fn reconcile(
        &self,
        event_id: EventId,
        requester_id: UserId,
        role: &Role,
    ) -> Result<ReconcileReport, RegistrationError> {
        let _guard = self.locks.acquire(event_id).await;
        let report = self
            .retrying("reconcile", event_id, move || {
                self.try_reconcile(event_id, requester_id, role)
            })
            .await?;

        if report.repaired {
            warn!(
                event_id = %event_id,
                previous = report.previous,
                actual = report.actual,
                "registered count drifted; repaired"
            );
        }
        Ok(report)
    }

    async fn try_reconcile(
        &self,
        event_id: EventId,
        requester_id: UserId,
        role: &Role,
    ) -> Result<ReconcileReport, RegistrationError> {
        let event = self.load_event(event_id).await?;
        if !can_manage(role, requester_id, event.organizer_id) {
            return Err(RegistrationError::Forbidden);
        }

        let previous = event.registered_count();
        let actual = self.ledger.count_confirmed(event_id).await?;
        let mut report = ReconcileReport {
            event_id,
            previous,
            actual,
            repaired: false,
        };
        if previous == actual {
            return Ok(report);
        }

        if !self.ledger.try_set_registered_count(event_id, previous, actual).await? {
            return Err(RegistrationError::CapacityRaceLost(event_id));
        }
        report.repaired = true;
        Ok(report)
    }

    /// The user's registrations, newest first, each with its event.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn list_mine(&self, user_id: UserId) -> Result<Vec<RegistrationView>, RegistrationError> {
        let registrations = self.ledger.list_for_user(user_id).await?;

        let mut events: HashMap<EventId, Option<Event>> = HashMap::new();
        let mut views = Vec::with_capacity(registrations.len());
        for registration in registrations {
            let event = match events.get(&registration.event_id) {
                Some(cached) => cached.clone(),
                None => {
                    let loaded = self.ledger.get_event(registration.event_id).await?;
                    events.insert(registration.event_id, loaded.clone());
                    loaded
                }
            };
            views.push(RegistrationView { registration, event });
        }
        Ok(views)
    }

    /// All registrations of an event, newest first. Organizer or admin only.
    #[instrument(skip(self, role), fields(event_id = %event_id, user_id = %requester_id), err)]
    pub async fn list_for_event(
        &self,
        event_id: EventId,
        requester_id: UserId,
        role: &Role,
    ) -> Result<Vec<Registration>, RegistrationError> {
        let event = self.load_event(event_id).await?;
        if !can_manage(role, requester_id, event.organizer_id) {
            return Err(RegistrationError::Forbidden);
        }
        Ok(self.ledger.list_for_event(event_id).await?)
    }

    async fn load_event(&self, event_id: EventId) -> Result<Event, RegistrationError> {
        self.ledger
            .get_event(event_id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound("event".to_string()))
    }

    async fn load_registration(&self, id: RegistrationId) -> Result<Registration, RegistrationError> {
        self.ledger
            .get_registration(id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound("registration".to_string()))
    }

    /// Re-run `attempt` while it loses the seat compare-and-set, up to
    /// `max_attempts` times. Callers hold the event lock.
    async fn retrying<T, F, Fut>(
        &self,
        operation: &'static str,
        event_id: EventId,
        mut attempt: F,
    ) -> Result<T, RegistrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RegistrationError>>,
    {
        let mut tries = 1;
        loop {
            match attempt().await {
                Err(RegistrationError::CapacityRaceLost(_)) if tries < self.config.max_attempts => {
                    warn!(
                        operation,
                        event_id = %event_id,
                        attempt = tries,
                        "seat counters changed underneath; retrying"
                    );
                    tries += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::sync::Notify;

    use evently_catalog::{EventCategory, EventDetails, EventQuery, NewEvent, Page};
    use evently_core::FixedClock;

    use crate::store::{EventStore, InMemoryLedger, RegistrationStore};

    fn draft(capacity: u32) -> NewEvent {
        NewEvent {
            title: "Rust Workshop".to_string(),
            description: "Ownership in practice".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
            time: "09:00 AM".to_string(),
            location: "Amsterdam".to_string(),
            venue: "Room 1".to_string(),
            category: EventCategory::Workshop,
            capacity,
            image: None,
            price: None,
            is_published: None,
        }
    }

    async fn setup(capacity: u32) -> (RegistrationEngine<InMemoryLedger>, Event) {
        let ledger = Arc::new(InMemoryLedger::new());
        let event = Event::create(EventId::new(), UserId::new(), draft(capacity), Utc::now()).unwrap();
        let event = ledger.insert_event(event).await.unwrap();
        (RegistrationEngine::new(ledger), event)
    }

    async fn counter(engine: &RegistrationEngine<InMemoryLedger>, event_id: EventId) -> u32 {
        engine.ledger().get_event(event_id).await.unwrap().unwrap().registered_count()
    }

    async fn status(engine: &RegistrationEngine<InMemoryLedger>, id: RegistrationId) -> RegistrationStatus {
        engine.ledger().get_registration(id).await.unwrap().unwrap().status()
    }

    #[tokio::test]
    async fn fills_seats_then_waitlists() {
        let (engine, event) = setup(2).await;
        let a = engine.register(UserId::new(), event.id).await.unwrap();
        let b = engine.register(UserId::new(), event.id).await.unwrap();
        let c = engine.register(UserId::new(), event.id).await.unwrap();

        assert_eq!(a.status(), RegistrationStatus::Confirmed);
        assert_eq!(b.status(), RegistrationStatus::Confirmed);
        assert_eq!(c.status(), RegistrationStatus::Waitlisted);
        assert_eq!(counter(&engine, event.id).await, 2);
    }

    #[tokio::test]
    async fn cancelling_confirmed_promotes_oldest_waitlisted() {
        let (engine, event) = setup(2).await;
        let (ua, ub, uc) = (UserId::new(), UserId::new(), UserId::new());
        let a = engine.register(ua, event.id).await.unwrap();
        let b = engine.register(ub, event.id).await.unwrap();
        let c = engine.register(uc, event.id).await.unwrap();

        let outcome = engine.cancel(a.id, ua, None).await.unwrap();

        assert_eq!(outcome.promoted.as_ref().map(|r| r.id), Some(c.id));
        assert_eq!(status(&engine, a.id).await, RegistrationStatus::Cancelled);
        assert_eq!(status(&engine, b.id).await, RegistrationStatus::Confirmed);
        assert_eq!(status(&engine, c.id).await, RegistrationStatus::Confirmed);
        assert_eq!(counter(&engine, event.id).await, 2);
        assert_eq!(
            outcome.cancelled.cancellation_reason(),
            Some(evently_registration::DEFAULT_CANCELLATION_REASON)
        );
    }

    #[tokio::test]
    async fn cancelling_confirmed_without_waitlist_frees_the_seat() {
        let (engine, event) = setup(2).await;
        let user = UserId::new();
        let a = engine.register(user, event.id).await.unwrap();

        let outcome = engine.cancel(a.id, user, Some("Travel plans changed")).await.unwrap();
        assert_eq!(outcome.promoted, None);
        assert_eq!(outcome.cancelled.cancellation_reason(), Some("Travel plans changed"));
        assert_eq!(counter(&engine, event.id).await, 0);
    }

    #[tokio::test]
    async fn cancelling_waitlisted_touches_neither_counter_nor_queue() {
        let (engine, event) = setup(1).await;
        engine.register(UserId::new(), event.id).await.unwrap();
        let uw = UserId::new();
        let waiting = engine.register(uw, event.id).await.unwrap();
        let other = engine.register(UserId::new(), event.id).await.unwrap();

        let outcome = engine.cancel(waiting.id, uw, None).await.unwrap();

        assert_eq!(outcome.promoted, None);
        assert_eq!(counter(&engine, event.id).await, 1);
        assert_eq!(status(&engine, other.id).await, RegistrationStatus::Waitlisted);
    }

    #[tokio::test]
    async fn registering_twice_is_rejected() {
        let (engine, event) = setup(5).await;
        let user = UserId::new();
        engine.register(user, event.id).await.unwrap();

        let err = engine.register(user, event.id).await.unwrap_err();
        assert!(matches!(err, RegistrationError::AlreadyRegistered));
        assert_eq!(counter(&engine, event.id).await, 1);
    }

    #[tokio::test]
    async fn waitlisted_user_cannot_register_again_either() {
        let (engine, event) = setup(1).await;
        engine.register(UserId::new(), event.id).await.unwrap();
        let user = UserId::new();
        engine.register(user, event.id).await.unwrap();

        let err = engine.register(user, event.id).await.unwrap_err();
        assert!(matches!(err, RegistrationError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn re_registration_after_cancel_joins_the_back_of_the_line() {
        let (engine, event) = setup(1).await;
        let holder = UserId::new();
        let first = engine.register(holder, event.id).await.unwrap();
        let queued = engine.register(UserId::new(), event.id).await.unwrap();

        engine.cancel(first.id, holder, None).await.unwrap();
        let again = engine.register(holder, event.id).await.unwrap();

        assert_ne!(again.id, first.id);
        assert_eq!(again.status(), RegistrationStatus::Waitlisted);
        assert_eq!(status(&engine, queued.id).await, RegistrationStatus::Confirmed);
        assert_eq!(engine.ledger().list_for_user(holder).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn second_cancel_is_invalid_state_and_changes_nothing() {
        let (engine, event) = setup(2).await;
        let user = UserId::new();
        let r = engine.register(user, event.id).await.unwrap();
        engine.register(UserId::new(), event.id).await.unwrap();
        engine.cancel(r.id, user, Some("first")).await.unwrap();
        let before = counter(&engine, event.id).await;

        let err = engine.cancel(r.id, user, Some("second")).await.unwrap_err();

        assert!(matches!(err, RegistrationError::InvalidState(_)));
        assert_eq!(counter(&engine, event.id).await, before);
        let stored = engine.ledger().get_registration(r.id).await.unwrap().unwrap();
        assert_eq!(stored.cancellation_reason(), Some("first"));
    }

    #[tokio::test]
    async fn only_the_registrant_may_cancel() {
        let (engine, event) = setup(2).await;
        let r = engine.register(UserId::new(), event.id).await.unwrap();

        let err = engine.cancel(r.id, event.organizer_id, None).await.unwrap_err();
        assert!(matches!(err, RegistrationError::Forbidden));
        assert_eq!(status(&engine, r.id).await, RegistrationStatus::Confirmed);
    }

    #[tokio::test]
    async fn missing_event_and_registration_are_not_found() {
        let (engine, _) = setup(1).await;
        assert!(matches!(
            engine.register(UserId::new(), EventId::new()).await,
            Err(RegistrationError::NotFound(_))
        ));
        assert!(matches!(
            engine.cancel(RegistrationId::new(), UserId::new(), None).await,
            Err(RegistrationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn archived_events_reject_registration() {
        let (engine, event) = setup(3).await;
        engine.ledger().set_published(event.id, false).await.unwrap();

        let err = engine.register(UserId::new(), event.id).await.unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidState(_)));
    }

    #[tokio::test]
    async fn equal_timestamps_promote_lowest_id_first() {
        let ledger = Arc::new(InMemoryLedger::new());
        let event = ledger
            .insert_event(Event::create(EventId::new(), UserId::new(), draft(1), Utc::now()).unwrap())
            .await
            .unwrap();
        let pinned = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let engine = RegistrationEngine::new(ledger).with_clock(Arc::new(FixedClock(pinned)));

        let holder = UserId::new();
        let seat = engine.register(holder, event.id).await.unwrap();
        let w1 = engine.register(UserId::new(), event.id).await.unwrap();
        let w2 = engine.register(UserId::new(), event.id).await.unwrap();
        assert_eq!(w1.registered_at, w2.registered_at);

        let outcome = engine.cancel(seat.id, holder, None).await.unwrap();
        let expected = w1.id.min(w2.id);
        assert_eq!(outcome.promoted.map(|r| r.id), Some(expected));
    }

    #[tokio::test]
    async fn capacity_growth_promotes_fifo() {
        let (engine, event) = setup(1).await;
        engine.register(UserId::new(), event.id).await.unwrap();
        let w1 = engine.register(UserId::new(), event.id).await.unwrap();
        let w2 = engine.register(UserId::new(), event.id).await.unwrap();

        let change = engine
            .change_capacity(event.id, event.organizer_id, &Role::ORGANIZER, 2)
            .await
            .unwrap();

        assert_eq!(change.promoted.iter().map(|r| r.id).collect::<Vec<_>>(), vec![w1.id]);
        assert_eq!(change.event.capacity().get(), 2);
        assert_eq!(change.event.registered_count(), 2);
        assert_eq!(status(&engine, w2.id).await, RegistrationStatus::Waitlisted);
        assert_eq!(counter(&engine, event.id).await, 2);
    }

    #[tokio::test]
    async fn capacity_cannot_shrink_below_confirmed() {
        let (engine, event) = setup(3).await;
        engine.register(UserId::new(), event.id).await.unwrap();
        engine.register(UserId::new(), event.id).await.unwrap();

        let err = engine
            .change_capacity(event.id, event.organizer_id, &Role::ORGANIZER, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidState(_)));

        let err = engine
            .change_capacity(event.id, event.organizer_id, &Role::ORGANIZER, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Validation(_)));

        let shrunk = engine
            .change_capacity(event.id, event.organizer_id, &Role::ORGANIZER, 2)
            .await
            .unwrap();
        assert_eq!(shrunk.event.capacity().get(), 2);
        assert!(shrunk.promoted.is_empty());
    }

    #[tokio::test]
    async fn capacity_change_requires_manager() {
        let (engine, event) = setup(3).await;
        let err = engine
            .change_capacity(event.id, UserId::new(), &Role::ORGANIZER, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Forbidden));

        let admin = engine
            .change_capacity(event.id, UserId::new(), &Role::ADMIN, 10)
            .await
            .unwrap();
        assert_eq!(admin.event.capacity().get(), 10);
    }

    #[tokio::test]
    async fn reconcile_repairs_drifted_counter() {
        let (engine, event) = setup(5).await;
        engine.register(UserId::new(), event.id).await.unwrap();
        engine.register(UserId::new(), event.id).await.unwrap();
        assert!(engine.ledger().try_set_registered_count(event.id, 2, 4).await.unwrap());

        let report = engine
            .reconcile(event.id, event.organizer_id, &Role::ORGANIZER)
            .await
            .unwrap();
        assert_eq!((report.previous, report.actual, report.repaired), (4, 2, true));
        assert_eq!(counter(&engine, event.id).await, 2);

        let again = engine
            .reconcile(event.id, event.organizer_id, &Role::ORGANIZER)
            .await
            .unwrap();
        assert!(!again.repaired);
    }

    #[tokio::test]
    async fn list_for_event_is_guarded_and_newest_first() {
        let (engine, event) = setup(5).await;
        let first = engine.register(UserId::new(), event.id).await.unwrap();
        let second = engine.register(UserId::new(), event.id).await.unwrap();

        let err = engine
            .list_for_event(event.id, UserId::new(), &Role::USER)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Forbidden));

        let rows = engine
            .list_for_event(event.id, event.organizer_id, &Role::ORGANIZER)
            .await
            .unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn list_mine_carries_event_summary() {
        let (engine, event) = setup(5).await;
        let user = UserId::new();
        engine.register(user, event.id).await.unwrap();

        let mine = engine.list_mine(user).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].event.as_ref().map(|e| e.id), Some(event.id));

        let json = serde_json::to_value(&mine[0]).unwrap();
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["event"]["title"], "Rust Workshop");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_registrations_never_overfill() {
        let (engine, event) = setup(3).await;
        let engine = Arc::new(engine);

        let tasks: Vec<_> = (0..40)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.register(UserId::new(), event.id).await })
            })
            .collect();

        let mut confirmed = 0;
        let mut waitlisted = 0;
        for t in tasks {
            match t.await.unwrap().unwrap().status() {
                RegistrationStatus::Confirmed => confirmed += 1,
                RegistrationStatus::Waitlisted => waitlisted += 1,
                RegistrationStatus::Cancelled => unreachable!(),
            }
        }

        assert_eq!(confirmed, 3);
        assert_eq!(waitlisted, 37);
        assert_eq!(counter(&engine, event.id).await, 3);
        assert_eq!(engine.ledger().count_confirmed(event.id).await.unwrap(), 3);
        assert!(engine.locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_for_the_last_seat() {
        let (engine, event) = setup(1).await;
        let engine = Arc::new(engine);

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.register(UserId::new(), event.id).await })
            })
            .collect();

        let mut confirmed = 0;
        for t in tasks {
            if t.await.unwrap().unwrap().status() == RegistrationStatus::Confirmed {
                confirmed += 1;
            }
        }
        assert_eq!(confirmed, 1);
        assert_eq!(counter(&engine, event.id).await, 1);
    }

    /// Ledger whose commits lose the seat compare-and-set a fixed number of times.
    /// Delegates to a shared in-memory ledger. Fails the next `races_left`
    /// commits as stale, and can hold one commit until released.
    struct RacingLedger {
        inner: Arc<InMemoryLedger>,
        races_left: AtomicU32,
        pause: Option<Arc<CommitPause>>,
    }

    #[derive(Default)]
    struct CommitPause {
        armed: AtomicBool,
        reached: Notify,
        release: Notify,
    }

    #[async_trait]
    impl EventStore for RacingLedger {
        async fn get_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
            self.inner.get_event(event_id).await
        }
        async fn insert_event(&self, event: Event) -> Result<Event, StoreError> {
            self.inner.insert_event(event).await
        }
        async fn update_details(&self, event_id: EventId, details: EventDetails) -> Result<Event, StoreError> {
            self.inner.update_details(event_id, details).await
        }
        async fn set_published(&self, event_id: EventId, published: bool) -> Result<Event, StoreError> {
            self.inner.set_published(event_id, published).await
        }
        async fn list_events(&self, query: &EventQuery) -> Result<Page<Event>, StoreError> {
            self.inner.list_events(query).await
        }
        async fn try_set_registered_count(&self, event_id: EventId, expected: u32, new: u32) -> Result<bool, StoreError> {
            self.inner.try_set_registered_count(event_id, expected, new).await
        }
    }

    #[async_trait]
    impl RegistrationStore for RacingLedger {
        async fn get_registration(&self, id: RegistrationId) -> Result<Option<Registration>, StoreError> {
            self.inner.get_registration(id).await
        }
        async fn find_non_cancelled(&self, user_id: UserId, event_id: EventId) -> Result<Option<Registration>, StoreError> {
            self.inner.find_non_cancelled(user_id, event_id).await
        }
        async fn insert_registration(&self, registration: Registration) -> Result<Registration, StoreError> {
            self.inner.insert_registration(registration).await
        }
        async fn update_registration(
            &self,
            registration: &Registration,
            from: RegistrationStatus,
        ) -> Result<(), StoreError> {
            self.inner.update_registration(registration, from).await
        }
        async fn list_waitlisted(&self, event_id: EventId, limit: usize) -> Result<Vec<Registration>, StoreError> {
            self.inner.list_waitlisted(event_id, limit).await
        }
        async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Registration>, StoreError> {
            self.inner.list_for_user(user_id).await
        }
        async fn list_for_event(&self, event_id: EventId) -> Result<Vec<Registration>, StoreError> {
            self.inner.list_for_event(event_id).await
        }
        async fn count_confirmed(&self, event_id: EventId) -> Result<u32, StoreError> {
            self.inner.count_confirmed(event_id).await
        }
    }

    #[async_trait]
    impl RegistrationLedger for RacingLedger {
        async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
            let lost = self
                .races_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                return Err(StoreError::StaleSeats(commit.event_id));
            }
            if let Some(pause) = &self.pause {
                if pause.armed.swap(false, Ordering::SeqCst) {
                    pause.reached.notify_one();
                    pause.release.notified().await;
                }
            }
            self.inner.commit(commit).await
        }

        fn backend(&self) -> &'static str {
            "racing"
        }
    }

    async fn racing_setup(races: u32, max_attempts: u32) -> (RegistrationEngine<RacingLedger>, Event) {
        let ledger = Arc::new(RacingLedger {
            inner: Arc::new(InMemoryLedger::new()),
            races_left: AtomicU32::new(races),
            pause: None,
        });
        let event = Event::create(EventId::new(), UserId::new(), draft(2), Utc::now()).unwrap();
        let event = ledger.insert_event(event).await.unwrap();
        let engine = RegistrationEngine::new(ledger).with_config(EngineConfig { max_attempts });
        (engine, event)
    }

    #[tokio::test]
    async fn lost_race_surfaces_after_attempts_run_out_and_writes_nothing() {
        let (engine, event) = racing_setup(5, 2).await;
        let user = UserId::new();

        let err = engine.register(user, event.id).await.unwrap_err();

        assert!(matches!(err, RegistrationError::CapacityRaceLost(id) if id == event.id));
        let ledger = engine.ledger();
        assert_eq!(ledger.get_event(event.id).await.unwrap().unwrap().registered_count(), 0);
        assert!(ledger.list_for_user(user).await.unwrap().is_empty());
        assert_eq!(ledger.races_left.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn lost_race_is_retried_transparently() {
        let (engine, event) = racing_setup(2, 3).await;
        let r = engine.register(UserId::new(), event.id).await.unwrap();
        assert_eq!(r.status(), RegistrationStatus::Confirmed);
        assert_eq!(
            engine.ledger().get_event(event.id).await.unwrap().unwrap().registered_count(),
            1
        );
    }

    /// A second engine over the same store, standing in for another process.
    /// Its next commit is held at the store until released.
    fn paused_engine(shared: &Arc<InMemoryLedger>) -> (Arc<RegistrationEngine<RacingLedger>>, Arc<CommitPause>) {
        let pause = Arc::new(CommitPause::default());
        pause.armed.store(true, Ordering::SeqCst);
        let ledger = Arc::new(RacingLedger {
            inner: Arc::clone(shared),
            races_left: AtomicU32::new(0),
            pause: Some(Arc::clone(&pause)),
        });
        (Arc::new(RegistrationEngine::new(ledger)), pause)
    }

    async fn assert_counter_matches_rows(ledger: &InMemoryLedger, event_id: EventId) -> u32 {
        let counter = ledger.get_event(event_id).await.unwrap().unwrap().registered_count();
        assert_eq!(counter, ledger.count_confirmed(event_id).await.unwrap());
        counter
    }

    #[tokio::test]
    async fn stale_waitlisted_cancel_does_not_overwrite_a_promotion_from_another_writer() {
        let shared = Arc::new(InMemoryLedger::new());
        let event = Event::create(EventId::new(), UserId::new(), draft(1), Utc::now()).unwrap();
        let event = shared.insert_event(event).await.unwrap();
        let other = RegistrationEngine::new(Arc::clone(&shared));

        let (holder_user, waiting_user) = (UserId::new(), UserId::new());
        let holder = other.register(holder_user, event.id).await.unwrap();
        let waiting_id = other.register(waiting_user, event.id).await.unwrap().id;

        let (paused, pause) = paused_engine(&shared);
        let late = tokio::spawn({
            let paused = Arc::clone(&paused);
            async move { paused.cancel(waiting_id, waiting_user, None).await }
        });
        pause.reached.notified().await;

        let outcome = other.cancel(holder.id, holder_user, None).await.unwrap();
        assert_eq!(outcome.promoted.map(|r| r.id), Some(waiting_id));

        pause.release.notify_one();
        let late = late.await.unwrap().unwrap();
        assert_eq!(late.cancelled.status(), RegistrationStatus::Cancelled);
        assert!(late.promoted.is_none());

        assert_eq!(assert_counter_matches_rows(&shared, event.id).await, 0);
    }

    #[tokio::test]
    async fn two_writers_never_promote_the_same_registration() {
        let shared = Arc::new(InMemoryLedger::new());
        let event = Event::create(EventId::new(), UserId::new(), draft(2), Utc::now()).unwrap();
        let event = shared.insert_event(event).await.unwrap();
        let other = RegistrationEngine::new(Arc::clone(&shared));

        let (ux, uy) = (UserId::new(), UserId::new());
        let x = other.register(ux, event.id).await.unwrap();
        let y = other.register(uy, event.id).await.unwrap();
        let w = other.register(UserId::new(), event.id).await.unwrap();
        assert_eq!(w.status(), RegistrationStatus::Waitlisted);

        let (paused, pause) = paused_engine(&shared);
        let first = tokio::spawn({
            let paused = Arc::clone(&paused);
            async move { paused.cancel(x.id, ux, None).await }
        });
        pause.reached.notified().await;

        let second = other.cancel(y.id, uy, None).await.unwrap();
        assert_eq!(second.promoted.map(|r| r.id), Some(w.id));

        pause.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(first.promoted.is_none());

        assert_eq!(assert_counter_matches_rows(&shared, event.id).await, 1);
        assert_eq!(status(&other, w.id).await, RegistrationStatus::Confirmed);
    }

    #[test]
    fn error_mapping_follows_the_taxonomy() {
        assert!(matches!(
            RegistrationError::from(DomainError::invalid_transition("x")),
            RegistrationError::InvalidState(_)
        ));
        assert!(matches!(
            RegistrationError::from(DomainError::validation("x")),
            RegistrationError::Validation(_)
        ));
        assert!(matches!(
            RegistrationError::from(StoreError::Duplicate("x".into())),
            RegistrationError::AlreadyRegistered
        ));
        assert!(matches!(
            RegistrationError::from(StoreError::Backend("x".into())),
            RegistrationError::Storage(_)
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(usize),
        Cancel(usize),
        Resize(u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0usize..6).prop_map(Op::Register),
            3 => (0usize..6).prop_map(Op::Cancel),
            1 => (1u32..6).prop_map(Op::Resize),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: after any operation sequence the counter stays within
        /// capacity and equals the number of confirmed registrations.
        #[test]
        fn counter_matches_confirmed_rows(capacity in 1u32..4, ops in proptest::collection::vec(op(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (engine, event) = setup(capacity).await;
                let users: Vec<UserId> = (0..6).map(|_| UserId::new()).collect();

                for op in ops {
                    match op {
                        Op::Register(u) => {
                            let _ = engine.register(users[u], event.id).await;
                        }
                        Op::Cancel(u) => {
                            let active = engine.ledger().find_non_cancelled(users[u], event.id).await.unwrap();
                            if let Some(r) = active {
                                engine.cancel(r.id, users[u], None).await.unwrap();
                            }
                        }
                        Op::Resize(c) => {
                            let _ = engine
                                .change_capacity(event.id, event.organizer_id, &Role::ORGANIZER, c)
                                .await;
                        }
                    }

                    let stored = engine.ledger().get_event(event.id).await.unwrap().unwrap();
                    let confirmed = engine.ledger().count_confirmed(event.id).await.unwrap();
                    prop_assert!(stored.registered_count() <= stored.capacity().get());
                    prop_assert_eq!(stored.registered_count(), confirmed);

                    // No one waits while a seat is free.
                    if stored.seats().has_free_seat() {
                        prop_assert!(engine.ledger().find_oldest_waitlisted(event.id).await.unwrap().is_none());
                    }
                }
                Ok(())
            })?;
        }
    }
}
