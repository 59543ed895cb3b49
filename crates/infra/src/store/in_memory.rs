use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use evently_catalog::{Event, EventDetails, EventQuery, Page, Seats};
use evently_core::{EventId, RegistrationId, UserId};
use evently_registration::{Registration, RegistrationStatus, waitlist_order};

use super::r#trait::{
    EventStore, LedgerCommit, RegistrationLedger, RegistrationStore, RegistrationWrite, StoreError,
};

#[derive(Debug, Default)]
struct Tables {
    events: HashMap<EventId, Event>,
    registrations: HashMap<RegistrationId, Registration>,
}

impl Tables {
    fn active_for(&self, user_id: UserId, event_id: EventId) -> Option<&Registration> {
        self.registrations
            .values()
            .find(|r| r.user_id == user_id && r.event_id == event_id && r.status().is_active())
    }

    fn check_insert(&self, registration: &Registration) -> Result<(), StoreError> {
        if self.registrations.contains_key(&registration.id) {
            return Err(StoreError::Duplicate(format!("registration {} already exists", registration.id)));
        }
        if !self.events.contains_key(&registration.event_id) {
            return Err(StoreError::NotFound(format!("event {}", registration.event_id)));
        }
        if registration.status().is_active()
            && self.active_for(registration.user_id, registration.event_id).is_some()
        {
            return Err(StoreError::Duplicate(format!(
                "user {} already holds an active registration for event {}",
                registration.user_id, registration.event_id
            )));
        }
        Ok(())
    }

    fn check_update(&self, registration: &Registration, from: RegistrationStatus) -> Result<(), StoreError> {
        let stored = self
            .registrations
            .get(&registration.id)
            .ok_or_else(|| StoreError::NotFound(format!("registration {}", registration.id)))?;
        if stored.status() != from {
            return Err(StoreError::StaleSeats(registration.event_id));
        }
        Ok(())
    }
}

/// In-memory event + registration store.
///
/// Both tables sit behind a single lock, so a [`LedgerCommit`] is applied
/// atomically with respect to every reader. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    tables: RwLock<Tables>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn newest_first(mut registrations: Vec<Registration>) -> Vec<Registration> {
        registrations.sort_by(|a, b| b.queue_key().cmp(&a.queue_key()));
        registrations
    }
}

#[async_trait]
impl EventStore for InMemoryLedger {
    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.read()?.events.get(&event_id).cloned())
    }

    async fn insert_event(&self, event: Event) -> Result<Event, StoreError> {
        let mut tables = self.write()?;
        if tables.events.contains_key(&event.id) {
            return Err(StoreError::Duplicate(format!("event {} already exists", event.id)));
        }
        tables.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn update_details(&self, event_id: EventId, details: EventDetails) -> Result<Event, StoreError> {
        let mut tables = self.write()?;
        let event = tables
            .events
            .get_mut(&event_id)
            .ok_or_else(|| StoreError::NotFound(format!("event {event_id}")))?;
        event.details = details;
        Ok(event.clone())
    }

    async fn set_published(&self, event_id: EventId, published: bool) -> Result<Event, StoreError> {
        let mut tables = self.write()?;
        let event = tables
            .events
            .get_mut(&event_id)
            .ok_or_else(|| StoreError::NotFound(format!("event {event_id}")))?;
        event.is_published = published;
        Ok(event.clone())
    }

    async fn list_events(&self, query: &EventQuery) -> Result<Page<Event>, StoreError> {
        let tables = self.read()?;
        Ok(query.paginate(tables.events.values().cloned()))
    }

    async fn try_set_registered_count(
        &self,
        event_id: EventId,
        expected: u32,
        new: u32,
    ) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        let event = tables
            .events
            .get_mut(&event_id)
            .ok_or_else(|| StoreError::NotFound(format!("event {event_id}")))?;

        if event.registered_count() != expected {
            return Ok(false);
        }
        event.set_seats(Seats::from_storage(event.capacity(), new));
        Ok(true)
    }
}

#[async_trait]
impl RegistrationStore for InMemoryLedger {
    async fn get_registration(&self, id: RegistrationId) -> Result<Option<Registration>, StoreError> {
        Ok(self.read()?.registrations.get(&id).cloned())
    }

    async fn find_non_cancelled(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<Option<Registration>, StoreError> {
        Ok(self.read()?.active_for(user_id, event_id).cloned())
    }

    async fn insert_registration(&self, registration: Registration) -> Result<Registration, StoreError> {
        let mut tables = self.write()?;
        tables.check_insert(&registration)?;
        tables.registrations.insert(registration.id, registration.clone());
        Ok(registration)
    }

    async fn update_registration(&self, registration: &Registration, from: RegistrationStatus) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables.check_update(registration, from)?;
        tables.registrations.insert(registration.id, registration.clone());
        Ok(())
    }

    async fn list_waitlisted(&self, event_id: EventId, limit: usize) -> Result<Vec<Registration>, StoreError> {
        let tables = self.read()?;
        let mut queue: Vec<Registration> = tables
            .registrations
            .values()
            .filter(|r| r.event_id == event_id && r.status() == RegistrationStatus::Waitlisted)
            .cloned()
            .collect();
        waitlist_order(&mut queue);
        queue.truncate(limit);
        Ok(queue)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Registration>, StoreError> {
        let tables = self.read()?;
        let mine = tables
            .registrations
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        Ok(Self::newest_first(mine))
    }

    async fn list_for_event(&self, event_id: EventId) -> Result<Vec<Registration>, StoreError> {
        let tables = self.read()?;
        let rows = tables
            .registrations
            .values()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect();
        Ok(Self::newest_first(rows))
    }

    async fn count_confirmed(&self, event_id: EventId) -> Result<u32, StoreError> {
        let tables = self.read()?;
        let count = tables
            .registrations
            .values()
            .filter(|r| r.event_id == event_id && r.status() == RegistrationStatus::Confirmed)
            .count();
        u32::try_from(count).map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl RegistrationLedger for InMemoryLedger {
    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        let mut tables = self.write()?;

        // Validate everything before touching anything (all or nothing).
        let event = tables
            .events
            .get(&commit.event_id)
            .ok_or_else(|| StoreError::NotFound(format!("event {}", commit.event_id)))?;
        if event.seats() != commit.expected {
            return Err(StoreError::StaleSeats(commit.event_id));
        }
        for write in &commit.writes {
            if write.registration().event_id != commit.event_id {
                return Err(StoreError::Backend(format!(
                    "commit for event {} carries a registration of event {}",
                    commit.event_id,
                    write.registration().event_id
                )));
            }
            match write {
                RegistrationWrite::Insert(r) => tables.check_insert(r)?,
                RegistrationWrite::Update { registration, from } => {
                    tables.check_update(registration, *from)?
                }
            }
        }

        if let Some(event) = tables.events.get_mut(&commit.event_id) {
            event.set_seats(commit.next);
        }
        for write in commit.writes {
            let registration = write.into_registration();
            tables.registrations.insert(registration.id, registration);
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
