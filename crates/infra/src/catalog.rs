//! Event catalog: organizer-facing CRUD and the public listing.
//!
//! Seat counters are out of reach here. Capacity edits are forwarded to the
//! [`RegistrationEngine`] so that promotions land in the same commit as the
//! resize.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use evently_auth::{Role, can_create_event, can_manage};
use evently_catalog::{Event, EventDetailsPatch, EventQuery, NewEvent, Page};
use evently_core::{Clock, EventId, SystemClock, UserId};

use crate::engine::{RegistrationEngine, RegistrationError};
use crate::store::RegistrationLedger;

/// An event as seen by one (possibly anonymous) caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    #[serde(flatten)]
    pub event: Event,
    pub is_registered: bool,
}

pub struct EventCatalog<L: RegistrationLedger + ?Sized> {
    ledger: Arc<L>,
    engine: Arc<RegistrationEngine<L>>,
    clock: Arc<dyn Clock>,
}

impl<L: RegistrationLedger + ?Sized> EventCatalog<L> {
    pub fn new(engine: Arc<RegistrationEngine<L>>) -> Self {
        Self {
            ledger: Arc::clone(engine.ledger()),
            engine,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[instrument(skip(self, role, draft), fields(user_id = %requester_id), err)]
    pub async fn create_event(
        &self,
        requester_id: UserId,
        role: &Role,
        draft: NewEvent,
    ) -> Result<Event, RegistrationError> {
        if !can_create_event(role) {
            return Err(RegistrationError::Forbidden);
        }
        let event = Event::create(EventId::new(), requester_id, draft, self.clock.now())?;
        let event = self.ledger.insert_event(event).await?;

        info!(
            event_id = %event.id,
            user_id = %requester_id,
            capacity = event.capacity().get(),
            "event created"
        );
        Ok(event)
    }

    /// Apply an organizer's edit. Validation happens before anything is
    /// written; the capacity part is delegated to the engine.
    #[instrument(skip(self, role, patch), fields(event_id = %event_id, user_id = %requester_id), err)]
    pub async fn update_event(
        &self,
        event_id: EventId,
        requester_id: UserId,
        role: &Role,
        patch: EventDetailsPatch,
    ) -> Result<Event, RegistrationError> {
        let event = self.load_managed(event_id, requester_id, role).await?;
        let details = patch
            .touches_details()
            .then(|| patch.apply_to(&event.details))
            .transpose()?;

        if let Some(capacity) = patch.capacity.filter(|c| *c != event.capacity().get()) {
            self.engine
                .change_capacity(event_id, requester_id, role, capacity)
                .await?;
        }
        if let Some(details) = details {
            self.ledger.update_details(event_id, details).await?;
        }
        if let Some(published) = patch.is_published.filter(|p| *p != event.is_published) {
            let _guard = self.engine.locks().acquire(event_id).await;
            self.ledger.set_published(event_id, published).await?;
        }

        info!(event_id = %event_id, user_id = %requester_id, "event updated");
        self.load(event_id).await
    }

    /// Soft delete: hide from listings and stop accepting registrations.
    /// Registrations are kept. Runs under the event lock so that no
    /// in-flight registration commits after the archive.
    #[instrument(skip(self, role), fields(event_id = %event_id, user_id = %requester_id), err)]
    pub async fn archive_event(
        &self,
        event_id: EventId,
        requester_id: UserId,
        role: &Role,
    ) -> Result<Event, RegistrationError> {
        self.load_managed(event_id, requester_id, role).await?;
        let _guard = self.engine.locks().acquire(event_id).await;
        let event = self.ledger.set_published(event_id, false).await?;
        info!(event_id = %event_id, user_id = %requester_id, "event archived");
        Ok(event)
    }

    /// One event plus whether `viewer` holds an active registration for it.
    ///
    /// Archived events are only visible to those who may manage them.
    pub async fn view_event(
        &self,
        event_id: EventId,
        viewer: Option<(UserId, &Role)>,
    ) -> Result<EventView, RegistrationError> {
        let event = self.load(event_id).await?;
        if !event.is_published {
            let manager = viewer.is_some_and(|(id, role)| can_manage(role, id, event.organizer_id));
            if !manager {
                return Err(RegistrationError::NotFound("event".to_string()));
            }
        }

        let is_registered = match viewer {
            Some((user_id, _)) => self.ledger.find_non_cancelled(user_id, event_id).await?.is_some(),
            None => false,
        };
        Ok(EventView { event, is_registered })
    }

    pub async fn list_events(&self, query: &EventQuery) -> Result<Page<Event>, RegistrationError> {
        Ok(self.ledger.list_events(query).await?)
    }

    async fn load(&self, event_id: EventId) -> Result<Event, RegistrationError> {
        self.ledger
            .get_event(event_id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound("event".to_string()))
    }

    async fn load_managed(
        &self,
        event_id: EventId,
        requester_id: UserId,
        role: &Role,
    ) -> Result<Event, RegistrationError> {
        let event = self.load(event_id).await?;
        if !can_manage(role, requester_id, event.organizer_id) {
            return Err(RegistrationError::Forbidden);
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use evently_catalog::EventCategory;

    use crate::store::InMemoryLedger;

    fn catalog() -> EventCatalog<InMemoryLedger> {
        let engine = Arc::new(RegistrationEngine::new(Arc::new(InMemoryLedger::new())));
        EventCatalog::new(engine)
    }

    fn draft(title: &str, capacity: u32) -> NewEvent {
        NewEvent {
            title: title.to_string(),
            description: "Talks and pizza".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 10, 30).unwrap(),
            time: "06:30 PM".to_string(),
            location: "Remote".to_string(),
            venue: "Zoom".to_string(),
            category: EventCategory::Meetup,
            capacity,
            image: None,
            price: None,
            is_published: None,
        }
    }

    #[tokio::test]
    async fn only_organizers_and_admins_create_events() {
        let catalog = catalog();
        let err = catalog
            .create_event(UserId::new(), &Role::USER, draft("Meetup", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Forbidden));

        let organizer = UserId::new();
        let event = catalog
            .create_event(organizer, &Role::ORGANIZER, draft("Meetup", 10))
            .await
            .unwrap();
        assert_eq!(event.organizer_id, organizer);
    }

    #[tokio::test]
    async fn update_is_guarded_and_never_touches_the_counter() {
        let catalog = catalog();
        let organizer = UserId::new();
        let event = catalog
            .create_event(organizer, &Role::ORGANIZER, draft("Meetup", 10))
            .await
            .unwrap();
        catalog.engine.register(UserId::new(), event.id).await.unwrap();

        let patch = EventDetailsPatch {
            title: Some("Renamed".to_string()),
            ..Default::default()
        };
        let err = catalog
            .update_event(event.id, UserId::new(), &Role::ORGANIZER, patch.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Forbidden));

        let updated = catalog
            .update_event(event.id, organizer, &Role::ORGANIZER, patch)
            .await
            .unwrap();
        assert_eq!(updated.details.title, "Renamed");
        assert_eq!(updated.registered_count(), 1);
    }

    #[tokio::test]
    async fn invalid_patch_writes_nothing() {
        let catalog = catalog();
        let organizer = UserId::new();
        let event = catalog
            .create_event(organizer, &Role::ORGANIZER, draft("Meetup", 10))
            .await
            .unwrap();

        let patch = EventDetailsPatch {
            title: Some("  ".to_string()),
            capacity: Some(20),
            ..Default::default()
        };
        let err = catalog
            .update_event(event.id, organizer, &Role::ORGANIZER, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Validation(_)));

        let stored = catalog.load(event.id).await.unwrap();
        assert_eq!(stored.capacity().get(), 10);
    }

    #[tokio::test]
    async fn capacity_patch_promotes_waitlist() {
        let catalog = catalog();
        let organizer = UserId::new();
        let event = catalog
            .create_event(organizer, &Role::ORGANIZER, draft("Meetup", 1))
            .await
            .unwrap();
        catalog.engine.register(UserId::new(), event.id).await.unwrap();
        catalog.engine.register(UserId::new(), event.id).await.unwrap();

        let patch = EventDetailsPatch {
            capacity: Some(2),
            ..Default::default()
        };
        let updated = catalog
            .update_event(event.id, organizer, &Role::ORGANIZER, patch)
            .await
            .unwrap();
        assert_eq!(updated.registered_count(), 2);
    }

    #[tokio::test]
    async fn archived_events_leave_the_listing_but_keep_registrations() {
        let catalog = catalog();
        let organizer = UserId::new();
        let event = catalog
            .create_event(organizer, &Role::ORGANIZER, draft("Meetup", 5))
            .await
            .unwrap();
        let user = UserId::new();
        catalog.engine.register(user, event.id).await.unwrap();

        catalog.archive_event(event.id, organizer, &Role::ORGANIZER).await.unwrap();

        let page = catalog.list_events(&EventQuery::default()).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(matches!(
            catalog.view_event(event.id, None).await,
            Err(RegistrationError::NotFound(_))
        ));
        let owner_view = catalog
            .view_event(event.id, Some((organizer, &Role::ORGANIZER)))
            .await
            .unwrap();
        assert!(!owner_view.event.is_published);
        assert_eq!(catalog.engine.list_mine(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn archive_waits_for_the_event_lock() {
        let catalog = Arc::new(catalog());
        let organizer = UserId::new();
        let event = catalog
            .create_event(organizer, &Role::ORGANIZER, draft("Meetup", 5))
            .await
            .unwrap();

        let held = catalog.engine.locks().acquire(event.id).await;
        let archive = tokio::spawn({
            let catalog = Arc::clone(&catalog);
            async move { catalog.archive_event(event.id, organizer, &Role::ORGANIZER).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!archive.is_finished());
        assert!(catalog.load(event.id).await.unwrap().is_published);

        drop(held);
        let archived = archive.await.unwrap().unwrap();
        assert!(!archived.is_published);
    }

    #[tokio::test]
    async fn view_reports_registration_of_the_caller() {
        let catalog = catalog();
        let event = catalog
            .create_event(UserId::new(), &Role::ADMIN, draft("Meetup", 5))
            .await
            .unwrap();
        let user = UserId::new();
        catalog.engine.register(user, event.id).await.unwrap();

        let mine = catalog.view_event(event.id, Some((user, &Role::USER))).await.unwrap();
        assert!(mine.is_registered);
        let anon = catalog.view_event(event.id, None).await.unwrap();
        assert!(!anon.is_registered);
    }
}
