use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use evently_core::{DomainError, DomainResult, Entity, EventId, UserId, ValueObject};

// ─────────────────────────────────────────────────────────────────────────────
// Capacity / Seats
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum number of confirmed registrations an event accepts (at least 1).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Capacity(u32);

impl Capacity {
    pub fn new(seats: u32) -> DomainResult<Self> {
        if seats == 0 {
            return Err(DomainError::validation("capacity must be at least 1"));
        }
        Ok(Self(seats))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl ValueObject for Capacity {}

impl TryFrom<u32> for Capacity {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Capacity> for u32 {
    fn from(value: Capacity) -> Self {
        value.0
    }
}

impl core::fmt::Display for Capacity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Capacity together with the denormalized count of confirmed registrations.
///
/// # Invariants
/// - `registered_count <= capacity` for every value built through [`Seats::new`].
///
/// Values loaded from storage go through [`Seats::from_storage`] instead, so
/// that a counter which drifted (e.g. written by an older release) can still
/// be loaded and repaired.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Seats {
    capacity: Capacity,
    registered_count: u32,
}

impl ValueObject for Seats {}

impl Seats {
    pub fn new(capacity: Capacity, registered_count: u32) -> DomainResult<Self> {
        if registered_count > capacity.get() {
            return Err(DomainError::invariant(format!(
                "registered count {registered_count} exceeds capacity {capacity}"
            )));
        }
        Ok(Self {
            capacity,
            registered_count,
        })
    }

    pub fn from_storage(capacity: Capacity, registered_count: u32) -> Self {
        Self {
            capacity,
            registered_count,
        }
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    pub fn registered_count(&self) -> u32 {
        self.registered_count
    }

    pub fn available(&self) -> u32 {
        self.capacity.get().saturating_sub(self.registered_count)
    }

    pub fn has_free_seat(&self) -> bool {
        self.registered_count < self.capacity.get()
    }

    pub fn with_registered_count(self, registered_count: u32) -> DomainResult<Self> {
        Self::new(self.capacity, registered_count)
    }

    /// Resize, refusing to drop below the seats already confirmed.
    pub fn with_capacity(self, capacity: Capacity) -> DomainResult<Self> {
        Self::new(capacity, self.registered_count)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Category
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Conference,
    Workshop,
    Seminar,
    Meetup,
    Concert,
    Exhibition,
    #[default]
    Other,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Conference => "conference",
            EventCategory::Workshop => "workshop",
            EventCategory::Seminar => "seminar",
            EventCategory::Meetup => "meetup",
            EventCategory::Concert => "concert",
            EventCategory::Exhibition => "exhibition",
            EventCategory::Other => "other",
        }
    }
}

impl core::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for EventCategory {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conference" => Ok(EventCategory::Conference),
            "workshop" => Ok(EventCategory::Workshop),
            "seminar" => Ok(EventCategory::Seminar),
            "meetup" => Ok(EventCategory::Meetup),
            "concert" => Ok(EventCategory::Concert),
            "exhibition" => Ok(EventCategory::Exhibition),
            "other" => Ok(EventCategory::Other),
            other => Err(DomainError::validation(format!("unknown category '{other}'"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event
// ─────────────────────────────────────────────────────────────────────────────

/// Descriptive listing fields, freely editable by the organizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    /// Free-form start time as displayed (e.g. "09:00 AM").
    pub time: String,
    pub location: String,
    pub venue: String,
    pub category: EventCategory,
    pub image: String,
    /// Ticket price in minor currency units.
    pub price: u64,
}

/// A listed event.
///
/// Seat bookkeeping is private: only the registration engine moves
/// `registered_count`, through a storage commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub organizer_id: UserId,
    #[serde(flatten)]
    pub details: EventDetails,
    #[serde(flatten)]
    seats: Seats,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Build a brand-new event from an organizer's draft.
    pub fn create(
        id: EventId,
        organizer_id: UserId,
        draft: NewEvent,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let capacity = Capacity::new(draft.capacity)?;
        let is_published = draft.is_published.unwrap_or(true);
        let details = draft.into_details()?;

        Ok(Self {
            id,
            organizer_id,
            details,
            seats: Seats::new(capacity, 0)?,
            is_published,
            created_at,
        })
    }

    /// Reassemble an event from persisted state.
    pub fn restore(
        id: EventId,
        organizer_id: UserId,
        details: EventDetails,
        seats: Seats,
        is_published: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            organizer_id,
            details,
            seats,
            is_published,
            created_at,
        }
    }

    pub fn seats(&self) -> Seats {
        self.seats
    }

    pub fn capacity(&self) -> Capacity {
        self.seats.capacity()
    }

    pub fn registered_count(&self) -> u32 {
        self.seats.registered_count()
    }

    /// Storage-side hook used when a registration commit lands.
    pub fn set_seats(&mut self, seats: Seats) {
        self.seats = seats;
    }
}

impl Entity for Event {
    type Id = EventId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Drafts / patches
// ─────────────────────────────────────────────────────────────────────────────

/// Organizer input for a new event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    pub time: String,
    pub location: String,
    pub venue: String,
    #[serde(default)]
    pub category: EventCategory,
    pub capacity: u32,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub price: Option<u64>,
    #[serde(default)]
    pub is_published: Option<bool>,
}

impl NewEvent {
    fn into_details(self) -> DomainResult<EventDetails> {
        Ok(EventDetails {
            title: required("title", &self.title)?,
            description: required("description", &self.description)?,
            date: self.date,
            time: required("time", &self.time)?,
            location: required("location", &self.location)?,
            venue: required("venue", &self.venue)?,
            category: self.category,
            image: self.image.unwrap_or_default(),
            price: self.price.unwrap_or(0),
        })
    }
}

/// Partial update of an event's descriptive fields.
///
/// `capacity` is carried here for the HTTP surface but is not applied by
/// [`EventDetailsPatch::apply_to`]; resizing goes through the registration
/// engine so waitlisted users can be promoted in the same unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetailsPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub location: Option<String>,
    pub venue: Option<String>,
    pub category: Option<EventCategory>,
    pub image: Option<String>,
    pub price: Option<u64>,
    pub is_published: Option<bool>,
    pub capacity: Option<u32>,
}

impl EventDetailsPatch {
    pub fn apply_to(&self, current: &EventDetails) -> DomainResult<EventDetails> {
        let mut next = current.clone();
        if let Some(v) = &self.title {
            next.title = required("title", v)?;
        }
        if let Some(v) = &self.description {
            next.description = required("description", v)?;
        }
        if let Some(v) = self.date {
            next.date = v;
        }
        if let Some(v) = &self.time {
            next.time = required("time", v)?;
        }
        if let Some(v) = &self.location {
            next.location = required("location", v)?;
        }
        if let Some(v) = &self.venue {
            next.venue = required("venue", v)?;
        }
        if let Some(v) = self.category {
            next.category = v;
        }
        if let Some(v) = &self.image {
            next.image = v.clone();
        }
        if let Some(v) = self.price {
            next.price = v;
        }
        Ok(next)
    }

    pub fn touches_details(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.date.is_some()
            || self.time.is_some()
            || self.location.is_some()
            || self.venue.is_some()
            || self.category.is_some()
            || self.image.is_some()
            || self.price.is_some()
    }
}

fn required(field: &str, value: &str) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}
