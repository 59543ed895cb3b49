//! Public listing query: search, filters, pagination.

use chrono::NaiveDate;
use serde::Serialize;

use crate::event::{Event, EventCategory};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Filter + page selection over published events.
///
/// Results are ordered by event date ascending (then creation time, then id
/// so that paging is stable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    /// Case-insensitive substring match over title, description and location.
    pub search: Option<String>,
    pub category: Option<EventCategory>,
    /// Only events on or after this date.
    pub from_date: Option<NaiveDate>,
    page: u32,
    limit: u32,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

impl EventQuery {
    /// Pages are 1-based; `limit` is clamped to `1..=MAX_PAGE_SIZE`.
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            search: None,
            category: None,
            from_date: None,
            page: page.max(1),
            limit: limit.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn with_search(mut self, search: Option<String>) -> Self {
        self.search = search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }

    pub fn with_category(mut self, category: Option<EventCategory>) -> Self {
        self.category = category;
        self
    }

    pub fn with_from_date(mut self, from_date: Option<NaiveDate>) -> Self {
        self.from_date = from_date;
        self
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !event.is_published {
            return false;
        }
        if let Some(category) = self.category {
            if event.details.category != category {
                return false;
            }
        }
        if let Some(from) = self.from_date {
            if event.details.date < from {
                return false;
            }
        }
        if let Some(needle) = &self.search {
            let needle = needle.to_lowercase();
            let d = &event.details;
            return [&d.title, &d.description, &d.location]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
        }
        true
    }

    /// Filter, order and slice an in-memory candidate set.
    pub fn paginate(&self, candidates: impl IntoIterator<Item = Event>) -> Page<Event> {
        let mut matching: Vec<Event> = candidates.into_iter().filter(|e| self.matches(e)).collect();
        matching.sort_by(|a, b| {
            a.details
                .date
                .cmp(&b.details.date)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.limit as usize)
            .collect();

        Page {
            items,
            total,
            page: self.page,
            limit: self.limit,
        }
    }
}

/// One page of results plus the totals needed to render a pager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.limit))
    }
}
