use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use evently_catalog::{Event, EventCategory, EventQuery, Page, query::DEFAULT_PAGE_SIZE};
use evently_core::{EventId, RegistrationId};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub event_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// Query string of `GET /events`. Kept as raw strings so that bad values
/// produce our own error body instead of axum's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ListEventsParams {
    pub search: Option<String>,
    pub category: Option<String>,
    pub date: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl ListEventsParams {
    pub fn into_query(self) -> Result<EventQuery, axum::response::Response> {
        let page = parse_positive("page", self.page.as_deref())?.unwrap_or(1);
        let limit = parse_positive("limit", self.limit.as_deref())?.unwrap_or(DEFAULT_PAGE_SIZE);

        let category = non_blank(self.category.as_deref())
            .map(parse_category)
            .transpose()?;
        let from_date = non_blank(self.date.as_deref()).map(parse_date).transpose()?;

        Ok(EventQuery::new(page, limit)
            .with_search(self.search)
            .with_category(category)
            .with_from_date(from_date))
    }
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_event_id(raw: &str) -> Result<EventId, axum::response::Response> {
    raw.parse::<EventId>()
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}

pub fn parse_registration_id(raw: &str) -> Result<RegistrationId, axum::response::Response> {
    raw.parse::<RegistrationId>()
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}

pub fn parse_category(raw: &str) -> Result<EventCategory, axum::response::Response> {
    raw.parse::<EventCategory>().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_category",
            "category must be one of: conference, workshop, seminar, meetup, concert, exhibition, other",
        )
    })
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, axum::response::Response> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_date", "date must be YYYY-MM-DD")
    })
}

/// Decode a JSON body into `T`, reporting shape errors as 400s.
pub fn from_body<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, axum::response::Response> {
    serde_json::from_value(body)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}

fn parse_positive(name: &'static str, raw: Option<&str>) -> Result<Option<u32>, axum::response::Response> {
    match non_blank(raw) {
        None => Ok(None),
        Some(v) => match v.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(Some(n)),
            _ => Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("{name} must be a positive integer"),
            )),
        },
    }
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn event_page_to_json(page: Page<Event>) -> serde_json::Value {
    json!({
        "events": page.items,
        "totalPages": page.total_pages(),
        "currentPage": page.page,
        "limit": page.limit,
        "total": page.total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_params_default_to_first_page() {
        let query = ListEventsParams::default().into_query().unwrap();
        assert_eq!(query.page(), 1);
        assert_eq!(query.limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(query.search, None);
    }

    #[test]
    fn list_params_are_parsed() {
        let params = ListEventsParams {
            search: Some(" rust ".into()),
            category: Some("Workshop".into()),
            date: Some("2026-11-01".into()),
            page: Some("2".into()),
            limit: Some("5".into()),
        };
        let query = params.into_query().unwrap();
        assert_eq!(query.search.as_deref(), Some("rust"));
        assert_eq!(query.category, Some(EventCategory::Workshop));
        assert_eq!(query.from_date, NaiveDate::from_ymd_opt(2026, 11, 1));
        assert_eq!((query.page(), query.limit()), (2, 5));
    }

    #[test]
    fn bad_list_params_are_rejected() {
        let bad = [
            ListEventsParams { page: Some("0".into()), ..Default::default() },
            ListEventsParams { limit: Some("ten".into()), ..Default::default() },
            ListEventsParams { category: Some("party".into()), ..Default::default() },
            ListEventsParams { date: Some("01/11/2026".into()), ..Default::default() },
        ];
        for params in bad {
            let res = params.into_query().unwrap_err();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn body_shape_errors_are_bad_requests() {
        let res = from_body::<RegisterRequest>(json!({ "event": "x" })).unwrap_err();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let req: RegisterRequest = from_body(json!({ "eventId": "abc" })).unwrap();
        assert_eq!(req.event_id, "abc");
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        assert_eq!(parse_event_id("nope").unwrap_err().status(), StatusCode::BAD_REQUEST);
        assert!(parse_registration_id(&RegistrationId::new().to_string()).is_ok());
    }
}
