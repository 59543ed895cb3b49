use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use evently_core::{DomainError, DomainResult, Entity, EventId, RegistrationId, UserId};

use crate::Admission;

/// Reason recorded when the registrant cancels without giving one.
pub const DEFAULT_CANCELLATION_REASON: &str = "User cancelled";

// ─────────────────────────────────────────────────────────────────────────────
// Status + transition table
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    /// Holds a seat; counted in the event's `registered_count`.
    Confirmed,
    /// Queued FIFO for a freed seat.
    Waitlisted,
    /// Terminal.
    Cancelled,
}

/// Every allowed `(from, to)` pair. Anything absent is rejected.
const TRANSITIONS: &[(RegistrationStatus, RegistrationStatus)] = &[
    (RegistrationStatus::Waitlisted, RegistrationStatus::Confirmed),
    (RegistrationStatus::Waitlisted, RegistrationStatus::Cancelled),
    (RegistrationStatus::Confirmed, RegistrationStatus::Cancelled),
];

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Confirmed => "confirmed",
            RegistrationStatus::Waitlisted => "waitlisted",
            RegistrationStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(self, next: RegistrationStatus) -> bool {
        TRANSITIONS.contains(&(self, next))
    }

    /// Whether this registration occupies the (user, event) uniqueness slot.
    pub fn is_active(self) -> bool {
        self != RegistrationStatus::Cancelled
    }
}

impl core::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for RegistrationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(RegistrationStatus::Confirmed),
            "waitlisted" => Ok(RegistrationStatus::Waitlisted),
            "cancelled" => Ok(RegistrationStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown registration status '{other}'"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration
// ─────────────────────────────────────────────────────────────────────────────

/// A user's registration for one event.
///
/// # Invariants
/// - `status` only moves along the transition table.
/// - `cancellation_reason` is set iff `status == Cancelled` (for records
///   created by this service).
/// - Never physically deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: RegistrationId,
    pub user_id: UserId,
    pub event_id: EventId,
    status: RegistrationStatus,
    pub registered_at: DateTime<Utc>,
    cancellation_reason: Option<String>,
}

impl Registration {
    /// New registration in the state decided by admission.
    pub fn admit(
        id: RegistrationId,
        user_id: UserId,
        event_id: EventId,
        admission: Admission,
        registered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            event_id,
            status: admission.status(),
            registered_at,
            cancellation_reason: None,
        }
    }

    /// Reassemble a registration from persisted state.
    pub fn restore(
        id: RegistrationId,
        user_id: UserId,
        event_id: EventId,
        status: RegistrationStatus,
        registered_at: DateTime<Utc>,
        cancellation_reason: Option<String>,
    ) -> Self {
        Self {
            id,
            user_id,
            event_id,
            status,
            registered_at,
            cancellation_reason,
        }
    }

    pub fn status(&self) -> RegistrationStatus {
        self.status
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    /// FIFO key for waitlist promotion.
    pub fn queue_key(&self) -> (DateTime<Utc>, RegistrationId) {
        (self.registered_at, self.id)
    }

    /// Cancel, returning the status held before cancelling.
    ///
    /// Blank reasons fall back to [`DEFAULT_CANCELLATION_REASON`].
    pub fn cancel(&mut self, reason: Option<&str>) -> DomainResult<RegistrationStatus> {
        let prior = self.status;
        self.transition(RegistrationStatus::Cancelled)?;

        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_CANCELLATION_REASON);
        self.cancellation_reason = Some(reason.to_string());
        Ok(prior)
    }

    /// Move a waitlisted registration into a freed seat.
    pub fn promote(&mut self) -> DomainResult<()> {
        self.transition(RegistrationStatus::Confirmed)
    }

    fn transition(&mut self, next: RegistrationStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(format!(
                "registration {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

impl Entity for Registration {
    type Id = RegistrationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Sort registrations into promotion order (oldest first, id breaks ties).
pub fn waitlist_order(registrations: &mut [Registration]) {
    registrations.sort_by_key(Registration::queue_key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn registration(admission: Admission) -> Registration {
        Registration::admit(
            RegistrationId::new(),
            UserId::new(),
            EventId::new(),
            admission,
            Utc::now(),
        )
    }

    fn confirmed() -> Registration {
        registration(Admission::Confirmed { registered_count: 1 })
    }

    fn waitlisted() -> Registration {
        registration(Admission::Waitlisted)
    }

    #[test]
    fn cancel_confirmed_reports_prior_status_and_default_reason() {
        let mut r = confirmed();
        let prior = r.cancel(None).unwrap();
        assert_eq!(prior, RegistrationStatus::Confirmed);
        assert_eq!(r.status(), RegistrationStatus::Cancelled);
        assert_eq!(r.cancellation_reason(), Some(DEFAULT_CANCELLATION_REASON));
    }

    #[test]
    fn cancel_keeps_explicit_reason() {
        let mut r = waitlisted();
        let prior = r.cancel(Some("Schedule conflict")).unwrap();
        assert_eq!(prior, RegistrationStatus::Waitlisted);
        assert_eq!(r.cancellation_reason(), Some("Schedule conflict"));
    }

    #[test]
    fn blank_reason_falls_back_to_default() {
        let mut r = confirmed();
        r.cancel(Some("   ")).unwrap();
        assert_eq!(r.cancellation_reason(), Some(DEFAULT_CANCELLATION_REASON));
    }

    #[test]
    fn second_cancel_is_rejected_and_changes_nothing() {
        let mut r = confirmed();
        r.cancel(Some("first")).unwrap();
        let before = r.clone();

        let err = r.cancel(Some("second")).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
        assert_eq!(r, before);
    }

    #[test]
    fn only_waitlisted_can_be_promoted() {
        let mut w = waitlisted();
        w.promote().unwrap();
        assert_eq!(w.status(), RegistrationStatus::Confirmed);

        let mut c = confirmed();
        assert!(c.promote().is_err());

        let mut x = waitlisted();
        x.cancel(None).unwrap();
        assert!(x.promote().is_err());
    }

    #[test]
    fn transition_table_is_exactly_the_documented_edges() {
        use RegistrationStatus::*;
        let all = [Confirmed, Waitlisted, Cancelled];
        let mut allowed = Vec::new();
        for from in all {
            for to in all {
                if from.can_transition_to(to) {
                    allowed.push((from, to));
                }
            }
        }
        assert_eq!(
            allowed,
            vec![(Confirmed, Cancelled), (Waitlisted, Confirmed), (Waitlisted, Cancelled)]
        );
    }

    #[test]
    fn waitlist_order_is_fifo_with_id_tie_break() {
        let t0 = Utc::now();
        let event_id = EventId::new();
        let mk = |id: u128, at| {
            Registration::restore(
                RegistrationId::from_uuid(Uuid::from_u128(id)),
                UserId::new(),
                event_id,
                RegistrationStatus::Waitlisted,
                at,
                None,
            )
        };

        let mut queue = vec![
            mk(9, t0 + Duration::seconds(1)),
            mk(5, t0),
            mk(3, t0),
        ];
        waitlist_order(&mut queue);

        let ids: Vec<u128> = queue.iter().map(|r| r.id.as_uuid().as_u128()).collect();
        assert_eq!(ids, vec![3, 5, 9]);
    }

    #[test]
    fn status_serializes_lowercase() {
        let r = waitlisted();
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "waitlisted");
        assert!(json["cancellationReason"].is_null());
        assert_eq!("cancelled".parse::<RegistrationStatus>().unwrap(), RegistrationStatus::Cancelled);
    }

    fn any_status() -> impl Strategy<Value = RegistrationStatus> {
        prop_oneof![
            Just(RegistrationStatus::Confirmed),
            Just(RegistrationStatus::Waitlisted),
            Just(RegistrationStatus::Cancelled),
        ]
    }

    proptest! {
        /// Property: no transition ever leaves `cancelled`.
        #[test]
        fn cancelled_is_terminal(next in any_status()) {
            prop_assert!(!RegistrationStatus::Cancelled.can_transition_to(next));
        }
    }
}
