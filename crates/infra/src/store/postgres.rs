//! Postgres-backed ledger.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (check constraint violation) | `23514` | `Backend` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / Io / other | N/A | `Backend` |
//!
//! ## Seat accounting
//!
//! [`RegistrationLedger::commit`] runs in one transaction. The seat update is
//! a conditional `UPDATE ... WHERE capacity = $expected AND registered_count = $expected`;
//! zero affected rows means another writer moved the counters first and the
//! whole transaction is rolled back.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use evently_catalog::{Capacity, Event, EventCategory, EventDetails, EventQuery, Page, Seats};
use evently_core::{EventId, RegistrationId, UserId};
use evently_registration::{Registration, RegistrationStatus};

use super::r#trait::{
    EventStore, LedgerCommit, RegistrationLedger, RegistrationStore, RegistrationWrite, StoreError,
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const EVENT_COLUMNS: &str = "id, organizer_id, title, description, date, time, location, venue, \
     category, image, price, capacity, registered_count, is_published, created_at";

const REGISTRATION_COLUMNS: &str = "id, user_id, event_id, status, registered_at, cancellation_reason";

/// Postgres-backed events + registrations.
///
/// `Send + Sync`; clones share the same pool.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: Arc<PgPool>,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn fetch_event(&self, event_id: EventId) -> Result<Event, StoreError> {
        self.get_event(event_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("event {event_id}")))
    }

    async fn fetch_registrations(
        &self,
        operation: &str,
        sql: &str,
        key: uuid::Uuid,
    ) -> Result<Vec<Registration>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(key)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(registration_from_row).collect()
    }
}

#[async_trait]
impl EventStore for PostgresLedger {
    #[instrument(skip(self), fields(event_id = %event_id), err)]
    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
            .bind(event_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_event", e))?;
        row.as_ref().map(event_from_row).transpose()
    }

    #[instrument(skip(self, event), fields(event_id = %event.id), err)]
    async fn insert_event(&self, event: Event) -> Result<Event, StoreError> {
        let d = &event.details;
        sqlx::query(
            r#"
            INSERT INTO events (
                id, organizer_id, title, description, date, time, location, venue,
                category, image, price, capacity, registered_count, is_published, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.organizer_id.as_uuid())
        .bind(&d.title)
        .bind(&d.description)
        .bind(d.date)
        .bind(&d.time)
        .bind(&d.location)
        .bind(&d.venue)
        .bind(d.category.as_str())
        .bind(&d.image)
        .bind(to_i64("price", d.price)?)
        .bind(to_i32("capacity", event.capacity().get())?)
        .bind(to_i32("registered_count", event.registered_count())?)
        .bind(event.is_published)
        .bind(event.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_event", e))?;

        Ok(event)
    }

    #[instrument(skip(self, details), fields(event_id = %event_id), err)]
    async fn update_details(&self, event_id: EventId, details: EventDetails) -> Result<Event, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET title = $2, description = $3, date = $4, time = $5, location = $6,
                venue = $7, category = $8, image = $9, price = $10
            WHERE id = $1
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(&details.title)
        .bind(&details.description)
        .bind(details.date)
        .bind(&details.time)
        .bind(&details.location)
        .bind(&details.venue)
        .bind(details.category.as_str())
        .bind(&details.image)
        .bind(to_i64("price", details.price)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_details", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("event {event_id}")));
        }
        self.fetch_event(event_id).await
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    async fn set_published(&self, event_id: EventId, published: bool) -> Result<Event, StoreError> {
        let result = sqlx::query("UPDATE events SET is_published = $2 WHERE id = $1")
            .bind(event_id.as_uuid())
            .bind(published)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_published", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("event {event_id}")));
        }
        self.fetch_event(event_id).await
    }

    #[instrument(
        skip(self, query),
        fields(page = query.page(), limit = query.limit(), returned = tracing::field::Empty),
        err
    )]
    async fn list_events(&self, query: &EventQuery) -> Result<Page<Event>, StoreError> {
        let category = query.category.map(|c| c.as_str());
        let search = query.search.as_deref();

        const FILTER: &str = r#"
            WHERE is_published
                AND ($1::text IS NULL OR category = $1)
                AND ($2::date IS NULL OR date >= $2)
                AND ($3::text IS NULL
                    OR strpos(lower(title), lower($3)) > 0
                    OR strpos(lower(description), lower($3)) > 0
                    OR strpos(lower(location), lower($3)) > 0)
        "#;

        let count_row = sqlx::query(&format!("SELECT COUNT(*) AS total FROM events {FILTER}"))
            .bind(category)
            .bind(query.from_date)
            .bind(search)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_events", e))?;
        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| StoreError::Backend(format!("failed to read count: {e}")))?;

        let offset = i64::try_from(query.offset())
            .map_err(|e| StoreError::Backend(format!("offset out of range: {e}")))?;
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events {FILTER} \
             ORDER BY date ASC, created_at ASC, id ASC LIMIT $4 OFFSET $5"
        ))
        .bind(category)
        .bind(query.from_date)
        .bind(search)
        .bind(i64::from(query.limit()))
        .bind(offset)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_events", e))?;

        let items = rows.iter().map(event_from_row).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("returned", items.len());

        Ok(Page {
            items,
            total: total.max(0) as u64,
            page: query.page(),
            limit: query.limit(),
        })
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    async fn try_set_registered_count(
        &self,
        event_id: EventId,
        expected: u32,
        new: u32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE events SET registered_count = $3 WHERE id = $1 AND registered_count = $2",
        )
        .bind(event_id.as_uuid())
        .bind(to_i32("expected", expected)?)
        .bind(to_i32("registered_count", new)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("try_set_registered_count", e))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        // Distinguish "moved" from "gone".
        self.fetch_event(event_id).await?;
        Ok(false)
    }
}

#[async_trait]
impl RegistrationStore for PostgresLedger {
    #[instrument(skip(self), fields(registration_id = %id), err)]
    async fn get_registration(&self, id: RegistrationId) -> Result<Option<Registration>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_registration", e))?;
        row.as_ref().map(registration_from_row).transpose()
    }

    #[instrument(skip(self), fields(user_id = %user_id, event_id = %event_id), err)]
    async fn find_non_cancelled(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<Option<Registration>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations \
             WHERE user_id = $1 AND event_id = $2 AND status <> 'cancelled'"
        ))
        .bind(user_id.as_uuid())
        .bind(event_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_non_cancelled", e))?;
        row.as_ref().map(registration_from_row).transpose()
    }

    #[instrument(skip(self, registration), fields(registration_id = %registration.id), err)]
    async fn insert_registration(&self, registration: Registration) -> Result<Registration, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        if let Err(e) = insert_registration_row(&mut tx, &registration).await {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(e);
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(registration)
    }

    #[instrument(skip(self, registration), fields(registration_id = %registration.id), err)]
    async fn update_registration(&self, registration: &Registration, from: RegistrationStatus) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        if let Err(e) = update_registration_row(&mut tx, registration, from).await {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(e);
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    async fn list_waitlisted(&self, event_id: EventId, limit: usize) -> Result<Vec<Registration>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations \
             WHERE event_id = $1 AND status = 'waitlisted' \
             ORDER BY registered_at ASC, id ASC LIMIT $2"
        ))
        .bind(event_id.as_uuid())
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_waitlisted", e))?;
        rows.iter().map(registration_from_row).collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Registration>, StoreError> {
        self.fetch_registrations(
            "list_for_user",
            &format!(
                "SELECT {REGISTRATION_COLUMNS} FROM registrations \
                 WHERE user_id = $1 ORDER BY registered_at DESC, id DESC"
            ),
            *user_id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    async fn list_for_event(&self, event_id: EventId) -> Result<Vec<Registration>, StoreError> {
        self.fetch_registrations(
            "list_for_event",
            &format!(
                "SELECT {REGISTRATION_COLUMNS} FROM registrations \
                 WHERE event_id = $1 ORDER BY registered_at DESC, id DESC"
            ),
            *event_id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    async fn count_confirmed(&self, event_id: EventId) -> Result<u32, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS confirmed FROM registrations WHERE event_id = $1 AND status = 'confirmed'",
        )
        .bind(event_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_confirmed", e))?;
        let confirmed: i64 = row
            .try_get("confirmed")
            .map_err(|e| StoreError::Backend(format!("failed to read count: {e}")))?;
        u32::try_from(confirmed).map_err(|e| StoreError::Backend(format!("confirmed count out of range: {e}")))
    }
}

#[async_trait]
impl RegistrationLedger for PostgresLedger {
    #[instrument(
        skip(self, commit),
        fields(
            event_id = %commit.event_id,
            expected_registered = commit.expected.registered_count(),
            next_registered = commit.next.registered_count(),
            writes = commit.writes.len()
        ),
        err
    )]
    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Err(e) = apply_commit(&mut tx, &commit).await {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(e);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), err)]
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

async fn apply_commit(tx: &mut Transaction<'_, Postgres>, commit: &LedgerCommit) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE events
        SET capacity = $4, registered_count = $5
        WHERE id = $1 AND capacity = $2 AND registered_count = $3
        "#,
    )
    .bind(commit.event_id.as_uuid())
    .bind(to_i32("capacity", commit.expected.capacity().get())?)
    .bind(to_i32("registered_count", commit.expected.registered_count())?)
    .bind(to_i32("capacity", commit.next.capacity().get())?)
    .bind(to_i32("registered_count", commit.next.registered_count())?)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_seats", e))?;

    if result.rows_affected() == 0 {
        let exists = sqlx::query("SELECT 1 FROM events WHERE id = $1")
            .bind(commit.event_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("check_event", e))?
            .is_some();
        return Err(if exists {
            StoreError::StaleSeats(commit.event_id)
        } else {
            StoreError::NotFound(format!("event {}", commit.event_id))
        });
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
            RegistrationWrite::Insert(r) => insert_registration_row(tx, r).await?,
            RegistrationWrite::Update { registration, from } => {
                update_registration_row(tx, registration, *from).await?
            }
        }
    }
    Ok(())
}

async fn insert_registration_row(
    tx: &mut Transaction<'_, Postgres>,
    registration: &Registration,
) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "INSERT INTO registrations ({REGISTRATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
    ))
    .bind(registration.id.as_uuid())
    .bind(registration.user_id.as_uuid())
    .bind(registration.event_id.as_uuid())
    .bind(registration.status().as_str())
    .bind(registration.registered_at)
    .bind(registration.cancellation_reason())
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::Duplicate(format!(
                "user {} already holds an active registration for event {}",
                registration.user_id, registration.event_id
            ))
        } else {
            map_sqlx_error("insert_registration", e)
        }
    })?;
    Ok(())
}

/// Status change guarded by the row's prior status.
async fn update_registration_row(
    tx: &mut Transaction<'_, Postgres>,
    registration: &Registration,
    from: RegistrationStatus,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE registrations SET status = $2, cancellation_reason = $3 WHERE id = $1 AND status = $4",
    )
    .bind(registration.id.as_uuid())
    .bind(registration.status().as_str())
    .bind(registration.cancellation_reason())
    .bind(from.as_str())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_registration", e))?;

    if result.rows_affected() == 0 {
        let exists = sqlx::query("SELECT 1 FROM registrations WHERE id = $1")
            .bind(registration.id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("check_registration", e))?
            .is_some();
        return Err(if exists {
            StoreError::StaleSeats(registration.event_id)
        } else {
            StoreError::NotFound(format!("registration {}", registration.id))
        });
    }
    Ok(())
}

fn event_from_row(row: &PgRow) -> Result<Event, StoreError> {
    let read = |e: sqlx::Error| StoreError::Backend(format!("failed to deserialize event row: {e}"));

    let category: String = row.try_get("category").map_err(read)?;
    let price: i64 = row.try_get("price").map_err(read)?;
    let capacity: i32 = row.try_get("capacity").map_err(read)?;
    let registered_count: i32 = row.try_get("registered_count").map_err(read)?;

    let capacity = u32::try_from(capacity)
        .ok()
        .and_then(|c| Capacity::new(c).ok())
        .ok_or_else(|| StoreError::Backend(format!("stored capacity {capacity} is invalid")))?;
    let registered_count = u32::try_from(registered_count)
        .map_err(|_| StoreError::Backend(format!("stored registered_count {registered_count} is invalid")))?;

    let details = EventDetails {
        title: row.try_get("title").map_err(read)?,
        description: row.try_get("description").map_err(read)?,
        date: row.try_get("date").map_err(read)?,
        time: row.try_get("time").map_err(read)?,
        location: row.try_get("location").map_err(read)?,
        venue: row.try_get("venue").map_err(read)?,
        category: EventCategory::from_str(&category).map_err(|e| StoreError::Backend(e.to_string()))?,
        image: row.try_get("image").map_err(read)?,
        price: u64::try_from(price)
            .map_err(|_| StoreError::Backend(format!("stored price {price} is invalid")))?,
    };

    let id: uuid::Uuid = row.try_get("id").map_err(read)?;
    let organizer_id: uuid::Uuid = row.try_get("organizer_id").map_err(read)?;

    Ok(Event::restore(
        EventId::from_uuid(id),
        UserId::from_uuid(organizer_id),
        details,
        Seats::from_storage(capacity, registered_count),
        row.try_get("is_published").map_err(read)?,
        row.try_get("created_at").map_err(read)?,
    ))
}

fn registration_from_row(row: &PgRow) -> Result<Registration, StoreError> {
    let read = |e: sqlx::Error| StoreError::Backend(format!("failed to deserialize registration row: {e}"));

    let id: uuid::Uuid = row.try_get("id").map_err(read)?;
    let user_id: uuid::Uuid = row.try_get("user_id").map_err(read)?;
    let event_id: uuid::Uuid = row.try_get("event_id").map_err(read)?;
    let status: String = row.try_get("status").map_err(read)?;

    Ok(Registration::restore(
        RegistrationId::from_uuid(id),
        UserId::from_uuid(user_id),
        EventId::from_uuid(event_id),
        RegistrationStatus::from_str(&status).map_err(|e| StoreError::Backend(e.to_string()))?,
        row.try_get("registered_at").map_err(read)?,
        row.try_get("cancellation_reason").map_err(read)?,
    ))
}

fn to_i32(field: &str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Backend(format!("{field} {value} does not fit the column")))
}

fn to_i64(field: &str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Backend(format!("{field} {value} does not fit the column")))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        sqlx::Error::RowNotFound => StoreError::Backend(format!("unexpected row not found in {operation}")),
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}
