use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use transix_booking::store::{CommitError, ReservationStore};
use transix_domain::{PassengerDetails, StoreError, Ticket, TicketStatus, Trip, TripStatus};
use transix_inventory::{InventoryError, SeatInventory};
use transix_locks::TicketView;
use uuid::Uuid;

fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::new(err)
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct TripRow {
    id: Uuid,
    departure_at: DateTime<Utc>,
    status: String,
    capacity: i32,
    price_amount: i32,
    price_currency: String,
}

impl TripRow {
    fn into_trip(self) -> Result<Trip, StoreError> {
        let status = TripStatus::parse(&self.status)
            .ok_or_else(|| StoreError::new(format!("unknown trip status '{}'", self.status)))?;
        Ok(Trip {
            id: self.id,
            departure_at: self.departure_at,
            status,
            capacity: self.capacity,
            price_amount: self.price_amount,
            price_currency: self.price_currency,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    schedule_id: Uuid,
    seat_number: i32,
    user_id: Uuid,
    status: String,
    price_amount: i32,
    price_currency: String,
    booking_reference: String,
    qr_payload: String,
    passenger_name: String,
    passenger_phone: Option<String>,
    booked_at: DateTime<Utc>,
    boarded_at: Option<DateTime<Utc>>,
    boarded_by: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
}

impl TicketRow {
    fn into_ticket(self) -> Result<Ticket, StoreError> {
        let status = TicketStatus::parse(&self.status)
            .ok_or_else(|| StoreError::new(format!("unknown ticket status '{}'", self.status)))?;
        Ok(Ticket {
            id: self.id,
            schedule_id: self.schedule_id,
            seat_number: self.seat_number,
            user_id: self.user_id,
            status,
            price_amount: self.price_amount,
            price_currency: self.price_currency,
            booking_reference: self.booking_reference,
            qr_payload: self.qr_payload,
            passenger: PassengerDetails {
                name: self.passenger_name,
                phone: self.passenger_phone,
            },
            booked_at: self.booked_at,
            boarded_at: self.boarded_at,
            boarded_by: self.boarded_by,
            cancelled_at: self.cancelled_at,
            cancellation_reason: self.cancellation_reason,
        })
    }
}

const TICKET_COLUMNS: &str = "id, schedule_id, seat_number, user_id, status, price_amount, \
     price_currency, booking_reference, qr_payload, passenger_name, passenger_phone, \
     booked_at, boarded_at, boarded_by, cancelled_at, cancellation_reason";

/// Postgres-backed reservation store.
///
/// Availability lives on the schedules row and every change to it is a
/// conditional UPDATE, so the count can never go negative no matter how
/// many replicas write at once. The partial unique index on active
/// tickets backs up the seat uniqueness check.
pub struct PgReservationStore {
    pool: PgPool,
}

impl PgReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn trip(&self, schedule_id: Uuid) -> Result<Option<Trip>, StoreError> {
        let row = sqlx::query_as::<_, TripRow>(
            "SELECT id, departure_at, status, capacity, price_amount, price_currency \
             FROM schedules WHERE id = $1",
        )
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(TripRow::into_trip).transpose()
    }

    async fn ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
        let row = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(TicketRow::into_ticket).transpose()
    }

    async fn ticket_by_reference(&self, reference: &str) -> Result<Option<Ticket>, StoreError> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE booking_reference = $1");
        let row = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(TicketRow::into_ticket).transpose()
    }

    async fn tickets_for_user(&self, user_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE user_id = $1 ORDER BY booked_at DESC"
        );
        let rows = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(TicketRow::into_ticket).collect()
    }

    async fn active_ticket(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
    ) -> Result<Option<Ticket>, StoreError> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE schedule_id = $1 AND seat_number = $2 AND status <> 'CANCELLED' LIMIT 1"
        );
        let row = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(schedule_id)
            .bind(seat_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(TicketRow::into_ticket).transpose()
    }

    async fn booked_seats(&self, schedule_id: Uuid) -> Result<Vec<i32>, StoreError> {
        sqlx::query_scalar::<_, i32>(
            "SELECT seat_number FROM tickets \
             WHERE schedule_id = $1 AND status <> 'CANCELLED' ORDER BY seat_number",
        )
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn reference_exists(&self, reference: &str) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM tickets WHERE booking_reference = $1)",
        )
        .bind(reference)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn commit_ticket(&self, ticket: Ticket) -> Result<Ticket, CommitError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // conditional decrement: zero rows means nothing left to sell
        let taken = sqlx::query(
            "UPDATE schedules SET available_seats = available_seats - 1, updated_at = NOW() \
             WHERE id = $1 AND available_seats > 0",
        )
        .bind(ticket.schedule_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if taken.rows_affected() == 0 {
            return Err(CommitError::SoldOut(ticket.schedule_id));
        }

        let inserted = sqlx::query(
            "INSERT INTO tickets (id, schedule_id, seat_number, user_id, status, price_amount, \
             price_currency, booking_reference, qr_payload, passenger_name, passenger_phone, \
             booked_at, boarded_at, boarded_by, cancelled_at, cancellation_reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(ticket.id)
        .bind(ticket.schedule_id)
        .bind(ticket.seat_number)
        .bind(ticket.user_id)
        .bind(ticket.status.as_str())
        .bind(ticket.price_amount)
        .bind(&ticket.price_currency)
        .bind(&ticket.booking_reference)
        .bind(&ticket.qr_payload)
        .bind(&ticket.passenger.name)
        .bind(&ticket.passenger.phone)
        .bind(ticket.booked_at)
        .bind(ticket.boarded_at)
        .bind(&ticket.boarded_by)
        .bind(ticket.cancelled_at)
        .bind(&ticket.cancellation_reason)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            // the active-seat unique index caught a concurrent booking
            if let sqlx::Error::Database(db) = &err {
                if db.constraint() == Some("ux_tickets_active_seat") {
                    return Err(CommitError::SeatTaken {
                        schedule_id: ticket.schedule_id,
                        seat_number: ticket.seat_number,
                    });
                }
            }
            return Err(CommitError::Storage(db_err(err)));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(ticket)
    }

    async fn transition_ticket(
        &self,
        ticket_id: Uuid,
        expect: TicketStatus,
        next: Ticket,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tickets SET status = $3, boarded_at = $4, boarded_by = $5, \
             cancelled_at = $6, cancellation_reason = $7 \
             WHERE id = $1 AND status = $2",
        )
        .bind(ticket_id)
        .bind(expect.as_str())
        .bind(next.status.as_str())
        .bind(next.boarded_at)
        .bind(&next.boarded_by)
        .bind(next.cancelled_at)
        .bind(&next.cancellation_reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel_ticket(
        &self,
        ticket_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, CommitError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let sql = format!(
            "UPDATE tickets SET status = 'CANCELLED', cancelled_at = $2, cancellation_reason = $3 \
             WHERE id = $1 AND status IN ('RESERVED', 'BOOKED') RETURNING {TICKET_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(ticket_id)
            .bind(now)
            .bind(reason)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

        let row = match row {
            Some(row) => row,
            None => {
                let status =
                    sqlx::query_scalar::<_, String>("SELECT status FROM tickets WHERE id = $1")
                        .bind(ticket_id)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(db_err)?;
                return match status {
                    None => Err(CommitError::NotFound(ticket_id)),
                    Some(s) => {
                        let current = TicketStatus::parse(&s).ok_or_else(|| {
                            StoreError::new(format!("unknown ticket status '{s}'"))
                        })?;
                        Err(CommitError::InvalidState { current })
                    }
                };
            }
        };

        sqlx::query(
            "UPDATE schedules SET available_seats = LEAST(capacity, available_seats + 1), \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(row.schedule_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(row.into_ticket()?)
    }
}

#[async_trait]
impl SeatInventory for PgReservationStore {
    async fn available(&self, schedule_id: Uuid) -> Result<i32, InventoryError> {
        let available =
            sqlx::query_scalar::<_, i32>("SELECT available_seats FROM schedules WHERE id = $1")
                .bind(schedule_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        available.ok_or(InventoryError::UnknownSchedule(schedule_id))
    }

    async fn decrement(&self, schedule_id: Uuid, count: i32) -> Result<i32, InventoryError> {
        let remaining = sqlx::query_scalar::<_, i32>(
            "UPDATE schedules SET available_seats = available_seats - $2, updated_at = NOW() \
             WHERE id = $1 AND available_seats >= $2 RETURNING available_seats",
        )
        .bind(schedule_id)
        .bind(count)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match remaining {
            Some(remaining) => Ok(remaining),
            None => match self.available(schedule_id).await {
                Ok(available) => Err(InventoryError::SoldOut {
                    schedule_id,
                    requested: count,
                    available,
                }),
                Err(err) => Err(err),
            },
        }
    }

    async fn increment(&self, schedule_id: Uuid, count: i32) -> Result<i32, InventoryError> {
        let available = sqlx::query_scalar::<_, i32>(
            "UPDATE schedules SET available_seats = LEAST(capacity, available_seats + $2), \
             updated_at = NOW() WHERE id = $1 RETURNING available_seats",
        )
        .bind(schedule_id)
        .bind(count)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        available.ok_or(InventoryError::UnknownSchedule(schedule_id))
    }
}

#[async_trait]
impl TicketView for PgReservationStore {
    async fn seat_is_ticketed(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
    ) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM tickets \
             WHERE schedule_id = $1 AND seat_number = $2 AND status <> 'CANCELLED')",
        )
        .bind(schedule_id)
        .bind(seat_number)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }
}
