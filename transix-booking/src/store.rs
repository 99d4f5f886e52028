use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use transix_domain::{StoreError, Ticket, TicketStatus, Trip};
use transix_inventory::{InventoryError, SeatInventory};
use transix_locks::TicketView;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("Ticket not found: {0}")]
    NotFound(Uuid),

    #[error("No seats available on schedule {0}")]
    SoldOut(Uuid),

    #[error("Seat {seat_number} on schedule {schedule_id} already has an active ticket")]
    SeatTaken {
        schedule_id: Uuid,
        seat_number: i32,
    },

    #[error("Invalid ticket state: {current:?}")]
    InvalidState { current: TicketStatus },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Persistence for trips and tickets.
///
/// The compound writes are the whole point: `commit_ticket` inserts the
/// ticket and takes its seat from the availability count as one atomic
/// step, and `cancel_ticket` gives the seat back the same way. Everything
/// the seat invariants depend on happens inside these two calls.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn trip(&self, schedule_id: Uuid) -> Result<Option<Trip>, StoreError>;

    async fn ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError>;

    async fn ticket_by_reference(&self, reference: &str) -> Result<Option<Ticket>, StoreError>;

    /// A user's tickets, newest first
    async fn tickets_for_user(&self, user_id: Uuid) -> Result<Vec<Ticket>, StoreError>;

    /// The active (non-cancelled) ticket occupying a seat, if any
    async fn active_ticket(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
    ) -> Result<Option<Ticket>, StoreError>;

    /// Seat numbers with an active ticket, ascending
    async fn booked_seats(&self, schedule_id: Uuid) -> Result<Vec<i32>, StoreError>;

    async fn reference_exists(&self, reference: &str) -> Result<bool, StoreError>;

    /// Insert a Reserved ticket and decrement availability in one atomic
    /// step. Refuses when the seat already has an active ticket or no
    /// seats remain.
    async fn commit_ticket(&self, ticket: Ticket) -> Result<Ticket, CommitError>;

    /// Replace the ticket row only if its status still equals `expect`.
    /// Returns false when a concurrent writer got there first.
    async fn transition_ticket(
        &self,
        ticket_id: Uuid,
        expect: TicketStatus,
        next: Ticket,
    ) -> Result<bool, StoreError>;

    /// Cancel a Reserved or Booked ticket and return its seat to the
    /// availability count in one atomic step.
    async fn cancel_ticket(
        &self,
        ticket_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, CommitError>;
}

#[derive(Default)]
struct Inner {
    trips: HashMap<Uuid, Trip>,
    available: HashMap<Uuid, i32>,
    tickets: HashMap<Uuid, Ticket>,
}

/// In-memory reservation store. One mutex guards trips, counts and
/// tickets together, which is what makes the compound writes atomic.
#[derive(Default)]
pub struct MemoryReservationStore {
    inner: Mutex<Inner>,
}

impl MemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trip with every seat available
    pub fn add_trip(&self, trip: Trip) {
        let mut inner = self.inner.lock().unwrap();
        inner.available.insert(trip.id, trip.capacity);
        inner.trips.insert(trip.id, trip);
    }
}

#[async_trait]
impl ReservationStore for MemoryReservationStore {
    async fn trip(&self, schedule_id: Uuid) -> Result<Option<Trip>, StoreError> {
        Ok(self.inner.lock().unwrap().trips.get(&schedule_id).cloned())
    }

    async fn ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError> {
        Ok(self.inner.lock().unwrap().tickets.get(&ticket_id).cloned())
    }

    async fn ticket_by_reference(&self, reference: &str) -> Result<Option<Ticket>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tickets
            .values()
            .find(|t| t.booking_reference == reference)
            .cloned())
    }

    async fn tickets_for_user(&self, user_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.booked_at.cmp(&a.booked_at));
        Ok(tickets)
    }

    async fn active_ticket(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
    ) -> Result<Option<Ticket>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tickets
            .values()
            .find(|t| {
                t.schedule_id == schedule_id && t.seat_number == seat_number && t.is_active()
            })
            .cloned())
    }

    async fn booked_seats(&self, schedule_id: Uuid) -> Result<Vec<i32>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut seats: Vec<i32> = inner
            .tickets
            .values()
            .filter(|t| t.schedule_id == schedule_id && t.is_active())
            .map(|t| t.seat_number)
            .collect();
        seats.sort_unstable();
        Ok(seats)
    }

    async fn reference_exists(&self, reference: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tickets
            .values()
            .any(|t| t.booking_reference == reference))
    }

    async fn commit_ticket(&self, ticket: Ticket) -> Result<Ticket, CommitError> {
        let mut inner = self.inner.lock().unwrap();

        let seat_taken = inner.tickets.values().any(|t| {
            t.schedule_id == ticket.schedule_id
                && t.seat_number == ticket.seat_number
                && t.is_active()
        });
        if seat_taken {
            return Err(CommitError::SeatTaken {
                schedule_id: ticket.schedule_id,
                seat_number: ticket.seat_number,
            });
        }

        let available = inner
            .available
            .get_mut(&ticket.schedule_id)
            .ok_or_else(|| StoreError::new("schedule has no availability record"))?;
        if *available < 1 {
            return Err(CommitError::SoldOut(ticket.schedule_id));
        }
        *available -= 1;

        inner.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn transition_ticket(
        &self,
        ticket_id: Uuid,
        expect: TicketStatus,
        next: Ticket,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.tickets.get_mut(&ticket_id) {
            Some(current) if current.status == expect => {
                *current = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_ticket(
        &self,
        ticket_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, CommitError> {
        let mut inner = self.inner.lock().unwrap();

        let capacity = {
            let ticket = inner
                .tickets
                .get(&ticket_id)
                .ok_or(CommitError::NotFound(ticket_id))?;
            if !matches!(ticket.status, TicketStatus::Reserved | TicketStatus::Booked) {
                return Err(CommitError::InvalidState {
                    current: ticket.status,
                });
            }
            inner
                .trips
                .get(&ticket.schedule_id)
                .map(|t| t.capacity)
                .ok_or_else(|| StoreError::new("schedule missing for ticket"))?
        };

        let ticket = inner
            .tickets
            .get_mut(&ticket_id)
            .ok_or(CommitError::NotFound(ticket_id))?;
        ticket.mark_cancelled(reason.to_string(), now);
        let schedule_id = ticket.schedule_id;
        let cancelled = ticket.clone();

        if let Some(available) = inner.available.get_mut(&schedule_id) {
            *available = (*available + 1).min(capacity);
        }

        Ok(cancelled)
    }
}

#[async_trait]
impl SeatInventory for MemoryReservationStore {
    async fn available(&self, schedule_id: Uuid) -> Result<i32, InventoryError> {
        let inner = self.inner.lock().unwrap();
        inner
            .available
            .get(&schedule_id)
            .copied()
            .ok_or(InventoryError::UnknownSchedule(schedule_id))
    }

    async fn decrement(&self, schedule_id: Uuid, count: i32) -> Result<i32, InventoryError> {
        let mut inner = self.inner.lock().unwrap();
        let available = inner
            .available
            .get_mut(&schedule_id)
            .ok_or(InventoryError::UnknownSchedule(schedule_id))?;
        if *available < count {
            return Err(InventoryError::SoldOut {
                schedule_id,
                requested: count,
                available: *available,
            });
        }
        *available -= count;
        Ok(*available)
    }

    async fn increment(&self, schedule_id: Uuid, count: i32) -> Result<i32, InventoryError> {
        let mut inner = self.inner.lock().unwrap();
        let capacity = inner
            .trips
            .get(&schedule_id)
            .map(|t| t.capacity)
            .ok_or(InventoryError::UnknownSchedule(schedule_id))?;
        let available = inner
            .available
            .get_mut(&schedule_id)
            .ok_or(InventoryError::UnknownSchedule(schedule_id))?;
        *available = (*available + count).min(capacity);
        Ok(*available)
    }
}

#[async_trait]
impl TicketView for MemoryReservationStore {
    async fn seat_is_ticketed(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
    ) -> Result<bool, StoreError> {
        let ticket = self.active_ticket(schedule_id, seat_number).await?;
        Ok(ticket.is_some())
    }
}
