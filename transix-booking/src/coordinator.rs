use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use transix_domain::events::{
    self, PassengerBoardedEvent, TicketBookedEvent, TicketCancelledEvent, TicketReservedEvent,
};
use transix_domain::{
    EventPublisher, PassengerDetails, SeatLockStatus, StoreError, Ticket, TicketStatus, Trip,
    TripStatus,
};
use transix_inventory::{InventoryError, SeatInventory};
use transix_locks::{LockError, SeatLockManager};
use uuid::Uuid;

use crate::reference;
use crate::store::{CommitError, ReservationStore};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(Uuid),

    #[error("Ticket not found: {0}")]
    TicketNotFound(String),

    #[error("Schedule {schedule_id} is {status:?} and cannot be booked")]
    ScheduleNotBookable {
        schedule_id: Uuid,
        status: TripStatus,
    },

    #[error("Schedule {0} has already departed")]
    ScheduleDeparted(Uuid),

    #[error("No seats available on schedule {0}")]
    NoSeatsAvailable(Uuid),

    #[error("Seat {seat_number} is already booked")]
    SeatAlreadyBooked { seat_number: i32 },

    #[error("Seat {seat_number} is locked by another user")]
    SeatLockedByOther { seat_number: i32 },

    #[error("Lock {lock_id} expired at {expired_at}")]
    LockExpired {
        lock_id: Uuid,
        expired_at: DateTime<Utc>,
    },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<InventoryError> for BookingError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::UnknownSchedule(id) => BookingError::ScheduleNotFound(id),
            InventoryError::SoldOut { schedule_id, .. } => {
                BookingError::NoSeatsAvailable(schedule_id)
            }
            InventoryError::Storage(e) => BookingError::Storage(e),
        }
    }
}

impl From<LockError> for BookingError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Expired {
                lock_id,
                expired_at,
            } => BookingError::LockExpired {
                lock_id,
                expired_at,
            },
            LockError::Storage(e) => BookingError::Storage(e),
            other => BookingError::Storage(StoreError::new(other)),
        }
    }
}

/// One seat on the rendered seat map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatStatus {
    pub seat_number: i32,
    pub status: SeatLockStatus,
}

/// Boarding pass payload embedded in the ticket QR code
pub fn qr_payload(
    user_id: Uuid,
    schedule_id: Uuid,
    seat_number: i32,
    issued_at: DateTime<Utc>,
) -> String {
    format!(
        "TRANSIX|{}|{}|{}|{}",
        user_id,
        schedule_id,
        seat_number,
        issued_at.format("%Y%m%d%H%M%S")
    )
}

/// Drives the ticket lifecycle over the reservation store, the seat
/// counter and the lock manager.
///
/// The coordinator validates preconditions and delegates the writes that
/// must be atomic to the store. Lock consumption and event publishing run
/// after the commit and are best effort: a dead broker or a vanished hold
/// never rolls back a sold ticket.
#[derive(Clone)]
pub struct BookingCoordinator {
    store: Arc<dyn ReservationStore>,
    inventory: Arc<dyn SeatInventory>,
    locks: Arc<dyn SeatLockManager>,
    events: Arc<dyn EventPublisher>,
}

impl BookingCoordinator {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        inventory: Arc<dyn SeatInventory>,
        locks: Arc<dyn SeatLockManager>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            inventory,
            locks,
            events,
        }
    }

    /// Book one seat for one user, committing it as a Reserved ticket.
    ///
    /// A live hold by another user refuses the booking; the caller's own
    /// hold (or an expired one) does not stand in the way.
    pub async fn book_seat(
        &self,
        user_id: Uuid,
        schedule_id: Uuid,
        seat_number: i32,
        passenger: PassengerDetails,
    ) -> Result<Ticket, BookingError> {
        if passenger.name.trim().is_empty() {
            return Err(BookingError::Validation(
                "passenger name is required".to_string(),
            ));
        }

        let trip = self
            .store
            .trip(schedule_id)
            .await?
            .ok_or(BookingError::ScheduleNotFound(schedule_id))?;

        if !trip.seat_in_range(seat_number) {
            return Err(BookingError::Validation(format!(
                "seat {} is outside 1..={}",
                seat_number, trip.capacity
            )));
        }

        if trip.status == TripStatus::Cancelled {
            return Err(BookingError::ScheduleNotBookable {
                schedule_id,
                status: trip.status,
            });
        }

        let available = self.inventory.available(schedule_id).await?;
        if available <= 0 {
            return Err(BookingError::NoSeatsAvailable(schedule_id));
        }

        if self
            .store
            .active_ticket(schedule_id, seat_number)
            .await?
            .is_some()
        {
            return Err(BookingError::SeatAlreadyBooked { seat_number });
        }

        if let Some(holder) = self.locks.active_holder(schedule_id, seat_number).await? {
            if holder != user_id {
                return Err(BookingError::SeatLockedByOther { seat_number });
            }
        }

        let now = Utc::now();
        let booking_reference = reference::unique_reference(self.store.as_ref()).await?;
        let ticket = Ticket {
            id: Uuid::new_v4(),
            schedule_id,
            seat_number,
            user_id,
            status: TicketStatus::Reserved,
            price_amount: trip.price_amount,
            price_currency: trip.price_currency.clone(),
            booking_reference,
            qr_payload: qr_payload(user_id, schedule_id, seat_number, now),
            passenger,
            booked_at: now,
            boarded_at: None,
            boarded_by: None,
            cancelled_at: None,
            cancellation_reason: None,
        };

        let ticket = match self.store.commit_ticket(ticket).await {
            Ok(ticket) => ticket,
            // raced against another booking between the checks and the commit
            Err(CommitError::SoldOut(id)) => return Err(BookingError::NoSeatsAvailable(id)),
            Err(CommitError::SeatTaken { seat_number, .. }) => {
                return Err(BookingError::SeatAlreadyBooked { seat_number })
            }
            Err(CommitError::Storage(e)) => return Err(BookingError::Storage(e)),
            Err(other) => return Err(BookingError::Storage(StoreError::new(other))),
        };

        // the seat is sold, a vanished hold is nothing to fail over
        match self.locks.consume(schedule_id, seat_number, user_id).await {
            Ok(true) => debug!(ticket_id = %ticket.id, "seat hold consumed"),
            Ok(false) => {}
            Err(err) => warn!(error = %err, "failed to consume seat hold"),
        }

        self.publish(
            events::topics::TICKET_RESERVED,
            &ticket.id.to_string(),
            &TicketReservedEvent {
                ticket_id: ticket.id,
                schedule_id,
                seat_number,
                user_id,
                price_amount: ticket.price_amount,
                price_currency: ticket.price_currency.clone(),
                reserved_at: now.timestamp(),
            },
        )
        .await;

        info!(
            ticket_id = %ticket.id,
            schedule_id = %schedule_id,
            seat = seat_number,
            reference = %ticket.booking_reference,
            "seat booked"
        );
        Ok(ticket)
    }

    /// Payment confirmation: Reserved -> Booked. Confirming an already
    /// Booked ticket is a no-op success.
    pub async fn confirm_payment(&self, ticket_id: Uuid) -> Result<Ticket, BookingError> {
        let ticket = self.require_ticket(ticket_id).await?;

        match ticket.status {
            TicketStatus::Booked => return Ok(ticket),
            TicketStatus::Reserved => {}
            other => {
                return Err(BookingError::InvalidTransition {
                    from: format!("{other:?}"),
                    to: "BOOKED".to_string(),
                })
            }
        }

        let mut updated = ticket.clone();
        updated.mark_booked();

        if !self
            .store
            .transition_ticket(ticket_id, TicketStatus::Reserved, updated.clone())
            .await?
        {
            // a concurrent writer moved the ticket first
            let fresh = self.require_ticket(ticket_id).await?;
            if fresh.status == TicketStatus::Booked {
                return Ok(fresh);
            }
            return Err(BookingError::InvalidTransition {
                from: format!("{:?}", fresh.status),
                to: "BOOKED".to_string(),
            });
        }

        self.publish(
            events::topics::TICKET_BOOKED,
            &ticket_id.to_string(),
            &TicketBookedEvent {
                ticket_id,
                schedule_id: updated.schedule_id,
                booked_at: Utc::now().timestamp(),
            },
        )
        .await;

        info!(ticket_id = %ticket_id, "payment confirmed");
        Ok(updated)
    }

    /// Cancel a Reserved or Booked ticket and free its seat. Refused once
    /// the trip has departed or the ticket is in a terminal state.
    pub async fn cancel_booking(
        &self,
        ticket_id: Uuid,
        reason: &str,
    ) -> Result<Ticket, BookingError> {
        let ticket = self.require_ticket(ticket_id).await?;

        if !matches!(ticket.status, TicketStatus::Reserved | TicketStatus::Booked) {
            return Err(BookingError::InvalidTransition {
                from: format!("{:?}", ticket.status),
                to: "CANCELLED".to_string(),
            });
        }

        let trip = self
            .store
            .trip(ticket.schedule_id)
            .await?
            .ok_or(BookingError::ScheduleNotFound(ticket.schedule_id))?;
        let now = Utc::now();
        if trip.has_departed(now) {
            return Err(BookingError::ScheduleDeparted(trip.id));
        }

        let reason = if reason.trim().is_empty() {
            "Cancelled by user"
        } else {
            reason
        };

        let cancelled = match self.store.cancel_ticket(ticket_id, reason, now).await {
            Ok(ticket) => ticket,
            Err(CommitError::NotFound(id)) => {
                return Err(BookingError::TicketNotFound(id.to_string()))
            }
            Err(CommitError::InvalidState { current }) => {
                return Err(BookingError::InvalidTransition {
                    from: format!("{current:?}"),
                    to: "CANCELLED".to_string(),
                })
            }
            Err(CommitError::Storage(e)) => return Err(BookingError::Storage(e)),
            Err(other) => return Err(BookingError::Storage(StoreError::new(other))),
        };

        self.publish(
            events::topics::TICKET_CANCELLED,
            &ticket_id.to_string(),
            &TicketCancelledEvent {
                ticket_id,
                schedule_id: cancelled.schedule_id,
                seat_number: cancelled.seat_number,
                reason: reason.to_string(),
                cancelled_at: now.timestamp(),
            },
        )
        .await;

        info!(
            ticket_id = %ticket_id,
            seat = cancelled.seat_number,
            "booking cancelled"
        );
        Ok(cancelled)
    }

    /// Boarding: Booked -> Completed, allowed once the presented code
    /// matches the ticket's QR payload.
    pub async fn confirm_boarding(
        &self,
        ticket_id: Uuid,
        operator: &str,
        qr_code: &str,
    ) -> Result<Ticket, BookingError> {
        let ticket = self.require_ticket(ticket_id).await?;

        if ticket.status != TicketStatus::Booked {
            return Err(BookingError::InvalidTransition {
                from: format!("{:?}", ticket.status),
                to: "COMPLETED".to_string(),
            });
        }

        if qr_code != ticket.qr_payload {
            return Err(BookingError::Validation(
                "boarding code does not match ticket".to_string(),
            ));
        }

        let now = Utc::now();
        let mut updated = ticket.clone();
        updated.mark_boarded(operator.to_string(), now);

        if !self
            .store
            .transition_ticket(ticket_id, TicketStatus::Booked, updated.clone())
            .await?
        {
            let fresh = self.require_ticket(ticket_id).await?;
            return Err(BookingError::InvalidTransition {
                from: format!("{:?}", fresh.status),
                to: "COMPLETED".to_string(),
            });
        }

        self.publish(
            events::topics::PASSENGER_BOARDED,
            &ticket_id.to_string(),
            &PassengerBoardedEvent {
                ticket_id,
                schedule_id: updated.schedule_id,
                seat_number: updated.seat_number,
                boarded_at: now.timestamp(),
            },
        )
        .await;

        info!(ticket_id = %ticket_id, operator = operator, "passenger boarded");
        Ok(updated)
    }

    pub async fn ticket(&self, ticket_id: Uuid) -> Result<Ticket, BookingError> {
        self.require_ticket(ticket_id).await
    }

    pub async fn ticket_by_reference(&self, reference: &str) -> Result<Ticket, BookingError> {
        self.store
            .ticket_by_reference(reference)
            .await?
            .ok_or_else(|| BookingError::TicketNotFound(reference.to_string()))
    }

    pub async fn user_tickets(&self, user_id: Uuid) -> Result<Vec<Ticket>, BookingError> {
        Ok(self.store.tickets_for_user(user_id).await?)
    }

    /// Per-seat view of a schedule. A booked seat shows as Booked even if
    /// a stale lock row still exists underneath.
    pub async fn seat_layout(&self, schedule_id: Uuid) -> Result<Vec<SeatStatus>, BookingError> {
        let trip = self
            .store
            .trip(schedule_id)
            .await?
            .ok_or(BookingError::ScheduleNotFound(schedule_id))?;

        let booked: HashSet<i32> = self.store.booked_seats(schedule_id).await?.into_iter().collect();
        let locked: HashSet<i32> = self
            .locks
            .locked_seats(schedule_id)
            .await?
            .into_iter()
            .collect();

        Ok((1..=trip.capacity)
            .map(|seat_number| {
                let status = if booked.contains(&seat_number) {
                    SeatLockStatus::Booked
                } else if locked.contains(&seat_number) {
                    SeatLockStatus::Locked
                } else {
                    SeatLockStatus::Available
                };
                SeatStatus {
                    seat_number,
                    status,
                }
            })
            .collect())
    }

    pub async fn booked_seats(&self, schedule_id: Uuid) -> Result<Vec<i32>, BookingError> {
        // surface unknown schedules instead of an empty list
        self.store
            .trip(schedule_id)
            .await?
            .ok_or(BookingError::ScheduleNotFound(schedule_id))?;
        Ok(self.store.booked_seats(schedule_id).await?)
    }

    pub async fn trip(&self, schedule_id: Uuid) -> Result<Trip, BookingError> {
        self.store
            .trip(schedule_id)
            .await?
            .ok_or(BookingError::ScheduleNotFound(schedule_id))
    }

    async fn require_ticket(&self, ticket_id: Uuid) -> Result<Ticket, BookingError> {
        self.store
            .ticket(ticket_id)
            .await?
            .ok_or_else(|| BookingError::TicketNotFound(ticket_id.to_string()))
    }

    async fn publish<E: Serialize>(&self, topic: &str, key: &str, event: &E) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(topic = topic, error = %err, "failed to serialize event");
                return;
            }
        };
        if let Err(err) = self.events.publish(topic, key, &payload).await {
            warn!(topic = topic, error = %err, "failed to publish event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_qr_payload_format() {
        let user_id = Uuid::nil();
        let schedule_id = Uuid::nil();
        let issued = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();

        let payload = qr_payload(user_id, schedule_id, 7, issued);
        assert_eq!(
            payload,
            format!("TRANSIX|{user_id}|{schedule_id}|7|20260314092653")
        );
    }
}
