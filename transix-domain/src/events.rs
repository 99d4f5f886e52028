use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PublishError;

/// Kafka topic names for outbound ticket lifecycle events
pub mod topics {
    pub const TICKET_RESERVED: &str = "ticket.reserved";
    pub const TICKET_BOOKED: &str = "ticket.booked";
    pub const TICKET_CANCELLED: &str = "ticket.cancelled";
    pub const PASSENGER_BOARDED: &str = "passenger.boarded";
}

/// Emitted when a seat is committed as a Reserved ticket.
/// Payment picks this up and charges `price_amount`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TicketReservedEvent {
    pub ticket_id: Uuid,
    pub schedule_id: Uuid,
    pub seat_number: i32,
    pub user_id: Uuid,
    pub price_amount: i32,
    pub price_currency: String,
    pub reserved_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TicketBookedEvent {
    pub ticket_id: Uuid,
    pub schedule_id: Uuid,
    pub booked_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TicketCancelledEvent {
    pub ticket_id: Uuid,
    pub schedule_id: Uuid,
    pub seat_number: i32,
    pub reason: String,
    pub cancelled_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PassengerBoardedEvent {
    pub ticket_id: Uuid,
    pub schedule_id: Uuid,
    pub seat_number: i32,
    pub boarded_at: i64,
}

/// Outbound event sink. Delivery is best effort; the booking flow never
/// fails because a broker is down.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), PublishError>;
}

/// Publisher that drops everything, for deployments without a broker
pub struct NullPublisher;

#[async_trait]
impl EventPublisher for NullPublisher {
    async fn publish(&self, _topic: &str, _key: &str, _payload: &str) -> Result<(), PublishError> {
        Ok(())
    }
}
