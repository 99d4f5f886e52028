use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ticket status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Reserved,
    Booked,
    Completed,
    Cancelled,
}

impl TicketStatus {
    /// Active tickets occupy a seat and count against capacity
    pub fn is_active(&self) -> bool {
        !matches!(self, TicketStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Reserved => "RESERVED",
            TicketStatus::Booked => "BOOKED",
            TicketStatus::Completed => "COMPLETED",
            TicketStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RESERVED" => Some(TicketStatus::Reserved),
            "BOOKED" => Some(TicketStatus::Booked),
            "COMPLETED" => Some(TicketStatus::Completed),
            "CANCELLED" => Some(TicketStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassengerDetails {
    pub name: String,
    pub phone: Option<String>,
}

/// The single source of truth for a seat purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub seat_number: i32,
    pub user_id: Uuid,
    pub status: TicketStatus,
    pub price_amount: i32,
    pub price_currency: String,
    pub booking_reference: String,
    pub qr_payload: String,
    pub passenger: PassengerDetails,
    pub booked_at: DateTime<Utc>,
    pub boarded_at: Option<DateTime<Utc>>,
    pub boarded_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl Ticket {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Payment confirmation moves the reservation to a firm booking
    pub fn mark_booked(&mut self) {
        self.status = TicketStatus::Booked;
    }

    /// Boarding consumes the ticket (terminal)
    pub fn mark_boarded(&mut self, boarded_by: String, at: DateTime<Utc>) {
        self.status = TicketStatus::Completed;
        self.boarded_at = Some(at);
        self.boarded_by = Some(boarded_by);
    }

    /// Cancellation frees the seat (terminal, row kept for audit)
    pub fn mark_cancelled(&mut self, reason: String, at: DateTime<Utc>) {
        self.status = TicketStatus::Cancelled;
        self.cancelled_at = Some(at);
        self.cancellation_reason = Some(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ticket() -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            schedule_id: Uuid::new_v4(),
            seat_number: 7,
            user_id: Uuid::new_v4(),
            status: TicketStatus::Reserved,
            price_amount: 2500,
            price_currency: "USD".to_string(),
            booking_reference: "ABCD2345".to_string(),
            qr_payload: "payload".to_string(),
            passenger: PassengerDetails {
                name: "Test Passenger".to_string(),
                phone: None,
            },
            booked_at: Utc::now(),
            boarded_at: None,
            boarded_by: None,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }

    #[test]
    fn test_active_states() {
        let mut ticket = sample_ticket();
        assert!(ticket.is_active());

        ticket.mark_booked();
        assert!(ticket.is_active());

        ticket.mark_boarded("gate-3".to_string(), Utc::now());
        assert!(ticket.is_active());
        assert_eq!(ticket.status, TicketStatus::Completed);

        let mut cancelled = sample_ticket();
        cancelled.mark_cancelled("user request".to_string(), Utc::now());
        assert!(!cancelled.is_active());
        assert_eq!(
            cancelled.cancellation_reason.as_deref(),
            Some("user request")
        );
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TicketStatus::Reserved,
            TicketStatus::Booked,
            TicketStatus::Completed,
            TicketStatus::Cancelled,
        ] {
            assert_eq!(TicketStatus::parse(status.as_str()), Some(status));
        }
    }
}
