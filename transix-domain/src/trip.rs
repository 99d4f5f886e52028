use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operational status of a scheduled trip
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Delayed,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Scheduled => "SCHEDULED",
            TripStatus::InProgress => "IN_PROGRESS",
            TripStatus::Completed => "COMPLETED",
            TripStatus::Cancelled => "CANCELLED",
            TripStatus::Delayed => "DELAYED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SCHEDULED" => Some(TripStatus::Scheduled),
            "IN_PROGRESS" => Some(TripStatus::InProgress),
            "COMPLETED" => Some(TripStatus::Completed),
            "CANCELLED" => Some(TripStatus::Cancelled),
            "DELAYED" => Some(TripStatus::Delayed),
            _ => None,
        }
    }
}

/// A scheduled departure with a fixed seat capacity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub departure_at: DateTime<Utc>,
    pub status: TripStatus,
    pub capacity: i32,
    pub price_amount: i32,
    pub price_currency: String,
}

impl Trip {
    pub fn new(departure_at: DateTime<Utc>, capacity: i32, price_amount: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            departure_at,
            status: TripStatus::Scheduled,
            capacity,
            price_amount,
            price_currency: "USD".to_string(),
        }
    }

    /// Seat numbers run 1..=capacity
    pub fn seat_in_range(&self, seat_number: i32) -> bool {
        seat_number >= 1 && seat_number <= self.capacity
    }

    pub fn has_departed(&self, now: DateTime<Utc>) -> bool {
        self.departure_at < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_seat_range() {
        let trip = Trip::new(Utc::now() + Duration::hours(2), 40, 1500);
        assert!(trip.seat_in_range(1));
        assert!(trip.seat_in_range(40));
        assert!(!trip.seat_in_range(0));
        assert!(!trip.seat_in_range(41));
    }

    #[test]
    fn test_departure_check() {
        let now = Utc::now();
        let past = Trip::new(now - Duration::minutes(5), 10, 1000);
        let future = Trip::new(now + Duration::minutes(5), 10, 1000);
        assert!(past.has_departed(now));
        assert!(!future.has_departed(now));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TripStatus::Scheduled,
            TripStatus::InProgress,
            TripStatus::Completed,
            TripStatus::Cancelled,
            TripStatus::Delayed,
        ] {
            assert_eq!(TripStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TripStatus::parse("BOGUS"), None);
    }
}
