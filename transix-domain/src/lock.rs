use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a durable seat lock row. Rows are never deleted;
/// release and expiry sweep both flip the row back to Available.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatLockStatus {
    Locked,
    Available,
    Booked,
}

impl SeatLockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatLockStatus::Locked => "LOCKED",
            SeatLockStatus::Available => "AVAILABLE",
            SeatLockStatus::Booked => "BOOKED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "LOCKED" => Some(SeatLockStatus::Locked),
            "AVAILABLE" => Some(SeatLockStatus::Available),
            "BOOKED" => Some(SeatLockStatus::Booked),
            _ => None,
        }
    }
}

/// A time-boxed exclusive hold on one seat of one schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatLock {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub seat_number: i32,
    pub user_id: Uuid,
    pub session_id: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SeatLockStatus,
}

impl SeatLock {
    pub fn new(
        schedule_id: Uuid,
        seat_number: i32,
        user_id: Uuid,
        session_id: String,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            schedule_id,
            seat_number,
            user_id,
            session_id,
            locked_at: now,
            expires_at: now + ttl,
            status: SeatLockStatus::Locked,
        }
    }

    /// An expired row no longer blocks anyone, even before the sweeper flips it
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == SeatLockStatus::Locked && self.expires_at > now
    }
}

/// What a caller gets back after acquiring a seat hold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatHold {
    pub lock_id: Uuid,
    pub schedule_id: Uuid,
    pub seat_number: i32,
    pub expires_at: DateTime<Utc>,
    pub duration_seconds: i64,
}

impl SeatHold {
    pub fn from_lock(lock: &SeatLock) -> Self {
        Self {
            lock_id: lock.id,
            schedule_id: lock.schedule_id,
            seat_number: lock.seat_number,
            expires_at: lock.expires_at,
            duration_seconds: (lock.expires_at - lock.locked_at).num_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_lock(ttl_seconds: i64) -> SeatLock {
        SeatLock::new(
            Uuid::new_v4(),
            12,
            Uuid::new_v4(),
            "session-1".to_string(),
            Utc::now(),
            Duration::seconds(ttl_seconds),
        )
    }

    #[test]
    fn test_live_until_expiry() {
        let now = Utc::now();
        let lock = sample_lock(300);
        assert!(lock.is_live(now));
        assert!(!lock.is_expired(now));

        let later = now + Duration::seconds(301);
        assert!(!lock.is_live(later));
        assert!(lock.is_expired(later));
    }

    #[test]
    fn test_released_row_is_not_live() {
        let mut lock = sample_lock(300);
        lock.status = SeatLockStatus::Available;
        assert!(!lock.is_live(Utc::now()));
    }

    #[test]
    fn test_hold_projection() {
        let lock = sample_lock(300);
        let hold = SeatHold::from_lock(&lock);
        assert_eq!(hold.lock_id, lock.id);
        assert_eq!(hold.seat_number, 12);
        assert_eq!(hold.duration_seconds, 300);
    }
}
