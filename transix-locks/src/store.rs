use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use transix_domain::{SeatLock, SeatLockStatus, StoreError};
use uuid::Uuid;

/// Persistence for durable seat lock rows.
///
/// Rows are append-only: release, expiry sweep and booking all flip the
/// status instead of deleting, so the table doubles as an audit trail.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomically claim a seat. Any expired Locked row for the seat is
    /// flipped to Available first (relative to `lock.locked_at`), then the
    /// row is inserted only if no live Locked row remains. Returns false
    /// when the seat is already claimed.
    async fn try_insert(&self, lock: SeatLock) -> Result<bool, StoreError>;

    async fn get(&self, lock_id: Uuid) -> Result<Option<SeatLock>, StoreError>;

    /// The live Locked row for a seat, if any
    async fn find_active(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<SeatLock>, StoreError>;

    /// The live Locked row a user holds anywhere on a schedule, if any
    async fn find_active_for_user(
        &self,
        schedule_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<SeatLock>, StoreError>;

    async fn active_for_schedule(
        &self,
        schedule_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatLock>, StoreError>;

    /// Test-and-set status flip. Returns false when the row is not in
    /// `expected` anymore.
    async fn set_status_if(
        &self,
        lock_id: Uuid,
        expected: SeatLockStatus,
        next: SeatLockStatus,
    ) -> Result<bool, StoreError>;

    /// Push the expiry of a still-Locked row forward
    async fn extend(&self, lock_id: Uuid, expires_at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Flip every Locked row whose expiry has passed back to Available.
    /// Returns how many rows were reclaimed. Safe to run from several
    /// replicas at once.
    async fn release_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Release every live hold owned by one browsing session
    async fn release_session(&self, user_id: Uuid, session_id: &str) -> Result<usize, StoreError>;
}

/// In-memory lock rows behind a single mutex, so the claim check and the
/// insert happen in one critical section.
pub struct MemoryLockStore {
    locks: Mutex<HashMap<Uuid, SeatLock>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_insert(&self, lock: SeatLock) -> Result<bool, StoreError> {
        let claim_time = lock.locked_at;
        let mut locks = self.locks.lock().unwrap();

        for row in locks.values_mut() {
            if row.schedule_id == lock.schedule_id
                && row.seat_number == lock.seat_number
                && row.status == SeatLockStatus::Locked
                && row.is_expired(claim_time)
            {
                row.status = SeatLockStatus::Available;
            }
        }

        let contested = locks.values().any(|row| {
            row.schedule_id == lock.schedule_id
                && row.seat_number == lock.seat_number
                && row.status == SeatLockStatus::Locked
        });
        if contested {
            return Ok(false);
        }

        locks.insert(lock.id, lock);
        Ok(true)
    }

    async fn get(&self, lock_id: Uuid) -> Result<Option<SeatLock>, StoreError> {
        Ok(self.locks.lock().unwrap().get(&lock_id).cloned())
    }

    async fn find_active(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<SeatLock>, StoreError> {
        let locks = self.locks.lock().unwrap();
        Ok(locks
            .values()
            .find(|row| {
                row.schedule_id == schedule_id
                    && row.seat_number == seat_number
                    && row.is_live(now)
            })
            .cloned())
    }

    async fn find_active_for_user(
        &self,
        schedule_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<SeatLock>, StoreError> {
        let locks = self.locks.lock().unwrap();
        Ok(locks
            .values()
            .find(|row| {
                row.schedule_id == schedule_id && row.user_id == user_id && row.is_live(now)
            })
            .cloned())
    }

    async fn active_for_schedule(
        &self,
        schedule_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatLock>, StoreError> {
        let locks = self.locks.lock().unwrap();
        let mut rows: Vec<SeatLock> = locks
            .values()
            .filter(|row| row.schedule_id == schedule_id && row.is_live(now))
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.seat_number);
        Ok(rows)
    }

    async fn set_status_if(
        &self,
        lock_id: Uuid,
        expected: SeatLockStatus,
        next: SeatLockStatus,
    ) -> Result<bool, StoreError> {
        let mut locks = self.locks.lock().unwrap();
        match locks.get_mut(&lock_id) {
            Some(row) if row.status == expected => {
                row.status = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend(&self, lock_id: Uuid, expires_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut locks = self.locks.lock().unwrap();
        match locks.get_mut(&lock_id) {
            Some(row) if row.status == SeatLockStatus::Locked => {
                row.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut locks = self.locks.lock().unwrap();
        let mut released = 0;
        for row in locks.values_mut() {
            if row.status == SeatLockStatus::Locked && row.expires_at < now {
                row.status = SeatLockStatus::Available;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn release_session(&self, user_id: Uuid, session_id: &str) -> Result<usize, StoreError> {
        let mut locks = self.locks.lock().unwrap();
        let mut released = 0;
        for row in locks.values_mut() {
            if row.user_id == user_id
                && row.session_id == session_id
                && row.status == SeatLockStatus::Locked
            {
                row.status = SeatLockStatus::Available;
                released += 1;
            }
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn live_lock(schedule_id: Uuid, seat_number: i32) -> SeatLock {
        SeatLock::new(
            schedule_id,
            seat_number,
            Uuid::new_v4(),
            "session".to_string(),
            Utc::now(),
            Duration::seconds(300),
        )
    }

    fn expired_lock(schedule_id: Uuid, seat_number: i32) -> SeatLock {
        SeatLock::new(
            schedule_id,
            seat_number,
            Uuid::new_v4(),
            "session".to_string(),
            Utc::now() - Duration::seconds(400),
            Duration::seconds(300),
        )
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryLockStore::new();
        let schedule_id = Uuid::new_v4();

        assert!(store.try_insert(live_lock(schedule_id, 5)).await.unwrap());
        assert!(!store.try_insert(live_lock(schedule_id, 5)).await.unwrap());

        // a different seat is unaffected
        assert!(store.try_insert(live_lock(schedule_id, 6)).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_row_does_not_block_claim() {
        let store = MemoryLockStore::new();
        let schedule_id = Uuid::new_v4();

        let stale = expired_lock(schedule_id, 5);
        let stale_id = stale.id;
        assert!(store.try_insert(stale).await.unwrap());

        assert!(store.try_insert(live_lock(schedule_id, 5)).await.unwrap());

        // the stale row was flipped, not deleted
        let row = store.get(stale_id).await.unwrap().unwrap();
        assert_eq!(row.status, SeatLockStatus::Available);
    }

    #[tokio::test]
    async fn test_find_active_skips_expired() {
        let store = MemoryLockStore::new();
        let schedule_id = Uuid::new_v4();
        store.try_insert(expired_lock(schedule_id, 9)).await.unwrap();

        let found = store.find_active(schedule_id, 9, Utc::now()).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_release_expired_is_idempotent() {
        let store = MemoryLockStore::new();
        let schedule_id = Uuid::new_v4();
        store.try_insert(expired_lock(schedule_id, 1)).await.unwrap();
        store.try_insert(expired_lock(schedule_id, 2)).await.unwrap();
        store.try_insert(live_lock(schedule_id, 3)).await.unwrap();

        let now = Utc::now();
        assert_eq!(store.release_expired(now).await.unwrap(), 2);
        assert_eq!(store.release_expired(now).await.unwrap(), 0);

        // the live row survived the sweep
        assert!(store.find_active(schedule_id, 3, now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_status_if_checks_current_state() {
        let store = MemoryLockStore::new();
        let lock = live_lock(Uuid::new_v4(), 4);
        let lock_id = lock.id;
        store.try_insert(lock).await.unwrap();

        assert!(store
            .set_status_if(lock_id, SeatLockStatus::Locked, SeatLockStatus::Booked)
            .await
            .unwrap());
        assert!(!store
            .set_status_if(lock_id, SeatLockStatus::Locked, SeatLockStatus::Available)
            .await
            .unwrap());

        let row = store.get(lock_id).await.unwrap().unwrap();
        assert_eq!(row.status, SeatLockStatus::Booked);
    }

    #[tokio::test]
    async fn test_release_session_only_touches_that_session() {
        let store = MemoryLockStore::new();
        let schedule_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let mut first = live_lock(schedule_id, 1);
        first.user_id = user_id;
        first.session_id = "tab-a".to_string();
        let mut second = live_lock(schedule_id, 2);
        second.user_id = user_id;
        second.session_id = "tab-b".to_string();

        store.try_insert(first).await.unwrap();
        store.try_insert(second).await.unwrap();

        assert_eq!(store.release_session(user_id, "tab-a").await.unwrap(), 1);

        let now = Utc::now();
        assert!(store.find_active(schedule_id, 1, now).await.unwrap().is_none());
        assert!(store.find_active(schedule_id, 2, now).await.unwrap().is_some());
    }
}
