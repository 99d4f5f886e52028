use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use transix_domain::{SeatHold, SeatLock, SeatLockStatus, StoreError};
use transix_inventory::{InventoryError, SeatInventory};
use uuid::Uuid;

use crate::store::LockStore;

/// Read-only view of ticketed seats, supplied by the reservation store.
/// A seat with an active ticket can never be locked.
#[async_trait]
pub trait TicketView: Send + Sync {
    async fn seat_is_ticketed(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone)]
pub struct LockConfig {
    pub hold_ttl: Duration,
}

impl LockConfig {
    pub fn new(hold_ttl_seconds: i64) -> Self {
        Self {
            hold_ttl: Duration::seconds(hold_ttl_seconds),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::new(300)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Schedule not found: {0}")]
    UnknownSchedule(Uuid),

    #[error("No seats available on schedule {0}")]
    SoldOut(Uuid),

    #[error("Seat {seat_number} on schedule {schedule_id} is already booked")]
    SeatTaken {
        schedule_id: Uuid,
        seat_number: i32,
    },

    #[error("Seat {seat_number} is held by another user until {expires_at}")]
    HeldByAnother {
        seat_number: i32,
        expires_at: DateTime<Utc>,
    },

    #[error("Lock not found: {0}")]
    NotFound(Uuid),

    #[error("Lock {lock_id} expired at {expired_at}")]
    Expired {
        lock_id: Uuid,
        expired_at: DateTime<Utc>,
    },

    #[error("Lock {0} is no longer held")]
    NotHeld(Uuid),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<InventoryError> for LockError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::UnknownSchedule(id) => LockError::UnknownSchedule(id),
            InventoryError::SoldOut { schedule_id, .. } => LockError::SoldOut(schedule_id),
            InventoryError::Storage(e) => LockError::Storage(e),
        }
    }
}

/// Seat-level locking surface shared by the durable and fast-path backends.
/// Holders are identified by user id; entries expire on their own after
/// `ttl` unless refreshed or consumed.
#[async_trait]
pub trait SeatLockManager: Send + Sync {
    /// All-or-nothing batch hold. On the first refused entry every entry
    /// acquired so far is given back and the call returns false.
    async fn try_lock_seats(
        &self,
        schedule_id: Uuid,
        seat_numbers: &[i32],
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<bool, LockError>;

    /// Release the caller's entries. Entries held by someone else are left
    /// untouched and reported by returning false.
    async fn unlock_seats(
        &self,
        schedule_id: Uuid,
        seat_numbers: &[i32],
        user_id: Uuid,
    ) -> Result<bool, LockError>;

    /// Re-arm the TTL on entries the caller still holds
    async fn refresh_locks(
        &self,
        schedule_id: Uuid,
        seat_numbers: &[i32],
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<bool, LockError>;

    async fn is_locked_by_user(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
        user_id: Uuid,
    ) -> Result<bool, LockError>;

    async fn active_holder(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
    ) -> Result<Option<Uuid>, LockError>;

    /// Consume the caller's hold once its seat has been committed to a
    /// ticket. Returns false when no such hold exists.
    async fn consume(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
        user_id: Uuid,
    ) -> Result<bool, LockError>;

    /// Seats currently under a live hold, for seat map rendering
    async fn locked_seats(&self, schedule_id: Uuid) -> Result<Vec<i32>, LockError>;
}

/// Seat lock manager backed by lock rows in the reservation database.
///
/// Single-seat holds carry extra policy the fast path does not: a user may
/// hold at most one seat per schedule, and a seat with an active ticket is
/// refused outright.
#[derive(Clone)]
pub struct DurableSeatLocks {
    store: Arc<dyn LockStore>,
    tickets: Arc<dyn TicketView>,
    inventory: Arc<dyn SeatInventory>,
    config: LockConfig,
}

impl DurableSeatLocks {
    pub fn new(
        store: Arc<dyn LockStore>,
        tickets: Arc<dyn TicketView>,
        inventory: Arc<dyn SeatInventory>,
        config: LockConfig,
    ) -> Self {
        Self {
            store,
            tickets,
            inventory,
            config,
        }
    }

    /// Place a time-boxed hold on one seat for one user session.
    ///
    /// Taking a new hold on the same schedule releases the user's previous
    /// hold, so switching seats during seat selection never strands a lock.
    pub async fn lock_seat(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
        user_id: Uuid,
        session_id: &str,
    ) -> Result<SeatHold, LockError> {
        let now = Utc::now();

        let available = self.inventory.available(schedule_id).await?;
        if available <= 0 {
            return Err(LockError::SoldOut(schedule_id));
        }

        if self.tickets.seat_is_ticketed(schedule_id, seat_number).await? {
            return Err(LockError::SeatTaken {
                schedule_id,
                seat_number,
            });
        }

        if let Some(existing) = self.store.find_active(schedule_id, seat_number, now).await? {
            if existing.user_id != user_id {
                return Err(LockError::HeldByAnother {
                    seat_number,
                    expires_at: existing.expires_at,
                });
            }
        }

        // One live hold per user per schedule: a new hold drops the old one
        if let Some(prior) = self
            .store
            .find_active_for_user(schedule_id, user_id, now)
            .await?
        {
            self.store
                .set_status_if(prior.id, SeatLockStatus::Locked, SeatLockStatus::Available)
                .await?;
            debug!(
                lock_id = %prior.id,
                seat = prior.seat_number,
                "released prior hold for user"
            );
        }

        for _ in 0..2 {
            let lock = SeatLock::new(
                schedule_id,
                seat_number,
                user_id,
                session_id.to_string(),
                now,
                self.config.hold_ttl,
            );
            if self.store.try_insert(lock.clone()).await? {
                info!(
                    lock_id = %lock.id,
                    schedule_id = %schedule_id,
                    seat = seat_number,
                    "seat hold acquired"
                );
                return Ok(SeatHold::from_lock(&lock));
            }

            match self.store.find_active(schedule_id, seat_number, now).await? {
                // Lost the claim race to our own other request
                Some(winner) if winner.user_id == user_id => {
                    return Ok(SeatHold::from_lock(&winner));
                }
                Some(winner) => {
                    return Err(LockError::HeldByAnother {
                        seat_number,
                        expires_at: winner.expires_at,
                    });
                }
                // Winner released between the claim and the lookup, try again
                None => continue,
            }
        }

        Err(LockError::HeldByAnother {
            seat_number,
            expires_at: now,
        })
    }

    /// Release a hold by id. Releasing an already-released or consumed row
    /// is a no-op that still reports success.
    pub async fn release_lock(&self, lock_id: Uuid) -> Result<bool, LockError> {
        let lock = self
            .store
            .get(lock_id)
            .await?
            .ok_or(LockError::NotFound(lock_id))?;

        if lock.status == SeatLockStatus::Locked {
            self.store
                .set_status_if(lock_id, SeatLockStatus::Locked, SeatLockStatus::Available)
                .await?;
            debug!(lock_id = %lock_id, "seat hold released");
        }
        Ok(true)
    }

    /// Push a live hold's expiry out by the configured TTL
    pub async fn extend_hold(&self, lock_id: Uuid) -> Result<SeatHold, LockError> {
        let now = Utc::now();
        let lock = self
            .store
            .get(lock_id)
            .await?
            .ok_or(LockError::NotFound(lock_id))?;

        if lock.status != SeatLockStatus::Locked {
            return Err(LockError::NotHeld(lock_id));
        }
        if lock.is_expired(now) {
            return Err(LockError::Expired {
                lock_id,
                expired_at: lock.expires_at,
            });
        }

        let expires_at = now + self.config.hold_ttl;
        if !self.store.extend(lock_id, expires_at).await? {
            return Err(LockError::NotHeld(lock_id));
        }

        Ok(SeatHold {
            lock_id,
            schedule_id: lock.schedule_id,
            seat_number: lock.seat_number,
            expires_at,
            duration_seconds: self.config.hold_ttl.num_seconds(),
        })
    }

    /// Release every live hold a browsing session still has, typically on
    /// logout or session end. Returns how many holds were released.
    pub async fn release_user_locks(
        &self,
        user_id: Uuid,
        session_id: &str,
    ) -> Result<usize, LockError> {
        let released = self.store.release_session(user_id, session_id).await?;
        if released > 0 {
            info!(
                user_id = %user_id,
                session_id = session_id,
                released = released,
                "released session holds"
            );
        }
        Ok(released)
    }
}

#[async_trait]
impl SeatLockManager for DurableSeatLocks {
    async fn try_lock_seats(
        &self,
        schedule_id: Uuid,
        seat_numbers: &[i32],
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let now = Utc::now();
        let mut acquired: Vec<Uuid> = Vec::new();

        for &seat_number in seat_numbers {
            let lock = SeatLock::new(
                schedule_id,
                seat_number,
                user_id,
                String::new(),
                now,
                ttl,
            );
            let lock_id = lock.id;

            if self.store.try_insert(lock).await? {
                acquired.push(lock_id);
                continue;
            }

            match self.store.find_active(schedule_id, seat_number, now).await? {
                // Already ours: re-arm and fold into the batch
                Some(row) if row.user_id == user_id => {
                    self.store.extend(row.id, now + ttl).await?;
                    acquired.push(row.id);
                }
                _ => {
                    for id in &acquired {
                        self.store
                            .set_status_if(*id, SeatLockStatus::Locked, SeatLockStatus::Available)
                            .await?;
                    }
                    debug!(
                        schedule_id = %schedule_id,
                        seat = seat_number,
                        "batch hold refused, rolled back"
                    );
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    async fn unlock_seats(
        &self,
        schedule_id: Uuid,
        seat_numbers: &[i32],
        user_id: Uuid,
    ) -> Result<bool, LockError> {
        let now = Utc::now();
        let mut all_released = true;

        for &seat_number in seat_numbers {
            match self.store.find_active(schedule_id, seat_number, now).await? {
                Some(row) if row.user_id == user_id => {
                    let flipped = self
                        .store
                        .set_status_if(row.id, SeatLockStatus::Locked, SeatLockStatus::Available)
                        .await?;
                    all_released = all_released && flipped;
                }
                Some(_) => {
                    // someone else's hold stays put
                    all_released = false;
                }
                None => {}
            }
        }

        Ok(all_released)
    }

    async fn refresh_locks(
        &self,
        schedule_id: Uuid,
        seat_numbers: &[i32],
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let now = Utc::now();
        let mut all_refreshed = true;

        for &seat_number in seat_numbers {
            match self.store.find_active(schedule_id, seat_number, now).await? {
                Some(row) if row.user_id == user_id => {
                    let extended = self.store.extend(row.id, now + ttl).await?;
                    all_refreshed = all_refreshed && extended;
                }
                _ => all_refreshed = false,
            }
        }

        Ok(all_refreshed)
    }

    async fn is_locked_by_user(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
        user_id: Uuid,
    ) -> Result<bool, LockError> {
        let row = self
            .store
            .find_active(schedule_id, seat_number, Utc::now())
            .await?;
        Ok(row.map(|r| r.user_id == user_id).unwrap_or(false))
    }

    async fn active_holder(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
    ) -> Result<Option<Uuid>, LockError> {
        let row = self
            .store
            .find_active(schedule_id, seat_number, Utc::now())
            .await?;
        Ok(row.map(|r| r.user_id))
    }

    async fn consume(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
        user_id: Uuid,
    ) -> Result<bool, LockError> {
        let now = Utc::now();
        match self.store.find_active(schedule_id, seat_number, now).await? {
            Some(row) if row.user_id == user_id => {
                let flipped = self
                    .store
                    .set_status_if(row.id, SeatLockStatus::Locked, SeatLockStatus::Booked)
                    .await?;
                Ok(flipped)
            }
            _ => Ok(false),
        }
    }

    async fn locked_seats(&self, schedule_id: Uuid) -> Result<Vec<i32>, LockError> {
        let rows = self
            .store
            .active_for_schedule(schedule_id, Utc::now())
            .await?;
        Ok(rows.into_iter().map(|row| row.seat_number).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLockStore;
    use transix_inventory::MemoryInventory;

    struct NoTickets;

    #[async_trait]
    impl TicketView for NoTickets {
        async fn seat_is_ticketed(&self, _: Uuid, _: i32) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    struct TicketedSeats(Vec<i32>);

    #[async_trait]
    impl TicketView for TicketedSeats {
        async fn seat_is_ticketed(&self, _: Uuid, seat: i32) -> Result<bool, StoreError> {
            Ok(self.0.contains(&seat))
        }
    }

    fn manager(
        capacity: i32,
        tickets: Arc<dyn TicketView>,
    ) -> (DurableSeatLocks, Arc<MemoryLockStore>, Uuid) {
        let store = Arc::new(MemoryLockStore::new());
        let inventory = Arc::new(MemoryInventory::new());
        let schedule_id = Uuid::new_v4();
        inventory.register(schedule_id, capacity);

        let locks = DurableSeatLocks::new(
            Arc::clone(&store) as Arc<dyn LockStore>,
            tickets,
            inventory,
            LockConfig::default(),
        );
        (locks, store, schedule_id)
    }

    #[tokio::test]
    async fn test_lock_seat_grants_hold() {
        let (locks, _, schedule_id) = manager(40, Arc::new(NoTickets));
        let user_id = Uuid::new_v4();

        let hold = locks
            .lock_seat(schedule_id, 12, user_id, "session-1")
            .await
            .unwrap();

        assert_eq!(hold.schedule_id, schedule_id);
        assert_eq!(hold.seat_number, 12);
        assert_eq!(hold.duration_seconds, 300);
        assert!(hold.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_lock_seat_refuses_other_users_seat() {
        let (locks, _, schedule_id) = manager(40, Arc::new(NoTickets));
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        locks
            .lock_seat(schedule_id, 12, first, "session-1")
            .await
            .unwrap();
        let err = locks
            .lock_seat(schedule_id, 12, second, "session-2")
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::HeldByAnother { seat_number: 12, .. }));
    }

    #[tokio::test]
    async fn test_switching_seats_releases_prior_hold() {
        let (locks, store, schedule_id) = manager(40, Arc::new(NoTickets));
        let user_id = Uuid::new_v4();

        let first = locks
            .lock_seat(schedule_id, 1, user_id, "session-1")
            .await
            .unwrap();
        locks
            .lock_seat(schedule_id, 2, user_id, "session-1")
            .await
            .unwrap();

        let now = Utc::now();
        assert!(store.find_active(schedule_id, 1, now).await.unwrap().is_none());
        assert!(store.find_active(schedule_id, 2, now).await.unwrap().is_some());

        let old_row = store.get(first.lock_id).await.unwrap().unwrap();
        assert_eq!(old_row.status, SeatLockStatus::Available);
    }

    #[tokio::test]
    async fn test_lock_seat_refuses_ticketed_seat() {
        let (locks, _, schedule_id) = manager(40, Arc::new(TicketedSeats(vec![7])));
        let err = locks
            .lock_seat(schedule_id, 7, Uuid::new_v4(), "session-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::SeatTaken { seat_number: 7, .. }));
    }

    #[tokio::test]
    async fn test_lock_seat_refuses_sold_out_schedule() {
        let (locks, _, schedule_id) = manager(0, Arc::new(NoTickets));
        let err = locks
            .lock_seat(schedule_id, 1, Uuid::new_v4(), "session-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::SoldOut(id) if id == schedule_id));
    }

    #[tokio::test]
    async fn test_expired_hold_no_longer_blocks() {
        let (locks, store, schedule_id) = manager(40, Arc::new(NoTickets));
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let hold = locks
            .lock_seat(schedule_id, 5, first, "session-1")
            .await
            .unwrap();

        // manually expire the first hold
        store
            .extend(hold.lock_id, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();

        let taken = locks
            .lock_seat(schedule_id, 5, second, "session-2")
            .await
            .unwrap();
        assert_eq!(taken.seat_number, 5);

        let stale = store.get(hold.lock_id).await.unwrap().unwrap();
        assert_eq!(stale.status, SeatLockStatus::Available);
    }

    #[tokio::test]
    async fn test_release_lock_is_idempotent() {
        let (locks, _, schedule_id) = manager(40, Arc::new(NoTickets));
        let hold = locks
            .lock_seat(schedule_id, 3, Uuid::new_v4(), "session-1")
            .await
            .unwrap();

        assert!(locks.release_lock(hold.lock_id).await.unwrap());
        assert!(locks.release_lock(hold.lock_id).await.unwrap());

        let err = locks.release_lock(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LockError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_extend_hold_pushes_expiry() {
        let (locks, store, schedule_id) = manager(40, Arc::new(NoTickets));
        let hold = locks
            .lock_seat(schedule_id, 3, Uuid::new_v4(), "session-1")
            .await
            .unwrap();

        let refreshed = locks.extend_hold(hold.lock_id).await.unwrap();
        assert!(refreshed.expires_at >= hold.expires_at);

        // expired holds cannot be extended
        store
            .extend(hold.lock_id, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        let err = locks.extend_hold(hold.lock_id).await.unwrap_err();
        assert!(matches!(err, LockError::Expired { .. }));
    }

    #[tokio::test]
    async fn test_extend_released_hold_fails() {
        let (locks, _, schedule_id) = manager(40, Arc::new(NoTickets));
        let hold = locks
            .lock_seat(schedule_id, 3, Uuid::new_v4(), "session-1")
            .await
            .unwrap();
        locks.release_lock(hold.lock_id).await.unwrap();

        let err = locks.extend_hold(hold.lock_id).await.unwrap_err();
        assert!(matches!(err, LockError::NotHeld(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lock_requests_single_winner() {
        let (locks, _, schedule_id) = manager(40, Arc::new(NoTickets));

        let mut handles = Vec::new();
        for i in 0..8 {
            let locks = locks.clone();
            handles.push(tokio::spawn(async move {
                locks
                    .lock_seat(schedule_id, 17, Uuid::new_v4(), &format!("session-{i}"))
                    .await
            }));
        }

        let mut granted = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(LockError::HeldByAnother { .. }) => refused += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(granted, 1);
        assert_eq!(refused, 7);
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let (locks, store, schedule_id) = manager(40, Arc::new(NoTickets));
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();

        locks
            .lock_seat(schedule_id, 3, user_b, "session-b")
            .await
            .unwrap();

        let ok = locks
            .try_lock_seats(schedule_id, &[2, 3], user_a, Duration::seconds(300))
            .await
            .unwrap();
        assert!(!ok);

        // seat 2 was rolled back, seat 3 still belongs to the other user
        let now = Utc::now();
        assert!(store.find_active(schedule_id, 2, now).await.unwrap().is_none());
        let row = store.find_active(schedule_id, 3, now).await.unwrap().unwrap();
        assert_eq!(row.user_id, user_b);
    }

    #[tokio::test]
    async fn test_batch_re_arms_own_holds() {
        let (locks, store, schedule_id) = manager(40, Arc::new(NoTickets));
        let user_id = Uuid::new_v4();

        locks
            .lock_seat(schedule_id, 5, user_id, "session-1")
            .await
            .unwrap();

        let ok = locks
            .try_lock_seats(schedule_id, &[5, 6], user_id, Duration::seconds(300))
            .await
            .unwrap();
        assert!(ok);

        let now = Utc::now();
        assert!(store.find_active(schedule_id, 5, now).await.unwrap().is_some());
        assert!(store.find_active(schedule_id, 6, now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unlock_seats_owner_only() {
        let (locks, store, schedule_id) = manager(40, Arc::new(NoTickets));
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();

        locks
            .lock_seat(schedule_id, 9, owner, "session-1")
            .await
            .unwrap();

        assert!(!locks.unlock_seats(schedule_id, &[9], other).await.unwrap());
        assert!(store
            .find_active(schedule_id, 9, Utc::now())
            .await
            .unwrap()
            .is_some());

        assert!(locks.unlock_seats(schedule_id, &[9], owner).await.unwrap());
        assert!(store
            .find_active(schedule_id, 9, Utc::now())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_consume_marks_row_booked() {
        let (locks, store, schedule_id) = manager(40, Arc::new(NoTickets));
        let user_id = Uuid::new_v4();

        let hold = locks
            .lock_seat(schedule_id, 11, user_id, "session-1")
            .await
            .unwrap();

        assert!(locks.consume(schedule_id, 11, user_id).await.unwrap());
        let row = store.get(hold.lock_id).await.unwrap().unwrap();
        assert_eq!(row.status, SeatLockStatus::Booked);

        // nothing live left to consume
        assert!(!locks.consume(schedule_id, 11, user_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_locked_seats_lists_live_holds() {
        let (locks, _, schedule_id) = manager(40, Arc::new(NoTickets));
        locks
            .lock_seat(schedule_id, 4, Uuid::new_v4(), "s1")
            .await
            .unwrap();
        locks
            .lock_seat(schedule_id, 8, Uuid::new_v4(), "s2")
            .await
            .unwrap();

        let seats = locks.locked_seats(schedule_id).await.unwrap();
        assert_eq!(seats, vec![4, 8]);
    }
}
