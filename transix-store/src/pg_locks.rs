use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use transix_domain::{SeatLock, SeatLockStatus, StoreError};
use transix_locks::LockStore;
use uuid::Uuid;

fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::new(err)
}

#[derive(sqlx::FromRow)]
struct LockRow {
    id: Uuid,
    schedule_id: Uuid,
    seat_number: i32,
    user_id: Uuid,
    session_id: String,
    locked_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    status: String,
}

impl LockRow {
    fn into_lock(self) -> Result<SeatLock, StoreError> {
        let status = SeatLockStatus::parse(&self.status)
            .ok_or_else(|| StoreError::new(format!("unknown lock status '{}'", self.status)))?;
        Ok(SeatLock {
            id: self.id,
            schedule_id: self.schedule_id,
            seat_number: self.seat_number,
            user_id: self.user_id,
            session_id: self.session_id,
            locked_at: self.locked_at,
            expires_at: self.expires_at,
            status,
        })
    }
}

const LOCK_COLUMNS: &str =
    "id, schedule_id, seat_number, user_id, session_id, locked_at, expires_at, status";

/// Lock rows in Postgres. The claim in `try_insert` is guarded twice:
/// a conditional INSERT inside the transaction, and the partial unique
/// index on live Locked rows as the backstop under concurrency.
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn try_insert(&self, lock: SeatLock) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // stale rows would trip the unique index even though they no
        // longer block anyone, so flip them first
        sqlx::query(
            "UPDATE seat_locks SET status = 'AVAILABLE' \
             WHERE schedule_id = $1 AND seat_number = $2 AND status = 'LOCKED' \
             AND expires_at < $3",
        )
        .bind(lock.schedule_id)
        .bind(lock.seat_number)
        .bind(lock.locked_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let inserted = sqlx::query(
            "INSERT INTO seat_locks (id, schedule_id, seat_number, user_id, session_id, \
             locked_at, expires_at, status) \
             SELECT $1, $2, $3, $4, $5, $6, $7, $8 \
             WHERE NOT EXISTS (SELECT 1 FROM seat_locks \
             WHERE schedule_id = $2 AND seat_number = $3 AND status = 'LOCKED')",
        )
        .bind(lock.id)
        .bind(lock.schedule_id)
        .bind(lock.seat_number)
        .bind(lock.user_id)
        .bind(&lock.session_id)
        .bind(lock.locked_at)
        .bind(lock.expires_at)
        .bind(lock.status.as_str())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(result) => {
                tx.commit().await.map_err(db_err)?;
                Ok(result.rows_affected() == 1)
            }
            Err(err) => {
                if let sqlx::Error::Database(db) = &err {
                    if db.constraint() == Some("ux_seat_locks_active") {
                        return Ok(false);
                    }
                }
                Err(db_err(err))
            }
        }
    }

    async fn get(&self, lock_id: Uuid) -> Result<Option<SeatLock>, StoreError> {
        let sql = format!("SELECT {LOCK_COLUMNS} FROM seat_locks WHERE id = $1");
        let row = sqlx::query_as::<_, LockRow>(&sql)
            .bind(lock_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(LockRow::into_lock).transpose()
    }

    async fn find_active(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<SeatLock>, StoreError> {
        let sql = format!(
            "SELECT {LOCK_COLUMNS} FROM seat_locks \
             WHERE schedule_id = $1 AND seat_number = $2 AND status = 'LOCKED' \
             AND expires_at > $3 LIMIT 1"
        );
        let row = sqlx::query_as::<_, LockRow>(&sql)
            .bind(schedule_id)
            .bind(seat_number)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(LockRow::into_lock).transpose()
    }

    async fn find_active_for_user(
        &self,
        schedule_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<SeatLock>, StoreError> {
        let sql = format!(
            "SELECT {LOCK_COLUMNS} FROM seat_locks \
             WHERE schedule_id = $1 AND user_id = $2 AND status = 'LOCKED' \
             AND expires_at > $3 LIMIT 1"
        );
        let row = sqlx::query_as::<_, LockRow>(&sql)
            .bind(schedule_id)
            .bind(user_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(LockRow::into_lock).transpose()
    }

    async fn active_for_schedule(
        &self,
        schedule_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatLock>, StoreError> {
        let sql = format!(
            "SELECT {LOCK_COLUMNS} FROM seat_locks \
             WHERE schedule_id = $1 AND status = 'LOCKED' AND expires_at > $2 \
             ORDER BY seat_number"
        );
        let rows = sqlx::query_as::<_, LockRow>(&sql)
            .bind(schedule_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(LockRow::into_lock).collect()
    }

    async fn set_status_if(
        &self,
        lock_id: Uuid,
        expected: SeatLockStatus,
        next: SeatLockStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE seat_locks SET status = $3 WHERE id = $1 AND status = $2")
            .bind(lock_id)
            .bind(expected.as_str())
            .bind(next.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn extend(&self, lock_id: Uuid, expires_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE seat_locks SET expires_at = $2 WHERE id = $1 AND status = 'LOCKED'",
        )
        .bind(lock_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let result = sqlx::query(
            "UPDATE seat_locks SET status = 'AVAILABLE' \
             WHERE status = 'LOCKED' AND expires_at < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() as usize)
    }

    async fn release_session(&self, user_id: Uuid, session_id: &str) -> Result<usize, StoreError> {
        let result = sqlx::query(
            "UPDATE seat_locks SET status = 'AVAILABLE' \
             WHERE user_id = $1 AND session_id = $2 AND status = 'LOCKED'",
        )
        .bind(user_id)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() as usize)
    }
}
