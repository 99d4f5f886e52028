use async_trait::async_trait;
use chrono::Duration;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::debug;
use transix_domain::StoreError;
use transix_locks::{LockError, SeatLockManager};
use uuid::Uuid;

fn redis_err(err: redis::RedisError) -> LockError {
    LockError::Storage(StoreError::new(err))
}

/// Fast-path seat locks as Redis string entries.
///
/// One key per seat, value is the holder's user id, expiry handled by the
/// broker itself via EX. No janitor and no audit trail on this backend;
/// an entry simply vanishes when its TTL runs out.
#[derive(Clone)]
pub struct RedisSeatLocks {
    client: redis::Client,
}

impl RedisSeatLocks {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    fn seat_key(schedule_id: Uuid, seat_number: i32) -> String {
        format!("seat_lock:{}:{}", schedule_id, seat_number)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, LockError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_err)
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.num_seconds().max(1) as u64
}

#[async_trait]
impl SeatLockManager for RedisSeatLocks {
    async fn try_lock_seats(
        &self,
        schedule_id: Uuid,
        seat_numbers: &[i32],
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let holder = user_id.to_string();
        let expiry = ttl_seconds(ttl);
        let mut acquired: Vec<String> = Vec::new();

        for &seat_number in seat_numbers {
            let key = Self::seat_key(schedule_id, seat_number);

            // SET NX: only set if the key does not exist
            let set: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&holder)
                .arg("NX")
                .arg("EX")
                .arg(expiry)
                .query_async(&mut conn)
                .await
                .map_err(redis_err)?;

            if set.is_some() {
                acquired.push(key);
                continue;
            }

            let existing: Option<String> = conn.get(&key).await.map_err(redis_err)?;
            match existing {
                // already ours, re-arm the TTL and fold into the batch
                Some(value) if value == holder => {
                    conn.set_ex::<_, _, ()>(&key, &holder, expiry)
                        .await
                        .map_err(redis_err)?;
                    acquired.push(key);
                }
                _ => {
                    for key in &acquired {
                        let _: () = conn.del(key).await.map_err(redis_err)?;
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
        let mut conn = self.connection().await?;
        let holder = user_id.to_string();
        let mut all_released = true;

        for &seat_number in seat_numbers {
            let key = Self::seat_key(schedule_id, seat_number);
            let existing: Option<String> = conn.get(&key).await.map_err(redis_err)?;
            match existing {
                Some(value) if value == holder => {
                    let deleted: i64 = conn.del(&key).await.map_err(redis_err)?;
                    all_released = all_released && deleted > 0;
                }
                Some(_) => {
                    // someone else's entry stays put
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
        let mut conn = self.connection().await?;
        let holder = user_id.to_string();
        let expiry = ttl_seconds(ttl);
        let mut all_refreshed = true;

        for &seat_number in seat_numbers {
            let key = Self::seat_key(schedule_id, seat_number);
            let existing: Option<String> = conn.get(&key).await.map_err(redis_err)?;
            match existing {
                Some(value) if value == holder => {
                    let refreshed: bool = conn
                        .expire(&key, expiry as i64)
                        .await
                        .map_err(redis_err)?;
                    all_refreshed = all_refreshed && refreshed;
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
        let mut conn = self.connection().await?;
        let key = Self::seat_key(schedule_id, seat_number);
        let existing: Option<String> = conn.get(&key).await.map_err(redis_err)?;
        Ok(existing.as_deref() == Some(user_id.to_string().as_str()))
    }

    async fn active_holder(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
    ) -> Result<Option<Uuid>, LockError> {
        let mut conn = self.connection().await?;
        let key = Self::seat_key(schedule_id, seat_number);
        let existing: Option<String> = conn.get(&key).await.map_err(redis_err)?;
        Ok(existing.and_then(|value| Uuid::parse_str(&value).ok()))
    }

    async fn consume(
        &self,
        schedule_id: Uuid,
        seat_number: i32,
        user_id: Uuid,
    ) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let key = Self::seat_key(schedule_id, seat_number);
        let existing: Option<String> = conn.get(&key).await.map_err(redis_err)?;
        match existing {
            Some(value) if value == user_id.to_string() => {
                let deleted: i64 = conn.del(&key).await.map_err(redis_err)?;
                Ok(deleted > 0)
            }
            _ => Ok(false),
        }
    }

    async fn locked_seats(&self, schedule_id: Uuid) -> Result<Vec<i32>, LockError> {
        let mut conn = self.connection().await?;
        let pattern = format!("seat_lock:{}:*", schedule_id);
        let keys: Vec<String> = conn.keys(pattern).await.map_err(redis_err)?;

        let mut seats: Vec<i32> = keys
            .iter()
            .filter_map(|key| key.rsplit(':').next().and_then(|s| s.parse().ok()))
            .collect();
        seats.sort_unstable();
        Ok(seats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_key_format() {
        let schedule_id = Uuid::nil();
        assert_eq!(
            RedisSeatLocks::seat_key(schedule_id, 14),
            format!("seat_lock:{}:14", schedule_id)
        );
    }

    #[test]
    fn test_ttl_floor() {
        assert_eq!(ttl_seconds(Duration::seconds(300)), 300);
        assert_eq!(ttl_seconds(Duration::seconds(0)), 1);
        assert_eq!(ttl_seconds(Duration::seconds(-5)), 1);
    }
}
