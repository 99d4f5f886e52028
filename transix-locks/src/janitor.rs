use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};
use transix_domain::StoreError;

use crate::store::LockStore;

/// Background sweeper that flips expired Locked rows back to Available.
///
/// Expired rows are already invisible to readers, so the sweep only tidies
/// the table. Several replicas may run it at once; the store's conditional
/// update keeps them from double counting.
pub struct LockJanitor {
    store: Arc<dyn LockStore>,
    interval: Duration,
}

impl LockJanitor {
    pub fn new(store: Arc<dyn LockStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn sweep_once(&self) -> Result<usize, StoreError> {
        self.store.release_expired(Utc::now()).await
    }

    /// Runs forever. A failed sweep is logged and retried on the next tick.
    pub async fn run(self) {
        info!(
            interval_seconds = self.interval.as_secs(),
            "seat lock janitor started"
        );

        loop {
            tokio::time::sleep(self.interval).await;

            match self.sweep_once().await {
                Ok(0) => {}
                Ok(released) => info!(released = released, "swept expired seat locks"),
                Err(err) => error!(error = %err, "seat lock sweep failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLockStore;
    use transix_domain::{SeatLock, SeatLockStatus};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_reclaims_only_expired_rows() {
        let store = Arc::new(MemoryLockStore::new());
        let schedule_id = Uuid::new_v4();

        let expired = SeatLock::new(
            schedule_id,
            1,
            Uuid::new_v4(),
            "s1".to_string(),
            Utc::now() - chrono::Duration::seconds(400),
            chrono::Duration::seconds(300),
        );
        let expired_id = expired.id;
        let live = SeatLock::new(
            schedule_id,
            2,
            Uuid::new_v4(),
            "s2".to_string(),
            Utc::now(),
            chrono::Duration::seconds(300),
        );
        store.try_insert(expired).await.unwrap();
        store.try_insert(live).await.unwrap();

        let janitor = LockJanitor::new(
            Arc::clone(&store) as Arc<dyn LockStore>,
            Duration::from_secs(30),
        );

        assert_eq!(janitor.sweep_once().await.unwrap(), 1);
        assert_eq!(janitor.sweep_once().await.unwrap(), 0);

        let row = store.get(expired_id).await.unwrap().unwrap();
        assert_eq!(row.status, SeatLockStatus::Available);
        assert!(store
            .find_active(schedule_id, 2, Utc::now())
            .await
            .unwrap()
            .is_some());
    }
}
