use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::inventory::{InventoryError, SeatCount, SeatInventory};

/// In-memory seat counter. The reference implementation of `SeatInventory`;
/// production deployments use the Postgres-backed store.
pub struct MemoryInventory {
    counts: Mutex<HashMap<Uuid, SeatCount>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Register a schedule with all seats available
    pub fn register(&self, schedule_id: Uuid, capacity: i32) {
        let mut counts = self.counts.lock().unwrap();
        counts.insert(
            schedule_id,
            SeatCount {
                schedule_id,
                capacity,
                available: capacity,
            },
        );
    }

    pub fn snapshot(&self, schedule_id: Uuid) -> Option<SeatCount> {
        self.counts.lock().unwrap().get(&schedule_id).cloned()
    }
}

impl Default for MemoryInventory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SeatInventory for MemoryInventory {
    async fn available(&self, schedule_id: Uuid) -> Result<i32, InventoryError> {
        let counts = self.counts.lock().unwrap();
        counts
            .get(&schedule_id)
            .map(|c| c.available)
            .ok_or(InventoryError::UnknownSchedule(schedule_id))
    }

    async fn decrement(&self, schedule_id: Uuid, count: i32) -> Result<i32, InventoryError> {
        let mut counts = self.counts.lock().unwrap();
        let entry = counts
            .get_mut(&schedule_id)
            .ok_or(InventoryError::UnknownSchedule(schedule_id))?;

        if entry.available < count {
            return Err(InventoryError::SoldOut {
                schedule_id,
                requested: count,
                available: entry.available,
            });
        }

        entry.available -= count;
        Ok(entry.available)
    }

    async fn increment(&self, schedule_id: Uuid, count: i32) -> Result<i32, InventoryError> {
        let mut counts = self.counts.lock().unwrap();
        let entry = counts
            .get_mut(&schedule_id)
            .ok_or(InventoryError::UnknownSchedule(schedule_id))?;

        entry.available = (entry.available + count).min(entry.capacity);
        Ok(entry.available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_count_lifecycle() {
        let inventory = MemoryInventory::new();
        let schedule_id = Uuid::new_v4();

        inventory.register(schedule_id, 40);
        assert_eq!(inventory.available(schedule_id).await.unwrap(), 40);

        assert_eq!(inventory.decrement(schedule_id, 1).await.unwrap(), 39);
        assert_eq!(inventory.increment(schedule_id, 1).await.unwrap(), 40);

        // increment clamps at capacity
        assert_eq!(inventory.increment(schedule_id, 5).await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_decrement_refuses_oversell() {
        let inventory = MemoryInventory::new();
        let schedule_id = Uuid::new_v4();
        inventory.register(schedule_id, 1);

        inventory.decrement(schedule_id, 1).await.unwrap();
        let err = inventory.decrement(schedule_id, 1).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::SoldOut { available: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_schedule() {
        let inventory = MemoryInventory::new();
        let err = inventory.available(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, InventoryError::UnknownSchedule(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_decrements_never_oversell() {
        let inventory = Arc::new(MemoryInventory::new());
        let schedule_id = Uuid::new_v4();
        inventory.register(schedule_id, 3);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let inventory = Arc::clone(&inventory);
            handles.push(tokio::spawn(async move {
                inventory.decrement(schedule_id, 1).await.is_ok()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 3);
        assert_eq!(inventory.available(schedule_id).await.unwrap(), 0);
    }
}
