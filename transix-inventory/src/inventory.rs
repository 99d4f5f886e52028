use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use transix_domain::StoreError;
use uuid::Uuid;

/// Seat counts for one schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatCount {
    pub schedule_id: Uuid,
    pub capacity: i32,
    pub available: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Schedule not found: {0}")]
    UnknownSchedule(Uuid),

    #[error("Insufficient seats: requested {requested}, available {available}")]
    SoldOut {
        schedule_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Atomic per-schedule seat counter.
///
/// `decrement` is conditional: it succeeds only while enough seats remain,
/// so concurrent callers can never drive the count below zero. `increment`
/// clamps at capacity.
#[async_trait]
pub trait SeatInventory: Send + Sync {
    async fn available(&self, schedule_id: Uuid) -> Result<i32, InventoryError>;

    /// Take `count` seats. Returns the remaining availability.
    async fn decrement(&self, schedule_id: Uuid, count: i32) -> Result<i32, InventoryError>;

    /// Give back `count` seats, clamped at capacity. Returns the new availability.
    async fn increment(&self, schedule_id: Uuid, count: i32) -> Result<i32, InventoryError>;
}
