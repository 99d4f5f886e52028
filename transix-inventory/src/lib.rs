pub mod inventory;
pub mod memory;

pub use inventory::{InventoryError, SeatCount, SeatInventory};
pub use memory::MemoryInventory;
