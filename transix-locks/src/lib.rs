pub mod janitor;
pub mod manager;
pub mod store;

pub use janitor::LockJanitor;
pub use manager::{DurableSeatLocks, LockConfig, LockError, SeatLockManager, TicketView};
pub use store::{LockStore, MemoryLockStore};
