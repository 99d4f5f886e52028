pub mod coordinator;
pub mod reference;
pub mod store;

pub use coordinator::{BookingCoordinator, BookingError, SeatStatus};
pub use store::{CommitError, MemoryReservationStore, ReservationStore};
