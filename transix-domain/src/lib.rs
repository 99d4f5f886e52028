pub mod error;
pub mod events;
pub mod lock;
pub mod ticket;
pub mod trip;

pub use error::{PublishError, StoreError};
pub use events::{EventPublisher, NullPublisher};
pub use lock::{SeatHold, SeatLock, SeatLockStatus};
pub use ticket::{PassengerDetails, Ticket, TicketStatus};
pub use trip::{Trip, TripStatus};
