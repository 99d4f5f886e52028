pub mod config;
pub mod database;
pub mod events;
pub mod pg_locks;
pub mod pg_store;
pub mod redis_locks;

pub use config::{Config, LockBackend};
pub use database::DbClient;
pub use events::EventProducer;
pub use pg_locks::PgLockStore;
pub use pg_store::PgReservationStore;
pub use redis_locks::RedisSeatLocks;
