use std::sync::Arc;
use std::time::Duration;

use transix_locks::{LockJanitor, LockStore};
use transix_store::{Config, DbClient, LockBackend, PgLockStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transix_worker=debug,transix_locks=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().expect("Failed to load config");

    match config.locks.backend {
        LockBackend::Postgres => {
            let db = DbClient::new(&config.database.url)
                .await
                .expect("Failed to connect to database");
            db.migrate().await.expect("Failed to run migrations");

            let store = Arc::new(PgLockStore::new(db.pool.clone())) as Arc<dyn LockStore>;
            let janitor = LockJanitor::new(
                store,
                Duration::from_secs(config.locks.sweep_interval_seconds),
            );
            janitor.run().await;
        }
        LockBackend::Redis => {
            // Redis entries expire on the broker, nothing to sweep
            tracing::info!("locks.backend is redis, no sweeper needed");
        }
    }
}
