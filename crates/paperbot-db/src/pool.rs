//! Connection pool for the PostgreSQL seen store.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use paperbot_core::{Error, Result};

/// The scheduler runs one cycle at a time, so a small pool is enough.
const MAX_CONNECTIONS: u32 = 4;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Open a pool. Connection failures surface as `StoreUnavailable`.
pub(crate) async fn create_pool(database_url: &str) -> Result<PgPool> {
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .connect(database_url)
        .await
        .map_err(|e| Error::StoreUnavailable(format!("Failed to connect to database: {}", e)))?;

    info!(
        subsystem = "store",
        component = "pool",
        op = "connect",
        max_connections = MAX_CONNECTIONS,
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool ready"
    );
    Ok(pool)
}

/// Log pool occupancy; warns when every connection is busy.
pub(crate) fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();

    debug!(
        subsystem = "store",
        component = "pool",
        pool_size = size,
        pool_idle = idle,
        "Pool health check"
    );

    if idle == 0 && size >= MAX_CONNECTIONS {
        warn!(
            subsystem = "store",
            component = "pool",
            pool_size = size,
            "Connection pool has no idle connections"
        );
    }
}
