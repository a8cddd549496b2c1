//! Profile store metrics.

use metrics::{gauge, histogram};
use sqlx::PgPool;
use std::time::Instant;

/// Record how long one profile store query took.
pub fn record_query_duration(query_name: &'static str, duration_secs: f64) {
    histogram!("profile_store_query_duration_seconds", "query" => query_name).record(duration_secs);
}

/// Record connection pool occupancy. Called periodically.
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();

    gauge!("database_connections_active").set(size.saturating_sub(idle) as f64);
    gauge!("database_connections_idle").set(idle as f64);
    gauge!("database_connections_total").set(size as f64);
}

/// Times a query from construction until [`QueryTimer::record`].
///
/// ```ignore
/// let timer = QueryTimer::new("find_push_device");
/// let result = sqlx::query_as::<_, PushDeviceEntity>(...).fetch_optional(&pool).await;
/// timer.record();
/// ```
pub struct QueryTimer {
    query_name: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query_name: &'static str) -> Self {
        Self {
            query_name,
            start: Instant::now(),
        }
    }

    pub fn record(self) {
        record_query_duration(self.query_name, self.start.elapsed().as_secs_f64());
    }
}
