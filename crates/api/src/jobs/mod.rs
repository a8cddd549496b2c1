//! Background job scheduler and job implementations.

mod history_resync;
mod pool_metrics;
mod scheduler;

pub use history_resync::HistoryResyncJob;
pub use pool_metrics::PoolMetricsJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
