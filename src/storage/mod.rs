//! SQLite storage: pool management, request logs, records and health.

pub mod health;
pub mod logging;
pub mod logs;
pub mod pool;
pub mod records;

pub use health::{HealthReporter, HealthStatus};
pub use logging::RequestLog;
pub use logs::{FilterParams, LogFilter, LogRow, Page, PageParams, RelativeTime};
pub use pool::{PoolStats, Store, StoreCell};
