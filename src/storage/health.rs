//! Store health snapshots built from a bounded ping and pool statistics.

use serde::Serialize;

use super::pool::{PoolStats, Store};
use crate::config::HealthConfig;

const HEALTHY_MESSAGE: &str = "It's healthy";

/// Overall store status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Up,
    Down,
}

/// Pool counters as reported over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolReport {
    pub open_connections: u32,
    pub in_use: u32,
    pub idle: u32,
    pub wait_count: u64,
    pub wait_duration: String,
    pub wait_duration_us: u64,
    pub max_idle_closed: u64,
    pub max_lifetime_closed: u64,
}

impl From<PoolStats> for PoolReport {
    fn from(stats: PoolStats) -> Self {
        Self {
            open_connections: stats.open,
            in_use: stats.in_use,
            idle: stats.idle,
            wait_count: stats.wait_count,
            wait_duration: format!("{:?}", stats.wait_duration),
            wait_duration_us: stats.wait_duration.as_micros() as u64,
            max_idle_closed: stats.max_idle_closed,
            max_lifetime_closed: stats.max_lifetime_closed,
        }
    }
}

/// Result of one health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Read pool counters (the pool the ping runs against)
    #[serde(flatten)]
    pub read: PoolReport,
    pub write: PoolReport,
}

impl HealthStatus {
    pub fn is_up(&self) -> bool {
        self.status == Status::Up
    }
}

/// Warnings raised by pool statistics, ordered from least to most specific.
///
/// Connections closed for idle or lifetime limits count as excessive once
/// they exceed half of the currently open connections.
pub fn classify(stats: &PoolStats, thresholds: &HealthConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let half_open = u64::from(stats.open) / 2;

    if stats.open > thresholds.heavy_load_open_connections {
        warnings.push("The database is experiencing heavy load.".to_string());
    }
    if stats.wait_count > thresholds.high_wait_count {
        warnings.push(
            "The database has a high number of wait events, indicating potential bottlenecks."
                .to_string(),
        );
    }
    if stats.max_idle_closed > half_open {
        warnings.push(
            "Many idle connections are being closed, consider revising the connection pool settings."
                .to_string(),
        );
    }
    if stats.max_lifetime_closed > half_open {
        warnings.push(
            "Many connections are being closed due to max lifetime, consider increasing max lifetime or revising the connection usage pattern."
                .to_string(),
        );
    }
    warnings
}

/// Samples store health on demand.
///
/// A failed ping is reported as `down`; deciding what to do about it is up
/// to the caller.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    store: Store,
    config: HealthConfig,
}

impl HealthReporter {
    pub fn new(store: Store, config: HealthConfig) -> Self {
        Self { store, config }
    }

    pub async fn snapshot(&self) -> HealthStatus {
        let ping = tokio::time::timeout(self.config.ping_timeout(), self.ping()).await;
        let error = match ping {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("db down: {}", e)),
            Err(_) => Some(format!(
                "db down: ping timed out after {:?}",
                self.config.ping_timeout()
            )),
        };

        let read = self.store.read_stats();
        let write = self.store.write_stats();

        match error {
            Some(error) => {
                tracing::warn!(location = %self.store.location(), error = %error, "Store health check failed");
                HealthStatus {
                    status: Status::Down,
                    message: "The database is unreachable.".to_string(),
                    error: Some(error),
                    warnings: Vec::new(),
                    read: read.into(),
                    write: write.into(),
                }
            }
            None => {
                let warnings = classify(&read, &self.config);
                let message = warnings
                    .last()
                    .cloned()
                    .unwrap_or_else(|| HEALTHY_MESSAGE.to_string());
                HealthStatus {
                    status: Status::Up,
                    message,
                    error: None,
                    warnings,
                    read: read.into(),
                    write: write.into(),
                }
            }
        }
    }

    async fn ping(&self) -> crate::error::Result<()> {
        let mut conn = self.store.acquire_read().await?;
        sqlx::query("SELECT 1").execute(&mut *conn).await?;
        Ok(())
    }
}
