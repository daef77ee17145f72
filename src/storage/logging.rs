//! Request log records and the write path that persists them.

use serde::Serialize;

use super::pool::Store;
use crate::error::Result;

/// A completed request log entry ready for database insertion.
///
/// All fields are owned so the record can outlive the request it describes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestLog {
    pub request_id: String,
    pub remote_ip: String,
    pub host: String,
    pub method: String,
    pub uri: String,
    pub user_agent: String,
    pub status: u16,
    pub error: String,
    /// Elapsed handler time in microseconds
    pub latency_us: u64,
    pub latency_human: String,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl RequestLog {
    /// Insert this log entry through the write pool, returning its row id.
    pub async fn insert(&self, store: &Store) -> Result<i64> {
        let mut tx = store.begin_write().await?;
        let result = sqlx::query(
            "INSERT INTO logs (
                request_id, remote_ip, host, method, uri, user_agent,
                status, error, latency, latency_human, bytes_in, bytes_out
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.request_id)
        .bind(&self.remote_ip)
        .bind(&self.host)
        .bind(&self.method)
        .bind(&self.uri)
        .bind(&self.user_agent)
        .bind(self.status as i64)
        .bind(&self.error)
        .bind(clamp_i64(self.latency_us))
        .bind(&self.latency_human)
        .bind(clamp_i64(self.bytes_in))
        .bind(clamp_i64(self.bytes_out))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
