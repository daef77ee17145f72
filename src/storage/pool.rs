//! Dual-pool access to the single SQLite store file.
//!
//! All mutating statements go through the write pool, which holds at most one
//! connection and opens every transaction with `BEGIN IMMEDIATE`. Readers use a
//! separate read-only pool; in WAL mode they proceed against the last
//! committed state while a write is in flight.
//!
//! The `memory` location gets the same treatment: a WAL database in a scratch
//! directory that is removed when the last handle to the store is dropped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tempfile::TempDir;
use tokio::sync::OnceCell;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

/// Counters the pool hooks and acquire paths update.
#[derive(Debug, Default)]
struct PoolCounters {
    wait_count: AtomicU64,
    wait_duration_us: AtomicU64,
    idle_closed: AtomicU64,
    lifetime_closed: AtomicU64,
}

impl PoolCounters {
    fn record_wait(&self, waited: Duration) {
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        self.wait_duration_us
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
    }

    /// Decide whether a pooled connection may be reused.
    fn keep(
        &self,
        age: Duration,
        idle_for: Duration,
        max_lifetime: Option<Duration>,
        idle_timeout: Option<Duration>,
    ) -> bool {
        if max_lifetime.is_some_and(|max| age > max) {
            self.lifetime_closed.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if idle_timeout.is_some_and(|max| idle_for > max) {
            self.idle_closed.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }
}

/// Point-in-time statistics for one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub max_open: u32,
    pub open: u32,
    pub in_use: u32,
    pub idle: u32,
    pub wait_count: u64,
    pub wait_duration: Duration,
    pub max_idle_closed: u64,
    pub max_lifetime_closed: u64,
}

/// One side (read or write) of the store.
#[derive(Debug)]
struct Handle {
    pool: SqlitePool,
    max_connections: u32,
    counters: Arc<PoolCounters>,
}

impl Handle {
    fn saturated(&self) -> bool {
        self.pool.num_idle() == 0 && self.pool.size() >= self.max_connections
    }

    fn stats(&self) -> PoolStats {
        let open = self.pool.size();
        let idle = (self.pool.num_idle() as u32).min(open);
        PoolStats {
            max_open: self.max_connections,
            open,
            in_use: open - idle,
            idle,
            wait_count: self.counters.wait_count.load(Ordering::Relaxed),
            wait_duration: Duration::from_micros(
                self.counters.wait_duration_us.load(Ordering::Relaxed),
            ),
            max_idle_closed: self.counters.idle_closed.load(Ordering::Relaxed),
            max_lifetime_closed: self.counters.lifetime_closed.load(Ordering::Relaxed),
        }
    }

    /// Run an acquisition, counting it as a wait when no connection was free.
    async fn tracked<T, F>(&self, acquire: F) -> std::result::Result<T, sqlx::Error>
    where
        F: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let contended = self.saturated();
        let start = Instant::now();
        let result = acquire.await;
        if contended {
            self.counters.record_wait(start.elapsed());
        }
        result
    }
}

/// Read and write handles to one SQLite store.
///
/// Cloning is cheap and shares both pools.
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    location: String,
    read: Handle,
    write: Handle,
    /// Backing directory of a `memory` store; must outlive both pools.
    scratch: Option<TempDir>,
}

impl Store {
    /// Open the store, run migrations through the write pool, then open the read pool.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        let location = config.path.clone();
        let (path, scratch) = if config.is_memory() {
            let dir = tempfile::Builder::new()
                .prefix("reqlog-memory-")
                .tempdir()
                .map_err(|e| Error::StorageUnavailable {
                    location: location.clone(),
                    message: format!("cannot create scratch directory: {}", e),
                })?;
            (dir.path().join("reqlog.db"), Some(dir))
        } else {
            ensure_parent_dir(&config.path)?;
            (PathBuf::from(&config.path), None)
        };
        let base = SqliteConnectOptions::new()
            .filename(&path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout())
            .foreign_keys(true);

        let unavailable = |e: sqlx::Error| Error::StorageUnavailable {
            location: location.clone(),
            message: e.to_string(),
        };

        let write_counters = Arc::new(PoolCounters::default());
        let write_pool = pool_options(config, 1, 1, &write_counters)
            .connect_with(base.clone().create_if_missing(true))
            .await
            .map_err(unavailable)?;

        sqlx::migrate!("./migrations").run(&write_pool).await?;
        tracing::info!(location = %location, "Store migrations applied");

        let read_counters = Arc::new(PoolCounters::default());
        let read_opts = base
            .pragma("query_only", "ON")
            .read_only(true)
            .create_if_missing(false);
        let read_pool = pool_options(config, config.read_max_connections, 0, &read_counters)
            .connect_with(read_opts)
            .await
            .map_err(unavailable)?;

        tracing::info!(
            location = %location,
            read_max_connections = config.read_max_connections,
            "Store opened"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                location,
                read: Handle {
                    pool: read_pool,
                    max_connections: config.read_max_connections,
                    counters: read_counters,
                },
                write: Handle {
                    pool: write_pool,
                    max_connections: 1,
                    counters: write_counters,
                },
                scratch,
            }),
        })
    }

    pub fn location(&self) -> &str {
        &self.inner.location
    }

    /// Directory holding the database file of a `memory` store.
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.inner.scratch.as_ref().map(TempDir::path)
    }

    /// Acquire a read-only connection.
    pub async fn acquire_read(&self) -> Result<PoolConnection<Sqlite>> {
        let read = &self.inner.read;
        Ok(read.tracked(read.pool.acquire()).await?)
    }

    /// Begin a write transaction holding the single write slot.
    ///
    /// Dropping the transaction without committing rolls it back and frees the slot.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        let write = &self.inner.write;
        Ok(write
            .tracked(write.pool.begin_with("BEGIN IMMEDIATE"))
            .await?)
    }

    pub fn read_stats(&self) -> PoolStats {
        self.inner.read.stats()
    }

    pub fn write_stats(&self) -> PoolStats {
        self.inner.write.stats()
    }

    /// Whether two values share the same underlying pools.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Close both pools. Later acquisitions fail.
    pub async fn close(&self) {
        self.inner.read.pool.close().await;
        self.inner.write.pool.close().await;
        tracing::info!(location = %self.inner.location, "Disconnected from store");
    }
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::StorageUnavailable {
            location: path.to_string(),
            message: format!("cannot create directory '{}': {}", parent.display(), e),
        })?;
    }
    Ok(())
}

fn pool_options(
    config: &DatabaseConfig,
    max_connections: u32,
    min_connections: u32,
    counters: &Arc<PoolCounters>,
) -> SqlitePoolOptions {
    // Recycling is enforced by the hooks below so the closures can be counted.
    let options = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(None)
        .max_lifetime(None);

    let max_lifetime = config.max_lifetime();
    let idle_timeout = config.idle_timeout();
    if max_lifetime.is_none() && idle_timeout.is_none() {
        return options;
    }

    let on_acquire = Arc::clone(counters);
    let on_release = Arc::clone(counters);
    options
        .before_acquire(move |_conn, meta| {
            let keep = on_acquire.keep(meta.age, meta.idle_for, max_lifetime, idle_timeout);
            Box::pin(async move { Ok(keep) })
        })
        .after_release(move |_conn, meta| {
            let keep = on_release.keep(meta.age, meta.idle_for, max_lifetime, None);
            Box::pin(async move { Ok(keep) })
        })
}

/// Explicitly owned once-cell that opens the store on first use.
///
/// Repeated `get_or_open` calls hand back the already-open store rather than
/// opening a second writer against the same file.
#[derive(Debug, Default)]
pub struct StoreCell {
    cell: OnceCell<Store>,
}

impl StoreCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_open(&self, config: &DatabaseConfig) -> Result<Store> {
        self.cell
            .get_or_try_init(|| Store::open(config))
            .await
            .cloned()
    }

    pub fn get(&self) -> Option<&Store> {
        self.cell.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_keep_counts_lifetime_closures() {
        let counters = PoolCounters::default();
        assert!(!counters.keep(secs(120), secs(0), Some(secs(60)), None));
        assert!(counters.keep(secs(30), secs(0), Some(secs(60)), None));
        assert_eq!(counters.lifetime_closed.load(Ordering::Relaxed), 1);
        assert_eq!(counters.idle_closed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_keep_counts_idle_closures() {
        let counters = PoolCounters::default();
        assert!(!counters.keep(secs(10), secs(90), None, Some(secs(60))));
        assert_eq!(counters.idle_closed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_keep_without_limits() {
        let counters = PoolCounters::default();
        assert!(counters.keep(secs(1_000_000), secs(1_000_000), None, None));
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let store = Store::open(&DatabaseConfig::memory()).await.unwrap();
        let write = store.write_stats();
        assert_eq!(write.max_open, 1);
        assert!(write.open <= 1);

        let mut conn = store.acquire_read().await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM logs")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_memory_store_is_a_scratch_wal_file() {
        let store = Store::open(&DatabaseConfig::memory()).await.unwrap();
        assert_eq!(store.location(), "memory");
        let dir = store.scratch_dir().unwrap().to_path_buf();
        assert!(dir.join("reqlog.db").exists());

        let mut conn = store.acquire_read().await.unwrap();
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        drop(conn);

        store.close().await;
        drop(store);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_memory_stores_are_independent() {
        let first = Store::open(&DatabaseConfig::memory()).await.unwrap();
        let second = Store::open(&DatabaseConfig::memory()).await.unwrap();
        assert_ne!(first.scratch_dir(), second.scratch_dir());

        let mut tx = first.begin_write().await.unwrap();
        sqlx::query("INSERT INTO logs (request_id) VALUES ('only-in-first')")
            .execute(&mut *tx)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut conn = second.acquire_read().await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM logs")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_file_store_has_no_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&DatabaseConfig::at(dir.path().join("store.db")))
            .await
            .unwrap();
        assert!(store.scratch_dir().is_none());
    }

    #[tokio::test]
    async fn test_read_pool_rejects_writes() {
        let store = Store::open(&DatabaseConfig::memory()).await.unwrap();
        let mut conn = store.acquire_read().await.unwrap();
        let result = sqlx::query("INSERT INTO users (username, email) VALUES ('a', 'b')")
            .execute(&mut *conn)
            .await;
        assert!(result.is_err(), "read handle must not accept writes");
    }

    #[tokio::test]
    async fn test_store_cell_is_idempotent() {
        let cell = StoreCell::new();
        let config = DatabaseConfig::memory();
        let first = cell.get_or_open(&config).await.unwrap();
        let second = cell.get_or_open(&config).await.unwrap();
        assert!(first.ptr_eq(&second));
        assert!(cell.get().unwrap().ptr_eq(&first));
    }

    #[tokio::test]
    async fn test_open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("store.db");
        let store = Store::open(&DatabaseConfig::at(&path)).await.unwrap();
        assert!(path.exists());
        store.close().await;
    }

    #[tokio::test]
    async fn test_open_fails_when_directory_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let path = blocker.join("store.db");

        let err = Store::open(&DatabaseConfig::at(&path)).await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_closed_store_rejects_acquire() {
        let store = Store::open(&DatabaseConfig::memory()).await.unwrap();
        store.close().await;
        assert!(store.acquire_read().await.is_err());
        assert!(store.begin_write().await.is_err());
    }
}
