//! The DB handle: a small pool of `rusqlite::Connection`s to one physical SQLite
//! file (or, in memory mode, to one pinned private connection), plus the
//! transaction helper the registry builds all of its schema mutations on top of.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use storage_core::{Error, Result};

const COMPONENT_NAME: &str = "handle";

use crate::uri::BackendUri;

/// Process-wide count of currently open handles. Exists purely so tests (and, one
/// day, a diagnostics endpoint) can assert that a `Drop`ped pool leaves nothing
/// behind.
static OPEN_HANDLES: AtomicUsize = AtomicUsize::new(0);

/// Number of open handles across the whole process.
pub fn open_handle_count() -> usize {
    OPEN_HANDLES.load(Ordering::SeqCst)
}

enum DbPath {
    File(String),
    Memory,
}

/// Owns connections to a single logical database.
pub struct DbHandle {
    path: DbPath,
    pragmas: Vec<(String, String)>,
    max_open: usize,
    max_idle: usize,
    idle: Mutex<VecDeque<Connection>>,
    open_permits: Semaphore,
    opened: AtomicUsize,
    waiters: AtomicUsize,
}

impl DbHandle {
    /// Opens a handle for `uri`, applying the max-open/max-idle policy the pool
    /// contract requires: one connection for memory mode, an otherwise generous
    /// pool with no idle reaping (`max-idle-time = 0`, `max-lifetime = 0` are the
    /// absence of any eviction logic here, not a configurable knob).
    pub async fn open(uri: &BackendUri) -> Result<Self> {
        let memory = uri.is_memory();
        let path = if memory {
            DbPath::Memory
        } else {
            DbPath::File(uri.path().to_string())
        };
        let pragmas = uri.pragmas();
        let (max_open, max_idle) = if memory { (1, 1) } else { (10, 10) };

        let handle = DbHandle {
            path,
            pragmas,
            max_open,
            max_idle,
            idle: Mutex::new(VecDeque::new()),
            open_permits: Semaphore::new(max_open),
            opened: AtomicUsize::new(0),
            waiters: AtomicUsize::new(0),
        };

        // Ping: open one connection eagerly and fold it into the idle pool so the
        // failure surfaces from `open` rather than from the first caller.
        let conn = handle.open_connection().await?;
        conn.execute_batch("SELECT 1").map_err(Error::from)?;
        handle.idle.lock().unwrap().push_back(conn);

        OPEN_HANDLES.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn open_connection(&self) -> Result<Connection> {
        let pragmas = self.pragmas.clone();
        let path = match &self.path {
            DbPath::Memory => None,
            DbPath::File(p) => Some(p.clone()),
        };
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = match &path {
                Some(p) => Connection::open(p)?,
                None => Connection::open_in_memory()?,
            };
            for (name, value) in &pragmas {
                conn.pragma_update(None, name, value)?;
            }
            Ok(conn)
        })
        .await
        .map_err(|_| Error::Cancelled)??;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(conn)
    }

    /// Runs `f` against a checked-out connection on the blocking-task pool,
    /// returning the connection to the idle set (or closing it, if the idle set
    /// is already full) afterward.
    pub async fn exec_blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let permit = self.open_permits.acquire().await;
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        let _permit = permit.map_err(|_| Error::Cancelled)?;

        let maybe_idle = self.idle.lock().unwrap().pop_front();
        let mut conn = match maybe_idle {
            Some(c) => c,
            None => self.open_connection().await?,
        };

        let (result, conn) = tokio::task::spawn_blocking(move || {
            let r = f(&mut conn);
            (r, conn)
        })
        .await
        .map_err(|_| Error::Cancelled)?;

        let mut idle = self.idle.lock().unwrap();
        if idle.len() < self.max_idle {
            idle.push_back(conn);
        } else {
            self.opened.fetch_sub(1, Ordering::SeqCst);
        }
        drop(idle);

        result
    }

    /// Begins a transaction, calls `f(&tx)`, and commits on success. On error the
    /// transaction is simply dropped, which `rusqlite` rolls back by default; the
    /// same happens if the blocking closure panics (unwinding runs the
    /// transaction's destructor) or if the surrounding future is dropped before
    /// the blocking task finishes (the task detaches and runs to completion, then
    /// the uncommitted transaction is dropped and rolled back on the blocking
    /// thread).
    pub async fn in_transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.exec_blocking(move |conn| {
            let tx = conn.transaction().map_err(Error::from)?;
            match f(&tx) {
                Ok(value) => {
                    tx.commit().map_err(Error::from)?;
                    Ok(value)
                }
                Err(e) => {
                    drop(tx);
                    Err(e)
                }
            }
        })
        .await
    }

    /// Snapshot of pool-style stats for metrics export.
    pub fn stats(&self) -> HandleStats {
        HandleStats {
            open: self.opened.load(Ordering::SeqCst),
            idle: self.idle.lock().unwrap().len(),
            waiters: self.waiters.load(Ordering::SeqCst),
        }
    }

    pub fn max_open(&self) -> usize {
        self.max_open
    }
}

impl Drop for DbHandle {
    fn drop(&mut self) {
        OPEN_HANDLES.fetch_sub(1, Ordering::SeqCst);
        debug!(component = COMPONENT_NAME, "db handle closed");
    }
}

/// Driver-level stats reported by a single handle, surfaced to the metrics module.
#[derive(Debug, Clone, Copy)]
pub struct HandleStats {
    pub open: usize,
    pub idle: usize,
    pub waiters: usize,
}

pub(crate) fn log_handle_stats(db: &str, stats: &HandleStats) {
    debug!(
        db,
        pool_size = stats.open,
        pool_idle = stats.idle,
        pool_wait_count = stats.waiters,
        "handle stats"
    );
    if stats.waiters > 0 {
        warn!(db, waiters = stats.waiters, "callers waiting for a connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_memory_handle() -> DbHandle {
        let dir = TempDir::new().unwrap();
        let raw = format!("file:{}/?mode=memory", dir.path().display());
        let uri = BackendUri::parse(&raw).unwrap();
        DbHandle::open(&uri).await.unwrap()
    }

    #[tokio::test]
    async fn exec_blocking_runs_statements() {
        let handle = open_memory_handle().await;
        handle
            .exec_blocking(|conn| {
                conn.execute_batch("CREATE TABLE t (v TEXT)").map_err(Error::from)
            })
            .await
            .unwrap();
        let count: i64 = handle
            .exec_blocking(|conn| {
                conn.query_row("SELECT count(*) FROM t", [], |row| row.get(0))
                    .map_err(Error::from)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_error() {
        let handle = open_memory_handle().await;
        let outcome: Result<()> = handle
            .in_transaction(|tx| {
                tx.execute_batch("CREATE TABLE t (v TEXT)").map_err(Error::from)?;
                Err(Error::Internal("forced rollback".to_string()))
            })
            .await;
        assert!(outcome.is_err());

        let exists: i64 = handle
            .exec_blocking(|conn| {
                conn.query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='t'",
                    [],
                    |row| row.get(0),
                )
                .map_err(Error::from)
            })
            .await
            .unwrap();
        assert_eq!(exists, 0);
    }

    #[tokio::test]
    async fn transaction_commits_on_success() {
        let handle = open_memory_handle().await;
        handle
            .in_transaction(|tx| {
                tx.execute_batch("CREATE TABLE t (v TEXT)").map_err(Error::from)
            })
            .await
            .unwrap();

        let exists: i64 = handle
            .exec_blocking(|conn| {
                conn.query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='t'",
                    [],
                    |row| row.get(0),
                )
                .map_err(Error::from)
            })
            .await
            .unwrap();
        assert_eq!(exists, 1);
    }

    #[tokio::test]
    async fn memory_mode_pins_a_single_connection() {
        let handle = open_memory_handle().await;
        assert_eq!(handle.max_open(), 1);
    }
}
