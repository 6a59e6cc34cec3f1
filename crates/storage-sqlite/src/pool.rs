//! Connection pool: owns the set of open DB handles keyed by logical database
//! name.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use storage_core::Result;

use crate::handle::{log_handle_stats, DbHandle};
use crate::metadata;
use crate::metrics;
use crate::uri::BackendUri;

const COMPONENT_NAME: &str = "pool";

/// Container of open database handles, keyed by logical database name.
pub struct ConnectionPool {
    uri: BackendUri,
    handles: RwLock<HashMap<String, Arc<DbHandle>>>,
}

impl ConnectionPool {
    /// Opens the pool. In file mode, globs `uri.path()` for `*.sqlite` files and
    /// opens each as a known database; in memory mode the directory is ignored
    /// since there is no per-database file to discover. A `.sqlite` file that
    /// lacks the reserved metadata table is not one of this backend's databases —
    /// it is opened just long enough to check, then left on disk untouched and
    /// excluded from the returned list. Returns the pool plus the sorted list of
    /// databases discovered at open.
    pub async fn open(uri: BackendUri) -> Result<(Self, Vec<String>)> {
        let mut handles = HashMap::new();
        let mut names = Vec::new();

        if !uri.is_memory() {
            let dir = uri.path().to_string();
            let entries = std::fs::read_dir(&dir)?;
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("sqlite") {
                    continue;
                }
                let name = match path.file_stem().and_then(|s| s.to_str()) {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                let db_uri = uri.for_database(&name);
                let handle = DbHandle::open(&db_uri).await?;
                let belongs_to_backend = handle.exec_blocking(|conn| metadata::table_exists(conn)).await?;
                if !belongs_to_backend {
                    debug!(component = COMPONENT_NAME, db = %name, "skipping file without the reserved metadata table");
                    continue;
                }
                handles.insert(name.clone(), Arc::new(handle));
                names.push(name);
            }
        }

        names.sort();
        metrics::set_database_count(names.len());
        info!(component = COMPONENT_NAME, count = names.len(), "pool opened");

        Ok((
            ConnectionPool {
                uri,
                handles: RwLock::new(handles),
            },
            names,
        ))
    }

    /// Sorted database names currently known to the pool.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the handle for `name` under a read lock, or `None`.
    pub async fn get_existing(&self, name: &str) -> Option<Arc<DbHandle>> {
        self.handles.read().await.get(name).cloned()
    }

    /// Optimistic get-or-create: checks under a read lock first, then promotes to
    /// a write lock and re-checks before opening a new handle. Returns the handle
    /// and whether this call created it.
    pub async fn get_or_create(&self, name: &str) -> Result<(Arc<DbHandle>, bool)> {
        if let Some(handle) = self.get_existing(name).await {
            return Ok((handle, false));
        }

        let mut handles = self.handles.write().await;
        if let Some(handle) = handles.get(name) {
            return Ok((handle.clone(), false));
        }

        let db_uri = self.uri.for_database(name);
        let handle = Arc::new(DbHandle::open(&db_uri).await?);
        handles.insert(name.to_string(), handle.clone());

        let count = handles.len();
        drop(handles);
        metrics::set_database_count(count);
        log_handle_stats(name, &handle.stats());
        info!(component = COMPONENT_NAME, db = name, operation = "get_or_create", "database opened");

        Ok((handle, true))
    }

    /// Closes and removes `name`'s handle; if file-backed, also deletes the file.
    /// Errors deleting the file are logged but do not prevent removal — the
    /// postcondition is that the pool no longer references the database.
    pub async fn drop(&self, name: &str) -> Result<bool> {
        let mut handles = self.handles.write().await;
        let removed = handles.remove(name);
        let count = handles.len();
        drop(handles);

        let Some(handle) = removed else {
            return Ok(false);
        };
        drop(handle);

        if !self.uri.is_memory() {
            let db_uri = self.uri.for_database(name);
            if let Err(e) = std::fs::remove_file(db_uri.path()) {
                tracing::warn!(
                    component = COMPONENT_NAME,
                    db = name,
                    error = %e,
                    "failed to remove database file during drop"
                );
            }
        }

        metrics::set_database_count(count);
        metrics::remove_database(name);
        info!(component = COMPONENT_NAME, db = name, operation = "drop", "database dropped");
        Ok(true)
    }

    pub fn uri(&self) -> &BackendUri {
        &self.uri
    }
}
