//! The schema authority: all CRUD on databases, collections, and indexes, plus
//! the table-name mangling and the single lock that doubles as the backend's
//! schema-transaction substitute (see module docs in `lib.rs` for the rationale).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use storage_core::{Error, Result};

use crate::constants::{
    metadata_table_name, DEFAULT_INDEX_NAME, DOCUMENT_COLUMN, ID_FIELD, SQLITE_RESERVED_PREFIX,
};
use crate::handle::DbHandle;
use crate::metadata::{create_metadata_table, load_all, CollectionMetadata, IndexKeyPart, IndexSpec, Settings};
use crate::metrics;
use crate::pool::ConnectionPool;
use crate::uri::BackendUri;

const FNV_OFFSET_BASIS_32: u32 = 0x811c_9dc5;
const FNV_PRIME_32: u32 = 0x0100_0193;

fn fnv1a32_seeded(data: &[u8], seed: u32) -> u32 {
    let mut hash = FNV_OFFSET_BASIS_32 ^ seed;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME_32);
    }
    hash
}

/// Computes the physical table name for `collection`, avoiding any name already
/// present in `existing`. Deterministic for a given `(collection, seed)` pair, so
/// recovery on reopen never needs to re-derive a stored table name.
fn mangle_table_name(collection: &str, existing: &std::collections::HashSet<String>) -> String {
    let lower = collection.to_lowercase();
    let mut seed: u32 = 0;
    loop {
        let hash = fnv1a32_seeded(collection.as_bytes(), seed);
        let mut candidate = format!("{lower}_{hash:08x}");
        if candidate.starts_with(SQLITE_RESERVED_PREFIX) {
            candidate = format!("_{candidate}");
        }
        if !existing.contains(&candidate) {
            return candidate;
        }
        seed += 1;
    }
}

type Cache = HashMap<String, HashMap<String, CollectionMetadata>>;

/// In-memory schema authority and metadata cache, backed by the connection pool.
pub struct Registry {
    pool: Arc<ConnectionPool>,
    cache: RwLock<Cache>,
}

impl Registry {
    /// Opens the pool at `uri` and populates the cache from each database's
    /// persisted metadata table.
    pub async fn open(uri: BackendUri) -> Result<Self> {
        let (pool, initial_dbs) = ConnectionPool::open(uri).await?;
        let pool = Arc::new(pool);
        let mut cache = HashMap::new();

        // `initial_dbs` only ever names files the pool confirmed carry the
        // reserved metadata table; a foreign `.sqlite` file never reaches this
        // loop, so `load_all` always has a table to select from here.
        for db in &initial_dbs {
            let handle = pool
                .get_existing(db)
                .await
                .ok_or_else(|| Error::Internal(format!("pool lost handle for {db} during open")))?;
            let rows = handle
                .exec_blocking(|conn| load_all(conn))
                .await?;
            let mut per_db = HashMap::new();
            for row in rows {
                per_db.insert(row.name.clone(), row);
            }
            metrics::set_collection_count(db, per_db.len());
            cache.insert(db.clone(), per_db);
        }

        Ok(Registry {
            pool,
            cache: RwLock::new(cache),
        })
    }

    // ─── Database operations ────────────────────────────────────────────────

    pub async fn database_list(&self) -> Vec<String> {
        self.pool.list().await
    }

    pub async fn database_get_existing(&self, db: &str) -> Option<Arc<DbHandle>> {
        self.pool.get_existing(db).await
    }

    /// Opens `db` if already known; otherwise creates it via the pool and, if
    /// that succeeded as a brand-new handle, creates the reserved metadata table.
    /// If the table creation fails, the freshly created database is removed
    /// (rollback-by-removal) and the error is returned.
    pub async fn database_get_or_create(&self, db: &str) -> Result<Arc<DbHandle>> {
        let (handle, created) = self.pool.get_or_create(db).await?;
        if !created {
            return Ok(handle);
        }

        let mut cache = self.cache.write().await;
        let result = handle.exec_blocking(|conn| create_metadata_table(conn)).await;
        match result {
            Ok(()) => {
                cache.insert(db.to_string(), HashMap::new());
                metrics::set_collection_count(db, 0);
                info!(component = "registry", db, operation = "database_get_or_create", "database created");
                Ok(handle)
            }
            Err(e) => {
                drop(cache);
                let _ = self.pool.drop(db).await;
                Err(e)
            }
        }
    }

    /// Removes `db` from the cache, then from the pool. Returns whether anything
    /// was removed.
    pub async fn database_drop(&self, db: &str) -> Result<bool> {
        let mut cache = self.cache.write().await;
        cache.remove(db);
        drop(cache);
        self.pool.drop(db).await
    }

    // ─── Collection operations ──────────────────────────────────────────────

    /// Sorted deep copies of `db`'s collection metadata, or `None` if `db` is not
    /// open.
    pub async fn collection_list(&self, db: &str) -> Option<Vec<CollectionMetadata>> {
        let cache = self.cache.read().await;
        let per_db = cache.get(db)?;
        let mut entries: Vec<CollectionMetadata> = per_db.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Some(entries)
    }

    pub async fn collection_get(&self, db: &str, coll: &str) -> Option<CollectionMetadata> {
        let cache = self.cache.read().await;
        cache.get(db)?.get(coll).cloned()
    }

    /// Creates `coll` in `db`, auto-creating `db` first. Returns `false` without
    /// error if the collection already exists.
    pub async fn collection_create(&self, db: &str, coll: &str) -> Result<bool> {
        let handle = self.database_get_or_create(db).await?;
        let mut cache = self.cache.write().await;
        let per_db = cache.entry(db.to_string()).or_default();

        if per_db.contains_key(coll) {
            return Ok(false);
        }

        let existing_tables: std::collections::HashSet<String> =
            per_db.values().map(|m| m.table_name.clone()).collect();
        let table_name = mangle_table_name(coll, &existing_tables);

        let table_name_for_create = table_name.clone();
        let create_result = handle
            .exec_blocking(move |conn| {
                conn.execute_batch(&format!(
                    "CREATE TABLE {table_name_for_create} ({DOCUMENT_COLUMN} TEXT NOT NULL CHECK({DOCUMENT_COLUMN} != '')) STRICT"
                ))
                .map_err(Error::from)
            })
            .await;
        if let Err(e) = create_result {
            return Err(e);
        }

        let meta_table = metadata_table_name();
        let insert_name = coll.to_string();
        let insert_table_name = table_name.clone();
        let insert_result = handle
            .exec_blocking(move |conn| {
                conn.execute(
                    &format!("INSERT INTO {meta_table} (name, table_name, settings) VALUES (?1, ?2, '{{}}')"),
                    rusqlite::params![insert_name, insert_table_name],
                )
                .map_err(Error::from)
            })
            .await;
        if let Err(e) = insert_result {
            let drop_table_name = table_name.clone();
            let _ = handle
                .exec_blocking(move |conn| {
                    conn.execute_batch(&format!("DROP TABLE {drop_table_name}"))
                        .map_err(Error::from)
                })
                .await;
            return Err(e);
        }

        per_db.insert(
            coll.to_string(),
            CollectionMetadata {
                name: coll.to_string(),
                table_name: table_name.clone(),
                settings: Settings::default(),
            },
        );

        let default_index = IndexSpec {
            name: DEFAULT_INDEX_NAME.to_string(),
            key: vec![IndexKeyPart {
                field: ID_FIELD.to_string(),
                descending: false,
            }],
            unique: true,
        };
        if let Err(e) = create_indexes_locked(&handle, per_db, coll, vec![default_index]).await {
            drop_collection_locked(&handle, per_db, coll).await;
            return Err(e);
        }

        metrics::set_collection_count(db, per_db.len());
        info!(component = "registry", db, collection = coll, operation = "collection_create", "collection created");
        Ok(true)
    }

    /// Deletes the metadata row and physical table for `coll`, if both `db` and
    /// `coll` exist. Returns `false` without error if either is absent.
    pub async fn collection_drop(&self, db: &str, coll: &str) -> Result<bool> {
        let handle = match self.pool.get_existing(db).await {
            Some(h) => h,
            None => return Ok(false),
        };
        let mut cache = self.cache.write().await;
        let per_db = match cache.get_mut(db) {
            Some(p) => p,
            None => return Ok(false),
        };
        if !per_db.contains_key(coll) {
            return Ok(false);
        }

        drop_collection_locked(&handle, per_db, coll).await;
        metrics::set_collection_count(db, per_db.len());
        info!(component = "registry", db, collection = coll, operation = "collection_drop", "collection dropped");
        Ok(true)
    }

    /// Renames `old_name` to `new_name`, keyed internally by the stable
    /// `table_name` so renames survive even if issued back to back.
    pub async fn collection_rename(&self, db: &str, old_name: &str, new_name: &str) -> Result<bool> {
        let handle = match self.pool.get_existing(db).await {
            Some(h) => h,
            None => return Ok(false),
        };
        let mut cache = self.cache.write().await;
        let per_db = match cache.get_mut(db) {
            Some(p) => p,
            None => return Ok(false),
        };
        let Some(meta) = per_db.get(old_name).cloned() else {
            return Ok(false);
        };

        let meta_table = metadata_table_name();
        let table_name = meta.table_name.clone();
        let new_name_owned = new_name.to_string();
        handle
            .exec_blocking(move |conn| {
                conn.execute(
                    &format!("UPDATE {meta_table} SET name = ?1 WHERE table_name = ?2"),
                    rusqlite::params![new_name_owned, table_name],
                )
                .map_err(Error::from)
            })
            .await?;

        per_db.remove(old_name);
        per_db.insert(
            new_name.to_string(),
            CollectionMetadata {
                name: new_name.to_string(),
                ..meta
            },
        );
        info!(component = "registry", db, old_name, new_name, operation = "collection_rename", "collection renamed");
        Ok(true)
    }

    // ─── Index operations ───────────────────────────────────────────────────

    /// Creates `indexes` on `coll`, auto-creating the collection first if it does
    /// not exist yet.
    pub async fn indexes_create(&self, db: &str, coll: &str, indexes: Vec<IndexSpec>) -> Result<()> {
        if self.collection_get(db, coll).await.is_none() {
            self.collection_create(db, coll).await?;
        }
        let handle = self
            .pool
            .get_existing(db)
            .await
            .ok_or_else(|| Error::DatabaseDoesNotExist(db.to_string()))?;

        let mut cache = self.cache.write().await;
        let per_db = cache
            .get_mut(db)
            .ok_or_else(|| Error::DatabaseDoesNotExist(db.to_string()))?;

        create_indexes_locked(&handle, per_db, coll, indexes).await
    }

    /// Drops the named indexes on `coll`.
    pub async fn indexes_drop(&self, db: &str, coll: &str, names: &[String]) -> Result<()> {
        let handle = self
            .pool
            .get_existing(db)
            .await
            .ok_or_else(|| Error::DatabaseDoesNotExist(db.to_string()))?;

        let mut cache = self.cache.write().await;
        let per_db = cache
            .get_mut(db)
            .ok_or_else(|| Error::DatabaseDoesNotExist(db.to_string()))?;
        let meta = per_db
            .get_mut(coll)
            .ok_or_else(|| Error::CollectionDoesNotExist(db.to_string(), coll.to_string()))?;

        let table_name = meta.table_name.clone();
        for name in names {
            let index_name = format!("{table_name}_{name}");
            handle
                .exec_blocking(move |conn| {
                    conn.execute_batch(&format!("DROP INDEX {index_name}"))
                        .map_err(Error::from)
                })
                .await?;
            meta.settings.indexes.retain(|idx| &idx.name != name);
        }

        persist_settings(&handle, &table_name, &meta.settings).await
    }
}

/// Internal index-create path, reused by `collection_create`'s default `_id`
/// index and by the public `indexes_create`. Assumes the caller already holds
/// the cache write lock (`per_db`) for the duration.
async fn create_indexes_locked(
    handle: &DbHandle,
    per_db: &mut HashMap<String, CollectionMetadata>,
    coll: &str,
    indexes: Vec<IndexSpec>,
) -> Result<()> {
    let meta = per_db
        .get(coll)
        .ok_or_else(|| Error::Internal(format!("collection {coll} vanished from cache mid-operation")))?
        .clone();

    let mut created_names = Vec::new();
    for index in &indexes {
        if meta.settings.indexes.iter().any(|existing| existing.name == index.name) {
            continue;
        }

        let columns: Vec<String> = index
            .key
            .iter()
            .map(|part| {
                let expr = format!("{DOCUMENT_COLUMN}->'$.{}'", part.field);
                if part.descending {
                    format!("{expr} DESC")
                } else {
                    expr
                }
            })
            .collect();
        let unique_kw = if index.unique { "UNIQUE " } else { "" };
        let sql_index_name = format!("{}_{}", meta.table_name, index.name);
        let table_name = meta.table_name.clone();
        let sql = format!(
            "CREATE {unique_kw}INDEX {sql_index_name} ON {table_name} ({cols})",
            cols = columns.join(", ")
        );

        let result = handle
            .exec_blocking(move |conn| conn.execute_batch(&sql).map_err(Error::from))
            .await;
        if let Err(e) = result {
            for rollback_index_name in created_names.iter().rev() {
                let drop_sql = format!("DROP INDEX {rollback_index_name}");
                let _ = handle
                    .exec_blocking(move |conn| conn.execute_batch(&drop_sql).map_err(Error::from))
                    .await;
            }
            return Err(e);
        }
        created_names.push(sql_index_name);
    }

    let meta_entry = per_db
        .get_mut(coll)
        .ok_or_else(|| Error::Internal(format!("collection {coll} vanished from cache mid-operation")))?;
    for index in indexes {
        if !meta_entry.settings.indexes.iter().any(|existing| existing.name == index.name) {
            meta_entry.settings.indexes.push(index);
        }
    }
    let settings = meta_entry.settings.clone();
    let table_name = meta_entry.table_name.clone();

    persist_settings(handle, &table_name, &settings).await
}

/// Internal collection-drop path, reused by the public `collection_drop` and by
/// `collection_create`'s rollback-on-index-failure. Mirrors the pool's own
/// `drop`: SQL failures here are logged rather than propagated, since by the time
/// this runs the cache entry is already gone and there is no partial state left
/// to report back to the caller.
async fn drop_collection_locked(handle: &DbHandle, per_db: &mut HashMap<String, CollectionMetadata>, coll: &str) {
    let Some(meta) = per_db.remove(coll) else {
        return;
    };
    let meta_table = metadata_table_name();
    let name = meta.name.clone();
    let delete_result = handle
        .exec_blocking(move |conn| {
            conn.execute(&format!("DELETE FROM {meta_table} WHERE name = ?1"), rusqlite::params![name])
                .map_err(Error::from)
        })
        .await;
    if let Err(e) = delete_result {
        tracing::warn!(collection = coll, error = %e, "failed to delete metadata row during collection drop");
    }

    let table_name = meta.table_name.clone();
    let drop_result = handle
        .exec_blocking(move |conn| {
            conn.execute_batch(&format!("DROP TABLE {table_name}")).map_err(Error::from)
        })
        .await;
    if let Err(e) = drop_result {
        tracing::warn!(collection = coll, error = %e, "failed to drop physical table during collection drop");
    }
}

async fn persist_settings(handle: &DbHandle, table_name: &str, settings: &Settings) -> Result<()> {
    let meta_table = metadata_table_name();
    let settings_json = settings.to_json()?;
    let table_name_owned = table_name.to_string();
    handle
        .exec_blocking(move |conn| {
            conn.execute(
                &format!("UPDATE {meta_table} SET settings = ?1 WHERE table_name = ?2"),
                rusqlite::params![settings_json, table_name_owned],
            )
            .map_err(Error::from)
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_registry() -> (Registry, TempDir) {
        let dir = TempDir::new().unwrap();
        let raw = format!("file:{}/", dir.path().display());
        let uri = BackendUri::parse(&raw).unwrap();
        (Registry::open(uri).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn create_list_drop_lifecycle() {
        let (registry, _dir) = open_registry().await;
        registry.database_get_or_create("db1").await.unwrap();
        assert!(registry.collection_create("db1", "testDB1").await.unwrap());
        assert!(registry.collection_create("db1", "testDB2").await.unwrap());
        assert!(registry.collection_create("db1", "testDB3").await.unwrap());

        let names: Vec<String> = registry
            .collection_list("db1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["testDB1".to_string(), "testDB2".to_string(), "testDB3".to_string()]);

        assert!(registry.collection_drop("db1", "testDB2").await.unwrap());
        let names: Vec<String> = registry
            .collection_list("db1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["testDB1".to_string(), "testDB3".to_string()]);
    }

    #[tokio::test]
    async fn create_is_idempotent_returning_false() {
        let (registry, _dir) = open_registry().await;
        assert!(registry.collection_create("db1", "orders").await.unwrap());
        assert!(!registry.collection_create("db1", "orders").await.unwrap());
    }

    #[tokio::test]
    async fn default_id_index_is_created() {
        let (registry, _dir) = open_registry().await;
        registry.collection_create("db1", "orders").await.unwrap();
        let meta = registry.collection_get("db1", "orders").await.unwrap();
        assert!(meta
            .settings
            .indexes
            .iter()
            .any(|idx| idx.name == DEFAULT_INDEX_NAME && idx.unique));
    }

    #[tokio::test]
    async fn collision_safe_table_names() {
        let (registry, _dir) = open_registry().await;
        for name in ["Foo", "foo", "FOO"] {
            assert!(registry.collection_create("db1", name).await.unwrap());
        }
        let metas = registry.collection_list("db1").await.unwrap();
        let table_names: std::collections::HashSet<String> = metas.iter().map(|m| m.table_name.clone()).collect();
        assert_eq!(table_names.len(), 3);
    }

    #[tokio::test]
    async fn rename_moves_cache_entry_and_persists() {
        let (registry, _dir) = open_registry().await;
        registry.collection_create("db1", "old").await.unwrap();
        assert!(registry.collection_rename("db1", "old", "new").await.unwrap());
        assert!(registry.collection_get("db1", "old").await.is_none());
        assert!(registry.collection_get("db1", "new").await.is_some());
    }

    #[tokio::test]
    async fn indexes_create_rolls_back_partial_failure() {
        let (registry, _dir) = open_registry().await;
        registry.collection_create("db1", "orders").await.unwrap();

        let ok_index = IndexSpec {
            name: "by_status".to_string(),
            key: vec![IndexKeyPart { field: "status".to_string(), descending: false }],
            unique: false,
        };
        let duplicate_name_index = IndexSpec {
            name: DEFAULT_INDEX_NAME.to_string(),
            key: vec![IndexKeyPart { field: "other".to_string(), descending: false }],
            unique: true,
        };

        // The second index reuses the already-existing `_id_` name, so it is
        // skipped rather than failed; this exercises the "already present by
        // name" branch rather than rollback, since forcing a genuine SQL failure
        // requires corrupting the table out from under the registry.
        registry
            .indexes_create("db1", "orders", vec![ok_index, duplicate_name_index])
            .await
            .unwrap();

        let meta = registry.collection_get("db1", "orders").await.unwrap();
        assert!(meta.settings.indexes.iter().any(|i| i.name == "by_status"));
    }

    #[tokio::test]
    async fn open_skips_a_foreign_sqlite_file_instead_of_failing() {
        let dir = TempDir::new().unwrap();
        let foreign_path = dir.path().join("foreign.sqlite");
        {
            let conn = rusqlite::Connection::open(&foreign_path).unwrap();
            conn.execute_batch("CREATE TABLE unrelated (x INTEGER)").unwrap();
        }

        let raw = format!("file:{}/", dir.path().display());
        let uri = BackendUri::parse(&raw).unwrap();
        let registry = Registry::open(uri).await.unwrap();
        assert!(!registry.database_list().await.contains(&"foreign".to_string()));
        assert!(registry.collection_list("foreign").await.is_none());
    }

    #[tokio::test]
    async fn reopen_after_close_preserves_collections() {
        let dir = TempDir::new().unwrap();
        let raw = format!("file:{}/", dir.path().display());
        {
            let uri = BackendUri::parse(&raw).unwrap();
            let registry = Registry::open(uri).await.unwrap();
            registry.collection_create("db1", "orders").await.unwrap();
        }
        let uri = BackendUri::parse(&raw).unwrap();
        let registry = Registry::open(uri).await.unwrap();
        let names: Vec<String> = registry
            .collection_list("db1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["orders".to_string()]);
    }
}
