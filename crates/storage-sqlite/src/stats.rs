//! Statistics calculator: collection/database sizes and counts derived from the
//! engine's own catalog tables, via `ANALYZE` and the `dbstat` virtual table.
//!
//! Row counts are leaf-page cell-count approximations, not exact counts —
//! overflow pages and deleted-but-not-vacuumed rows can skew them. That is
//! intentional; stats commands are not required to return exact counts.

use rusqlite::Connection;
use storage_core::{Error, Result};

use crate::handle::DbHandle;
use crate::metadata::CollectionMetadata;

/// Per-collection size/count figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub count_rows: i64,
    pub count_indexes: i64,
    pub size_indexes: i64,
    pub size_tables: i64,
    pub size_free_storage: i64,
}

/// Whole-database size/count figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub size_total: i64,
    pub size_collections: i64,
    pub size_indexes: i64,
    pub count_collections: i64,
    pub count_indexes: i64,
}

struct ObjectSize {
    name: String,
    pgsize: i64,
    leaf_cells: i64,
}

fn dbstat_sizes(conn: &Connection) -> Result<Vec<ObjectSize>> {
    conn.execute_batch("ANALYZE").map_err(Error::from)?;

    // Per-page rows, not `aggregate = TRUE`: aggregate mode collapses each btree to
    // one summary row with `pagetype` set to NULL, which would make the `pagetype =
    // 'leaf'` filter below never match. Summing `pgsize` per-page still gives the
    // same total per name; `ncell` on leaf pages gives the row-count approximation.
    let mut stmt = conn
        .prepare(
            "SELECT name, SUM(pgsize) AS pgsize, \
             SUM(CASE WHEN pagetype = 'leaf' THEN ncell ELSE 0 END) AS leaf_cells \
             FROM dbstat GROUP BY name",
        )
        .map_err(Error::from)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ObjectSize {
                name: row.get(0)?,
                pgsize: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                leaf_cells: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            })
        })
        .map_err(Error::from)?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(Error::from)?);
    }
    Ok(result)
}

/// Computes stats for one collection: its table's size/row-count, plus the sizes
/// of its indexes (named `<table>_<indexName>` on disk, keyed back to the logical
/// index name for the caller).
pub async fn calculate_collection_stats(handle: &DbHandle, meta: &CollectionMetadata) -> Result<CollectionStats> {
    let table_name = meta.table_name.clone();
    let index_count = meta.settings.indexes.len() as i64;

    handle
        .exec_blocking(move |conn| {
            let sizes = dbstat_sizes(conn)?;
            let mut stats = CollectionStats {
                count_indexes: index_count,
                ..Default::default()
            };

            for obj in &sizes {
                if obj.name == table_name {
                    stats.size_tables += obj.pgsize;
                    stats.count_rows += obj.leaf_cells;
                } else if let Some(rest) = obj.name.strip_prefix(&format!("{table_name}_")) {
                    if !rest.is_empty() {
                        stats.size_indexes += obj.pgsize;
                    }
                }
            }

            let free_pages: i64 = conn.pragma_query_value(None, "freelist_count", |row| row.get(0))?;
            let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
            stats.size_free_storage = free_pages * page_size;

            Ok(stats)
        })
        .await
}

/// Computes whole-database stats across `collections`.
pub async fn calculate_database_stats(handle: &DbHandle, collections: &[CollectionMetadata]) -> Result<DatabaseStats> {
    let table_names: Vec<String> = collections.iter().map(|c| c.table_name.clone()).collect();
    let index_count: i64 = collections.iter().map(|c| c.settings.indexes.len() as i64).sum();

    handle
        .exec_blocking(move |conn| {
            let sizes = dbstat_sizes(conn)?;
            let mut stats = DatabaseStats {
                count_collections: table_names.len() as i64,
                count_indexes: index_count,
                ..Default::default()
            };

            for obj in &sizes {
                stats.size_total += obj.pgsize;
                if table_names.iter().any(|t| t == &obj.name) {
                    stats.size_collections += obj.pgsize;
                } else if table_names
                    .iter()
                    .any(|t| obj.name.starts_with(&format!("{t}_")))
                {
                    stats.size_indexes += obj.pgsize;
                }
            }

            Ok(stats)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Settings;
    use tempfile::TempDir;

    use crate::uri::BackendUri;

    async fn open_handle() -> DbHandle {
        let dir = TempDir::new().unwrap();
        let raw = format!("file:{}/?mode=memory", dir.path().display());
        let uri = BackendUri::parse(&raw).unwrap();
        DbHandle::open(&uri).await.unwrap()
    }

    #[tokio::test]
    async fn stats_are_positive_after_inserting_a_document() {
        let handle = open_handle().await;
        handle
            .exec_blocking(|conn| {
                conn.execute_batch(&format!(
                    "CREATE TABLE orders_1 ({0} TEXT NOT NULL CHECK({0} != '')) STRICT",
                    crate::constants::DOCUMENT_COLUMN
                ))
                .map_err(Error::from)?;
                conn.execute(
                    &format!(
                        "INSERT INTO orders_1 ({}) VALUES (?1)",
                        crate::constants::DOCUMENT_COLUMN
                    ),
                    rusqlite::params!["{\"_id\":1}"],
                )
                .map_err(Error::from)?;
                Ok(())
            })
            .await
            .unwrap();

        let meta = CollectionMetadata {
            name: "orders".to_string(),
            table_name: "orders_1".to_string(),
            settings: Settings::default(),
        };

        let coll_stats = calculate_collection_stats(&handle, &meta).await.unwrap();
        assert_eq!(coll_stats.count_rows, 1);

        let db_stats = calculate_database_stats(&handle, std::slice::from_ref(&meta)).await.unwrap();
        assert!(db_stats.size_total > 0);
        assert!(db_stats.size_collections > 0);
        assert!(coll_stats.size_tables <= db_stats.size_collections);
    }
}
