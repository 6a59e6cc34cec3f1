//! End-to-end exercises of the registry against a real on-disk SQLite directory,
//! covering the scenarios a restart or a concurrent reader/writer would hit.

use storage_sqlite::codec::{Document, Value};
use storage_sqlite::metadata::{IndexKeyPart, IndexSpec};
use storage_sqlite::registry::Registry;
use storage_sqlite::stats::{calculate_collection_stats, calculate_database_stats};
use storage_sqlite::uri::BackendUri;
use tempfile::TempDir;

async fn open_registry(dir: &TempDir) -> Registry {
    let raw = format!("file:{}/", dir.path().display());
    let uri = BackendUri::parse(&raw).unwrap();
    Registry::open(uri).await.unwrap()
}

#[tokio::test]
async fn full_database_and_collection_lifecycle() {
    let dir = TempDir::new().unwrap();
    let registry = open_registry(&dir).await;

    registry.database_get_or_create("db1").await.unwrap();
    assert_eq!(registry.database_list().await, vec!["db1".to_string()]);

    for name in ["testDB1", "testDB2", "testDB3"] {
        assert!(registry.collection_create("db1", name).await.unwrap());
    }

    let dropped = registry.database_drop("db1").await.unwrap();
    assert!(dropped);
    assert!(registry.database_list().await.is_empty());
}

#[tokio::test]
async fn survives_restart_with_indexes_intact() {
    let dir = TempDir::new().unwrap();
    let raw = format!("file:{}/", dir.path().display());

    {
        let registry = open_registry(&dir).await;
        registry.collection_create("shop", "orders").await.unwrap();
        registry
            .indexes_create(
                "shop",
                "orders",
                vec![IndexSpec {
                    name: "by_customer".to_string(),
                    key: vec![IndexKeyPart {
                        field: "customerId".to_string(),
                        descending: false,
                    }],
                    unique: false,
                }],
            )
            .await
            .unwrap();
    }

    let uri = BackendUri::parse(&raw).unwrap();
    let reopened = Registry::open(uri).await.unwrap();
    let meta = reopened.collection_get("shop", "orders").await.unwrap();
    let index_names: Vec<String> = meta.settings.indexes.iter().map(|i| i.name.clone()).collect();
    assert!(index_names.contains(&"_id_".to_string()));
    assert!(index_names.contains(&"by_customer".to_string()));
}

#[tokio::test]
async fn inserting_a_document_and_reading_stats() {
    let dir = TempDir::new().unwrap();
    let registry = open_registry(&dir).await;

    registry.collection_create("shop", "orders").await.unwrap();
    let meta = registry.collection_get("shop", "orders").await.unwrap();
    let handle = registry.database_get_existing("shop").await.unwrap();

    let table_name = meta.table_name.clone();
    let mut doc = Document::new();
    doc.insert("_id", Value::Int32(1));
    doc.insert("item", Value::String("widget".to_string()));
    let doc_json = doc.to_json_text().unwrap();

    handle
        .exec_blocking(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {table_name} ({}) VALUES (?1)",
                    storage_sqlite::constants::DOCUMENT_COLUMN
                ),
                rusqlite::params![doc_json],
            )
            .map_err(storage_core::Error::from)
        })
        .await
        .unwrap();

    let coll_stats = calculate_collection_stats(&handle, &meta).await.unwrap();
    assert_eq!(coll_stats.count_rows, 1);

    let all_collections = registry.collection_list("shop").await.unwrap();
    let db_stats = calculate_database_stats(&handle, &all_collections).await.unwrap();
    assert!(db_stats.size_total > 0);
    assert!(db_stats.size_collections > 0);
    assert!(coll_stats.size_tables <= db_stats.size_collections);
}

#[tokio::test]
async fn duplicate_id_violates_the_default_unique_index() {
    let dir = TempDir::new().unwrap();
    let registry = open_registry(&dir).await;

    registry.collection_create("shop", "orders").await.unwrap();
    let meta = registry.collection_get("shop", "orders").await.unwrap();
    let handle = registry.database_get_existing("shop").await.unwrap();
    let table_name = meta.table_name.clone();
    let id_index_name = format!("{table_name}_{}", storage_sqlite::constants::DEFAULT_INDEX_NAME);

    for i in 0..2 {
        let table_name = table_name.clone();
        let id_index_name = id_index_name.clone();
        let mut doc = Document::new();
        doc.insert("_id", Value::Int32(1));
        let doc_json = doc.to_json_text().unwrap();
        let result = handle
            .exec_blocking(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO {table_name} ({}) VALUES (?1)",
                        storage_sqlite::constants::DOCUMENT_COLUMN
                    ),
                    rusqlite::params![doc_json],
                )
                .map_err(|e| storage_core::classify_insert_error(e, "shop", "orders", &id_index_name))
            })
            .await;
        if i == 0 {
            result.unwrap();
        } else {
            match result {
                Err(storage_core::Error::InsertDuplicateId(db, coll)) => {
                    assert_eq!(db, "shop");
                    assert_eq!(coll, "orders");
                }
                other => panic!("expected InsertDuplicateId, got {other:?}"),
            }
        }
    }

    let count: i64 = handle
        .exec_blocking(move |conn| {
            conn.query_row(&format!("SELECT count(*) FROM {table_name}"), [], |row| row.get(0))
                .map_err(storage_core::Error::from)
        })
        .await
        .unwrap();
    assert_eq!(count, 1, "the unique _id index should have rejected the second insert");
}
