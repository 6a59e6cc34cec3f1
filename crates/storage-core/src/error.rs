//! Error types for the document-storage backend.

use thiserror::Error;

/// Result type alias using the backend's `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type shared by the pool, registry, iterator, and stats subsystems.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested logical database is not open and the operation did not request
    /// creation.
    #[error("database does not exist: {0}")]
    DatabaseDoesNotExist(String),

    /// The requested collection does not exist in the given database.
    #[error("collection does not exist: {0}.{1}")]
    CollectionDoesNotExist(String, String),

    /// `CollectionCreate` was asked to create a collection that already exists.
    #[error("collection already exists: {0}.{1}")]
    CollectionAlreadyExists(String, String),

    /// Insertion failed because a document with the same `_id` already exists.
    #[error("duplicate key error: _id already exists in {0}.{1}")]
    InsertDuplicateId(String, String),

    /// The backend URI failed validation (see `storage_sqlite::uri` for the fixed
    /// rejection messages this wraps).
    #[error("invalid backend configuration: {0}")]
    Config(String),

    /// The underlying SQL engine returned an error that does not map to one of the
    /// classified conditions above.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Document encoding/decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem operation failed (directory stat, file removal, glob).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task that carried out a SQL operation was cancelled before
    /// producing a result.
    #[error("operation was cancelled")]
    Cancelled,

    /// The query iterator has been exhausted or closed; returned by every `next()`
    /// call after the first terminal condition (end of rows, error, or cancellation).
    #[error("iterator is done")]
    IteratorDone,

    /// Catch-all for conditions that are not expected to occur given the registry's
    /// locking discipline; surfacing them as errors (instead of panicking) keeps
    /// call sites uniform.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Classifies an insert failure: a unique-constraint violation on `index_name`
/// (the physical index backing a collection's `_id` field) becomes
/// `InsertDuplicateId`; everything else propagates as a plain `Database` error.
///
/// `rusqlite` only distinguishes *which* index a `UNIQUE` violation hit through
/// the error message text (SQLite itself reports `"UNIQUE constraint failed:
/// index '<name>'"` for expression indexes), so `index_name` is matched against
/// that message rather than against any structured field.
pub fn classify_insert_error(err: rusqlite::Error, db: &str, coll: &str, index_name: &str) -> Error {
    if is_unique_violation_on(&err, index_name) {
        return Error::InsertDuplicateId(db.to_string(), coll.to_string());
    }
    Error::from(err)
}

fn is_unique_violation_on(err: &rusqlite::Error, index_name: &str) -> bool {
    let rusqlite::Error::SqliteFailure(info, message) = err else {
        return false;
    };
    let is_unique_constraint = info.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        || info.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY;
    is_unique_constraint && message.as_deref().is_some_and(|m| m.contains(index_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_database_does_not_exist() {
        let err = Error::DatabaseDoesNotExist("db1".to_string());
        assert_eq!(err.to_string(), "database does not exist: db1");
    }

    #[test]
    fn test_error_display_collection_does_not_exist() {
        let err = Error::CollectionDoesNotExist("db1".to_string(), "coll1".to_string());
        assert_eq!(err.to_string(), "collection does not exist: db1.coll1");
    }

    #[test]
    fn test_error_display_collection_already_exists() {
        let err = Error::CollectionAlreadyExists("db1".to_string(), "coll1".to_string());
        assert_eq!(err.to_string(), "collection already exists: db1.coll1");
    }

    #[test]
    fn test_error_display_insert_duplicate_id() {
        let err = Error::InsertDuplicateId("db1".to_string(), "coll1".to_string());
        assert_eq!(
            err.to_string(),
            "duplicate key error: _id already exists in db1.coll1"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("path must end in \"/\"".to_string());
        assert_eq!(
            err.to_string(),
            "invalid backend configuration: path must end in \"/\""
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("expected Serialization error"),
        }
    }

    #[test]
    fn test_result_type_ok() {
        fn get_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(get_result().unwrap(), 42);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        match err {
            Error::Io(_) => {}
            _ => panic!("expected Io error"),
        }
    }

    fn unique_violation(message: &str) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::ConstraintViolation,
                extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
            },
            Some(message.to_string()),
        )
    }

    #[test]
    fn test_classify_insert_error_maps_id_index_violation() {
        let err = unique_violation("UNIQUE constraint failed: index 'orders_1_id_'");
        let classified = classify_insert_error(err, "shop", "orders", "orders_1_id_");
        match classified {
            Error::InsertDuplicateId(db, coll) => {
                assert_eq!(db, "shop");
                assert_eq!(coll, "orders");
            }
            other => panic!("expected InsertDuplicateId, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_insert_error_leaves_other_unique_violations_alone() {
        let err = unique_violation("UNIQUE constraint failed: index 'orders_1_by_email'");
        let classified = classify_insert_error(err, "shop", "orders", "orders_1_id_");
        match classified {
            Error::Database(_) => {}
            other => panic!("expected Database, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_insert_error_leaves_non_constraint_errors_alone() {
        let err = rusqlite::Error::SqliteSingleThreadedMode;
        let classified = classify_insert_error(err, "shop", "orders", "orders_1_id_");
        match classified {
            Error::Database(_) => {}
            other => panic!("expected Database, got {other:?}"),
        }
    }
}
