//! Fixed names shared by the metadata registry, the collection tables it creates,
//! and the document codec.

/// Prefix reserved for backend-owned databases/collections; command handlers must
/// refuse externally supplied names that begin with it before they reach the
/// registry (see `reject_reserved_name`).
pub const RESERVED_PREFIX: &str = "_ferretdb_";

/// Prefix the SQL engine itself reserves for internal tables; a mangled table name
/// that collides with it is re-prefixed with an underscore.
pub const SQLITE_RESERVED_PREFIX: &str = "sqlite_";

/// Name of the per-database table that persists the collection directory.
pub fn metadata_table_name() -> String {
    format!("{}collections", RESERVED_PREFIX)
}

/// Name of the single JSON-document column every collection table carries.
pub const DOCUMENT_COLUMN: &str = "_ferretdb_document";

/// Name of the optional integer column capped collections use to expose insertion
/// order.
pub const RECORD_ID_COLUMN: &str = "_ferretdb_record_id";

/// Name of the unique index every collection gets at creation time.
pub const DEFAULT_INDEX_NAME: &str = "_id_";

/// JSON path of the field the default index is built on.
pub const ID_FIELD: &str = "_id";
