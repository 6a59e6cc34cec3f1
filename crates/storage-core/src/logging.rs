//! Structured logging schema and field name constants for the document-storage
//! backend.
//!
//! All crates use these constants for consistent structured logging fields. This
//! ensures log aggregation tools (Loki, Elasticsearch) can query by standardized
//! field names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (open, create, drop), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-row iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event. Always `"storage"` for this backend.
pub const SUBSYSTEM: &str = "subsystem";

/// Component within the subsystem.
/// Values: "pool", "registry", "iterator", "stats", "uri".
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "open", "get_or_create", "drop", "collection_create", "indexes_create".
pub const OPERATION: &str = "operation";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Logical database name being operated on.
pub const DB: &str = "db";

/// Logical collection name being operated on.
pub const COLLECTION: &str = "collection";

/// Physical SQL table name backing a collection.
pub const TABLE: &str = "table";

/// Index name (logical or physical).
pub const INDEX: &str = "index";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows/documents affected or returned.
pub const ROW_COUNT: &str = "row_count";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of open connections for a handle.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections for a handle.
pub const POOL_IDLE: &str = "pool_idle";

/// Number of callers currently waiting to acquire a connection.
pub const POOL_WAIT_COUNT: &str = "pool_wait_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
