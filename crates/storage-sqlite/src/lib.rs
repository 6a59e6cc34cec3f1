//! # storage-sqlite
//!
//! The document-storage backend's SQLite-family connection pool and metadata
//! registry: everything the wire-protocol and command-handler layers need to
//! open logical databases, manage collections and indexes, stream query results,
//! and report storage statistics, without themselves knowing anything about
//! SQLite.
//!
//! ## Layering
//!
//! ```text
//! Registry  (schema authority, global lock)
//!   └── ConnectionPool  (name → DbHandle)
//!         └── DbHandle  (owns connections to one logical database)
//!               └── BackendUri  (parsed, validated configuration)
//! ```
//!
//! `Registry` is the one type external callers hold onto; `ConnectionPool` and
//! `DbHandle` are internal plumbing it owns. `DocumentIterator` and the `stats`
//! functions are built directly on top of a `DbHandle` borrowed from the
//! registry, the same way the original design has the iterator and the stats
//! calculator sit beside — not inside — the registry.
//!
//! ```no_run
//! # async fn example() -> storage_core::Result<()> {
//! use storage_sqlite::registry::Registry;
//! use storage_sqlite::uri::BackendUri;
//!
//! let uri = BackendUri::parse("file:./data/?mode=memory")?;
//! let registry = Registry::open(uri).await?;
//! registry.database_get_or_create("mydb").await?;
//! registry.collection_create("mydb", "orders").await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod constants;
pub mod handle;
pub mod iterator;
pub mod metadata;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod stats;
pub mod uri;

pub use codec::{Document, Value};
pub use config::BackendConfig;
pub use handle::DbHandle;
pub use iterator::DocumentIterator;
pub use metadata::{CollectionMetadata, IndexKeyPart, IndexSpec, Settings};
pub use pool::ConnectionPool;
pub use registry::Registry;
pub use stats::{CollectionStats, DatabaseStats};
pub use uri::BackendUri;
