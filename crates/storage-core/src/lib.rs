//! # storage-core
//!
//! Shared error types and structured-logging conventions for the document-storage
//! backend crates.
//!
//! This crate provides the foundational error type and the field-name constants that
//! every other storage crate logs through, so log aggregation tools can query by
//! standardized field names across the pool, registry, iterator, and stats
//! subsystems.

pub mod error;
pub mod logging;

pub use error::{classify_insert_error, Error, Result};
