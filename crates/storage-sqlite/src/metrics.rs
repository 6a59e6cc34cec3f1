//! Prometheus gauges the pool and registry update as databases/collections come
//! and go. The scrape endpoint itself is out of scope here (see the
//! command-handler layer); this module only owns registration and updates
//! against the process-default registry, the same pattern the wire layer's own
//! dekaf-style metrics modules use.

use lazy_static::lazy_static;
use prometheus::{GaugeVec, Opts};

const NAMESPACE: &str = "ferretdb";
const SUBSYSTEM: &str = "sqlite";

lazy_static! {
    /// Number of open databases in the pool/registry.
    static ref DATABASES: GaugeVec = GaugeVec::new(
        Opts::new("databases", "Number of open logical databases").namespace(NAMESPACE).subsystem(SUBSYSTEM),
        &[],
    )
    .expect("metric description is valid");

    /// Number of collections per open database.
    static ref COLLECTIONS: GaugeVec = GaugeVec::new(
        Opts::new("collections", "Number of collections in a database").namespace(NAMESPACE).subsystem(SUBSYSTEM),
        &["db"],
    )
    .expect("metric description is valid");
}

/// Registers the backend's gauges with `registry`. Call once per process; the
/// command-handler layer owns the scrape HTTP endpoint.
pub fn register(registry: &prometheus::Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(DATABASES.clone()))?;
    registry.register(Box::new(COLLECTIONS.clone()))?;
    Ok(())
}

pub fn set_database_count(count: usize) {
    DATABASES.with_label_values(&[]).set(count as f64);
}

pub fn set_collection_count(db: &str, count: usize) {
    COLLECTIONS.with_label_values(&[db]).set(count as f64);
}

pub fn remove_database(db: &str) {
    let _ = COLLECTIONS.remove_label_values(&[db]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauges_accept_updates_without_panicking() {
        set_database_count(3);
        set_collection_count("db1", 7);
        remove_database("db1");
    }
}
