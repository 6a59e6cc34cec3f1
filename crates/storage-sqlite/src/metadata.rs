//! Collection metadata: the row shape persisted in the reserved per-database
//! table, and the settings blob that carries index definitions.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use storage_core::{Error, Result};

use crate::constants::metadata_table_name;

/// One key part of an index: a JSON field path and its sort direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexKeyPart {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

/// An index definition as persisted in `settings` and as requested by
/// `indexes_create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub key: Vec<IndexKeyPart>,
    #[serde(default)]
    pub unique: bool,
}

/// The decoded `settings` column: currently just the index directory, but kept as
/// its own type so future settings additions don't change `CollectionMetadata`'s
/// shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

impl Settings {
    /// `Value()`: encodes to the JSON text stored in the `settings` column.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }

    /// `Scan(src)`: accepts an empty string as "no settings yet" rather than
    /// failing, since a freshly created collection has not persisted any indexes.
    pub fn from_json(src: &str) -> Result<Self> {
        if src.is_empty() {
            return Ok(Settings::default());
        }
        serde_json::from_str(src).map_err(Error::from)
    }
}

/// One row of the reserved metadata table, plus its logical name used as the
/// cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionMetadata {
    pub name: String,
    pub table_name: String,
    pub settings: Settings,
}

/// Reports whether the reserved metadata table is present in `conn`. A `.sqlite`
/// file discovered on open that lacks this table is not one of this backend's
/// databases and must be left alone rather than treated as an empty one.
pub fn table_exists(conn: &Connection) -> Result<bool> {
    let table = metadata_table_name();
    let count: i64 = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            rusqlite::params![table],
            |row| row.get(0),
        )
        .map_err(Error::from)?;
    Ok(count > 0)
}

/// Creates the reserved metadata table for a freshly opened database. Its
/// presence on open is the signal that a `.sqlite` file belongs to this backend.
pub fn create_metadata_table(conn: &Connection) -> Result<()> {
    let table = metadata_table_name();
    conn.execute_batch(&format!(
        "CREATE TABLE {table} (
            name TEXT NOT NULL UNIQUE CHECK(name != ''),
            table_name TEXT NOT NULL UNIQUE CHECK(table_name != ''),
            settings TEXT NOT NULL CHECK(settings != '')
        ) STRICT"
    ))
    .map_err(Error::from)
}

/// Loads every row of the metadata table into a fresh map, used to populate the
/// registry cache on open.
pub fn load_all(conn: &Connection) -> Result<Vec<CollectionMetadata>> {
    let table = metadata_table_name();
    let mut stmt = conn
        .prepare(&format!("SELECT name, table_name, settings FROM {table}"))
        .map_err(Error::from)?;
    let rows = stmt
        .query_map([], |row| {
            let name: String = row.get(0)?;
            let table_name: String = row.get(1)?;
            let settings: String = row.get(2)?;
            Ok((name, table_name, settings))
        })
        .map_err(Error::from)?;

    let mut result = Vec::new();
    for row in rows {
        let (name, table_name, settings_json) = row.map_err(Error::from)?;
        let settings = Settings::from_json(&settings_json)?;
        result.push(CollectionMetadata {
            name,
            table_name,
            settings,
        });
    }
    Ok(result)
}
