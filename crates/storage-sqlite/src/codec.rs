//! Document encoding: the closed set of value kinds the backend stores, and the
//! JSON-ish on-disk representation written to the document column.
//!
//! The wire-protocol and command-handler layers are out of scope here; this codec
//! exists only so the pool, registry, iterator, and stats subsystems have a
//! concrete payload to move through SQL without depending on an external crate for
//! the BSON-ish type system.

use base64::Engine as _;
use serde_json::{Map, Value as Json};
use storage_core::{Error, Result};

/// One field value. Kinds that don't map onto a bare JSON scalar round-trip
/// through a tagged object, following the same convention MongoDB's own
/// Extended JSON uses (`$oid`, `$binary`, `$date`, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Double(f64),
    String(String),
    Document(Document),
    Array(Vec<Value>),
    Binary(Vec<u8>),
    ObjectId([u8; 12]),
    Bool(bool),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    Null,
    Int32(i32),
    Int64(i64),
    /// Internal MongoDB timestamp (seconds, ordinal), packed as a single `u64`.
    Timestamp(u64),
    /// IEEE-754 decimal128, kept as its canonical decimal string; the backend
    /// never performs arithmetic on it.
    Decimal128(String),
}

/// A document: an ordered sequence of (field, value) pairs. Field order is
/// preserved rather than collapsed into a map, matching how the documents this
/// backend stores are defined upstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.fields.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_id(&self) -> Option<&Value> {
        self.get(crate::constants::ID_FIELD)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.fields.iter()
    }

    pub fn to_json_text(&self) -> Result<String> {
        serde_json::to_string(&document_to_json(self)).map_err(Error::from)
    }

    pub fn from_json_text(text: &str) -> Result<Self> {
        let parsed: Json = serde_json::from_str(text)?;
        match parsed {
            Json::Object(map) => Ok(json_to_document(map)),
            _ => Err(Error::Serialization(
                "document column did not decode to a JSON object".to_string(),
            )),
        }
    }
}

fn document_to_json(doc: &Document) -> Json {
    let mut map = Map::new();
    for (key, value) in &doc.fields {
        map.insert(key.clone(), value_to_json(value));
    }
    Json::Object(map)
}

fn json_to_document(map: Map<String, Json>) -> Document {
    let mut doc = Document::new();
    for (key, value) in map {
        doc.insert(key, json_to_value(value));
    }
    doc
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Double(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::String(s) => Json::String(s.clone()),
        Value::Document(doc) => document_to_json(doc),
        Value::Array(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Binary(bytes) => tagged("$binary", Json::String(base64::engine::general_purpose::STANDARD.encode(bytes))),
        Value::ObjectId(id) => tagged("$oid", Json::String(hex::encode(id))),
        Value::Bool(b) => Json::Bool(*b),
        Value::DateTime(ms) => tagged("$date", Json::Number((*ms).into())),
        Value::Null => Json::Null,
        Value::Int32(i) => Json::Number((*i).into()),
        Value::Int64(i) => tagged("$numberLong", Json::String(i.to_string())),
        Value::Timestamp(t) => tagged("$timestamp", Json::Number((*t).into())),
        Value::Decimal128(s) => tagged("$numberDecimal", Json::String(s.clone())),
    }
}

fn tagged(tag: &str, inner: Json) -> Json {
    let mut map = Map::new();
    map.insert(tag.to_string(), inner);
    Json::Object(map)
}

fn json_to_value(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                    Value::Int32(i as i32)
                } else {
                    Value::Int64(i)
                }
            } else {
                Value::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Array(items.into_iter().map(json_to_value).collect()),
        Json::Object(mut map) => {
            if map.len() == 1 {
                if let Some(tagged) = decode_tagged(&mut map) {
                    return tagged;
                }
            }
            Value::Document(json_to_document(map))
        }
    }
}

fn decode_tagged(map: &mut Map<String, Json>) -> Option<Value> {
    if let Some(Json::String(s)) = map.get("$oid") {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 12] = bytes.try_into().ok()?;
        return Some(Value::ObjectId(arr));
    }
    if let Some(Json::String(s)) = map.get("$binary") {
        let bytes = base64::engine::general_purpose::STANDARD.decode(s).ok()?;
        return Some(Value::Binary(bytes));
    }
    if let Some(Json::Number(n)) = map.get("$date") {
        return n.as_i64().map(Value::DateTime);
    }
    if let Some(Json::String(s)) = map.get("$numberLong") {
        return s.parse::<i64>().ok().map(Value::Int64);
    }
    if let Some(Json::Number(n)) = map.get("$timestamp") {
        return n.as_u64().map(Value::Timestamp);
    }
    if let Some(Json::String(s)) = map.get("$numberDecimal") {
        return Some(Value::Decimal128(s.clone()));
    }
    None
}
