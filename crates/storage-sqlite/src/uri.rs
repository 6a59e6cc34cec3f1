//! Backend URI parsing and normalization.
//!
//! The accepted form is `file:<path>[?query]`, written either with an empty
//! authority (`file:///tmp/db/`) or as an opaque reference (`file:./tmp/db/`).
//! Both forms are folded into the same normalized shape so round-tripping through
//! [`BackendUri::to_string`] is stable, which is the one property the pool and the
//! registry depend on when they derive per-database URIs.
//!
//! A hand-rolled splitter is used instead of the `url` crate's own parser: the
//! WHATWG URL algorithm the `url` crate implements special-cases `file:` URLs in
//! ways that don't line up with the opaque/path distinction this contract
//! requires, and query-string handling is delegated to `url::form_urlencoded`
//! (the one part of the crate that fits unmodified).

use std::path::Path;

use storage_core::{Error, Result};

const ALLOWED_SCHEME: &str = "file";
const DEFAULT_PRAGMAS: &[(&str, &str)] = &[
    ("auto_vacuum", "none"),
    ("busy_timeout", "10000"),
    ("journal_mode", "wal"),
];

/// A normalized backend URI: scheme, the symmetric opaque/path slot, and a
/// deterministically ordered query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendUri {
    scheme: String,
    path: String,
    query: Vec<(String, String)>,
}

impl BackendUri {
    /// Parses and validates `raw`, applying the full contract: scheme check, empty
    /// authority, opaque/path symmetry, `cache=shared` rejection, default pragma
    /// injection, trailing-slash requirement, and directory existence.
    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme, rest) = split_scheme(raw)?;

        let (authority, path_or_opaque) = if let Some(stripped) = rest.strip_prefix("//") {
            match stripped.find('/') {
                Some(idx) => (&stripped[..idx], stripped[idx..].to_string()),
                None => (stripped, String::new()),
            }
        } else {
            ("", rest.to_string())
        };

        let (body, query_str) = match path_or_opaque.split_once('?') {
            Some((b, q)) => (b.to_string(), q.to_string()),
            None => (path_or_opaque, String::new()),
        };
        let body = body.split_once('#').map(|(b, _)| b.to_string()).unwrap_or(body);

        if scheme.to_ascii_lowercase() != ALLOWED_SCHEME {
            return Err(Error::Config(format!(
                "expected \"file:\" schema, got {}:",
                scheme
            )));
        }

        if !authority.is_empty() {
            return Err(Error::Config(
                "backend URI must not carry user-info or a host".to_string(),
            ));
        }

        let mut query: Vec<(String, String)> = url::form_urlencoded::parse(query_str.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if query.iter().any(|(k, v)| k == "cache" && v == "shared") {
            return Err(Error::Config("cache=shared is not supported".to_string()));
        }

        inject_default_pragmas(&mut query);
        query.sort();

        if !body.ends_with('/') {
            return Err(Error::Config(format!(
                "database path {:?} must end with a trailing slash",
                body
            )));
        }

        let stat = std::fs::metadata(&body);
        match stat {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                return Err(Error::Config(format!(
                    "{:?} should be an existing directory",
                    body
                )))
            }
        }

        Ok(BackendUri {
            scheme: ALLOWED_SCHEME.to_string(),
            path: body,
            query,
        })
    }

    /// The normalized path, always ending in `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `true` when the `mode=memory` query parameter is present.
    pub fn is_memory(&self) -> bool {
        self.query.iter().any(|(k, v)| k == "mode" && v == "memory")
    }

    /// The `_pragma=name(value)` query entries, parsed into `(name, value)` pairs.
    pub fn pragmas(&self) -> Vec<(String, String)> {
        self.query
            .iter()
            .filter(|(k, _)| k == "_pragma")
            .filter_map(|(_, v)| parse_pragma(v))
            .collect()
    }

    /// Derives the per-database URI by substituting `<dir>/<name>.sqlite` into the
    /// path slot, preserving the query string so PRAGMA defaults are inherited. In
    /// memory mode the path is left untouched since there is no per-database file.
    pub fn for_database(&self, name: &str) -> BackendUri {
        if self.is_memory() {
            return self.clone();
        }
        BackendUri {
            scheme: self.scheme.clone(),
            path: format!("{}{}.sqlite", self.path, name),
            query: self.query.clone(),
        }
    }
}

impl std::fmt::Display for BackendUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.scheme, escape_path(&self.path))?;
        if !self.query.is_empty() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.query.iter())
                .finish();
            write!(f, "?{}", encoded)?;
        }
        Ok(())
    }
}

fn split_scheme(raw: &str) -> Result<(&str, &str)> {
    match raw.find(':') {
        Some(idx) if idx > 0 => Ok((&raw[..idx], &raw[idx + 1..])),
        _ => Err(Error::Config(format!(
            "missing protocol scheme in {:?}",
            raw
        ))),
    }
}

fn escape_path(path: &str) -> String {
    path.replace('?', "%3F").replace('#', "%23")
}

fn parse_pragma(value: &str) -> Option<(String, String)> {
    let open = value.find('(')?;
    if !value.ends_with(')') {
        return None;
    }
    let name = value[..open].to_string();
    let arg = value[open + 1..value.len() - 1].to_string();
    Some((name, arg))
}

fn inject_default_pragmas(query: &mut Vec<(String, String)>) {
    let configured: Vec<String> = query
        .iter()
        .filter(|(k, _)| k == "_pragma")
        .filter_map(|(_, v)| parse_pragma(v).map(|(name, _)| name))
        .collect();

    for (name, value) in DEFAULT_PRAGMAS {
        if !configured.iter().any(|n| n == name) {
            query.push(("_pragma".to_string(), format!("{}({})", name, value)));
        }
    }
}

/// Command-handler boundary helper: rejects names beginning with either reserved
/// prefix. The registry itself does not call this (see module docs on the
/// name-validation boundary); callers constructing databases/collections from
/// external input should.
pub fn reject_reserved_name(name: &str) -> Result<()> {
    if name.starts_with(crate::constants::RESERVED_PREFIX)
        || name.starts_with(crate::constants::SQLITE_RESERVED_PREFIX)
    {
        return Err(Error::Config(format!(
            "name {:?} uses a reserved prefix",
            name
        )));
    }
    Ok(())
}

/// `true` if `path` both exists and is a directory; used by the pool when
/// validating per-database file parents ad hoc (outside the initial parse).
pub fn is_existing_directory(path: &str) -> bool {
    Path::new(path).is_dir()
}
