//! Configuration loading: the single place external callers hand this backend a
//! raw URI string and get back something ready to open a [`Registry`] against.
//! File/CLI parsing of the rest of the server's configuration is out of scope;
//! this type's only job is owning the parsed, validated backend URI.
//!
//! [`Registry`]: crate::registry::Registry

use storage_core::Result;

use crate::uri::BackendUri;

/// Backend configuration: a validated [`BackendUri`] plus anything else the
/// storage layer needs at startup that isn't part of the URI contract itself.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    uri: BackendUri,
}

impl BackendConfig {
    /// Parses and validates `raw` (see [`BackendUri::parse`] for the full
    /// contract) into a usable configuration.
    pub fn from_uri_str(raw: &str) -> Result<Self> {
        Ok(BackendConfig {
            uri: BackendUri::parse(raw)?,
        })
    }

    pub fn uri(&self) -> &BackendUri {
        &self.uri
    }

    pub fn is_memory(&self) -> bool {
        self.uri.is_memory()
    }
}
