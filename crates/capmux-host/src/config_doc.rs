//! The JSON configuration document at `<base_path>/config/config.json`.
//!
//! `"Host"` holds the serialized [`HostConfig`] for reference; every other key
//! is a provider name whose object is merged onto that provider's config.

use std::fs;
use std::path::Path;

use capmux_core::{CoreError, HostConfig};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::{HostError, Result};

pub const HOST_SECTION: &str = "Host";

/// Reads the document. A missing file is an empty document.
pub fn load(path: &Path) -> Result<Map<String, Value>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config document, using defaults");
            return Ok(Map::new());
        }
        Err(error) => return Err(HostError::Io(error)),
    };

    if raw.trim().is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(HostError::ConfigDocument {
            path: path.to_path_buf(),
            reason: "top level must be a JSON object".to_string(),
        }),
        Err(error) => Err(HostError::ConfigDocument {
            path: path.to_path_buf(),
            reason: error.to_string(),
        }),
    }
}

/// The section for `provider`, if the document has one.
pub fn provider_section<'a>(
    document: &'a Map<String, Value>,
    provider: &str,
) -> capmux_core::Result<Option<&'a Map<String, Value>>> {
    match document.get(provider) {
        None => Ok(None),
        Some(Value::Object(section)) => Ok(Some(section)),
        Some(_) => Err(CoreError::Config {
            field: provider.to_string(),
            reason: "provider section must be a JSON object".to_string(),
        }),
    }
}

/// Builds a document from the host config and each provider's `config()`
/// snapshot.
pub fn render<'a, I>(host: &HostConfig, providers: I) -> Result<Map<String, Value>>
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let mut document = Map::new();
    document.insert(
        HOST_SECTION.to_string(),
        serde_json::to_value(host).map_err(CoreError::from)?,
    );
    for (name, snapshot) in providers {
        let section: Value = serde_json::from_str(&snapshot).map_err(CoreError::from)?;
        document.insert(name.to_string(), section);
    }
    Ok(document)
}

/// Writes `document` unless a file already exists. Returns whether it wrote.
pub fn write_if_absent(path: &Path, document: &Map<String, Value>) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let pretty = serde_json::to_string_pretty(document).map_err(CoreError::from)?;
    fs::write(path, pretty + "\n")?;
    info!(path = %path.display(), "wrote config document");
    Ok(true)
}
