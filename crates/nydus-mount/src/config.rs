//! nydusd configuration.
//!
//! The configuration is treated as an opaque JSON object. It usually carries
//! backend credentials, so its content is never logged.

use std::fs;
use std::path::Path;

use nydus_common::{NydusError, NydusResult, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Configuration of a nydusd instance.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DaemonConfig(Map<String, Value>);

impl DaemonConfig {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if `value` is not a JSON object.
    pub fn from_value(value: Value) -> NydusResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(NydusError::encoding(
                "parse daemon configuration",
                format!("expected a JSON object, found {}", json_type(&other)),
            )),
        }
    }

    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read and an encoding error if
    /// it is not a JSON object.
    pub fn load(path: &Path) -> NydusResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| NydusError::io(format!("read {}", path.display()), e))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("parse {}", path.display()))?;
        let config = Self::from_value(value).context(path.display())?;

        tracing::debug!(path = %path.display(), keys = config.0.len(), "Loaded daemon configuration");
        Ok(config)
    }

    /// Write the configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> NydusResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| NydusError::io(format!("create {}", parent.display()), e))?;
        }

        let content = serde_json::to_string_pretty(self).context("serialize daemon configuration")?;
        fs::write(path, content).map_err(|e| NydusError::io(format!("write {}", path.display()), e))
    }

    /// Serialize the configuration for the mount helper.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if serialization fails.
    pub fn dump_string(&self) -> NydusResult<String> {
        serde_json::to_string(self).context("serialize daemon configuration")
    }

    /// Look up a top-level key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a top-level key.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }
}

impl std::fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("keys", &self.0.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
