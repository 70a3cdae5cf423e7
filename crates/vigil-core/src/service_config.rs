//! Shallow view of the managed service's own configuration.
//!
//! The config file is treated as opaque JSON: vigil validates
//! well-formedness and extracts only the channel list and the primary
//! model identifier, which the snapshot/verify pipeline diffs across
//! upgrades. No schema validation happens here.

use std::path::Path;

use serde_json::Value;
use thiserror::Error;

/// Failure to read or parse the service configuration.
#[derive(Error, Debug)]
pub enum ServiceConfigError {
    #[error("service config not found at {0}")]
    Missing(String),

    #[error("service config is not valid JSON: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("failed to read service config: {0}")]
    Io(#[from] std::io::Error),
}

/// Channel and model identifiers derived from the service config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfigView {
    /// Configured chat channels, sorted. Entries may be plain strings or
    /// objects carrying a `name` field.
    pub channels: Vec<String>,
    /// Primary model identifier (`model`, falling back to `primary_model`).
    pub primary_model: Option<String>,
}

impl ServiceConfigView {
    /// Load and shallow-parse the config file.
    pub fn load(path: &Path) -> Result<Self, ServiceConfigError> {
        if !path.exists() {
            return Err(ServiceConfigError::Missing(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)?;
        Ok(Self::from_value(&value))
    }

    /// Extract the view from already-parsed JSON.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let mut channels: Vec<String> = value
            .get("channels")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| match entry {
                        Value::String(s) => Some(s.clone()),
                        Value::Object(map) => map
                            .get("name")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        channels.sort();
        channels.dedup();

        let primary_model = value
            .get("model")
            .or_else(|| value.get("primary_model"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            channels,
            primary_model,
        }
    }

    /// Whether the Telegram channel is configured at all.
    #[must_use]
    pub fn telegram_configured(&self) -> bool {
        self.channels.iter().any(|c| c.eq_ignore_ascii_case("telegram"))
    }
}
