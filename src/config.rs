//! JSON configuration for the engine and the sort-merge writer.
//!
//! ```json
//! {
//!   "execution": { "runner": "multi_threaded", "num_threads": 4, "chunk_size": 512 },
//!   "sort_merge": { "buffer_size": 10000, "null_placement": "first" }
//! }
//! ```
//!
//! Every execution field is optional and falls back to [`ExecutionOptions::default`]. The
//! sort-merge section is optional as a whole, but when present `null_placement` is required.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::execution::ExecutionOptions;
use crate::sort::SortMergeOptions;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub execution: ExecutionOptions,
    pub sort_merge: Option<SortMergeOptions>,
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading engine config");
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.execution
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if let Some(sort) = &self.sort_merge {
            sort.validate().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }
}
