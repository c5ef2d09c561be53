//! Tunable values for the extraction pipeline.
use crate::common_types::Color;
use serde_derive::{Deserialize, Serialize};

/// Names up to this many bytes go in the short names table.
pub const DEFAULT_NAME_LENGTH_THRESHOLD: usize = 32;
/// Maximal nesting depth we handle. Deeper samples are dropped.
pub const MAX_LEVELS: usize = 16_384;
/// How many pool threads we keep out of caching.
pub const DEFAULT_RESERVED_WORKERS: usize = 1;
/// How many frames of the requested range we look at per tick, at most.
pub const DEFAULT_PROBE_BUDGET: usize = 1024;
/// Color for categories the source did not describe.
pub const DEFAULT_FALLBACK_COLOR: Color = [0.5, 0.5, 0.5, 1.0];

/// First bytes of every job metadata block ("!JOB" in little endian).
pub const METADATA_MAGIC: u32 = 0x424F_4A21;
/// Only metadata version we understand.
pub const METADATA_VERSION: u32 = 1;

/// Settings for the extraction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// names longer than this (in bytes) go in the long names table
    pub name_length_threshold: usize,
    /// maximal number of levels per thread (sizes the reindexer scratch buffers)
    pub max_levels: usize,
    /// color for categories missing in the source
    pub fallback_color: Color,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig {
            name_length_threshold: DEFAULT_NAME_LENGTH_THRESHOLD,
            max_levels: MAX_LEVELS,
            fallback_color: DEFAULT_FALLBACK_COLOR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_use_defaults() {
        let config: ExtractorConfig =
            serde_json::from_str(r#"{"name_length_threshold": 8}"#).unwrap();
        assert_eq!(config.name_length_threshold, 8);
        assert_eq!(config.max_levels, MAX_LEVELS);
        assert_eq!(config.fallback_color, DEFAULT_FALLBACK_COLOR);
    }
}
