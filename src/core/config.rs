//! Engine configuration, loadable from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::Error;
use super::types::{DetailLevel, Result};

/// Shared cluster cell configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    /// World units per cluster cell side.
    pub cell_size: i32,
    /// Matrix samples per cluster cell side.
    pub resolution: u32,
    /// Bumped by the host whenever global settings that feed clusters change.
    pub settings_version: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cell_size: 2048,
            resolution: 256,
            settings_version: 0,
        }
    }
}

/// Configuration for the tile generation engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Worker pool capacity (threads actively generating at once).
    pub worker_threads: usize,
    /// World units per tile side.
    pub tile_size: i32,
    /// Matrix samples per tile side for the main pass.
    pub main_resolution: u32,
    /// Matrix samples per tile side for the draft pass.
    pub draft_resolution: u32,
    /// Generate a draft before the main pass.
    pub draft_enabled: bool,
    /// Base seed mixed into every tile.
    pub seed: u64,
    /// How often a blocked waiter re-checks its own stop token (ms).
    pub gate_poll_ms: u64,
    pub cluster: ClusterConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            tile_size: 1000,
            main_resolution: 257,
            draft_resolution: 33,
            draft_enabled: true,
            seed: 12345,
            gate_poll_ms: 20,
            cluster: ClusterConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a JSON string. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject sizes and counts that would leave tiles or cells empty.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.worker_threads >= 1, "worker_threads must be at least 1"),
            (self.tile_size > 0, "tile_size must be positive"),
            (self.main_resolution >= 1, "main_resolution must be at least 1"),
            (self.draft_resolution >= 1, "draft_resolution must be at least 1"),
            (self.cluster.cell_size > 0, "cluster.cell_size must be positive"),
            (self.cluster.resolution >= 1, "cluster.resolution must be at least 1"),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(Error::InvalidConfig(message.to_string())),
            None => Ok(()),
        }
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Matrix resolution for a detail level.
    pub fn resolution(&self, detail: DetailLevel) -> u32 {
        match detail {
            DetailLevel::Draft => self.draft_resolution,
            DetailLevel::Main => self.main_resolution,
        }
    }

    /// Detail levels a tile goes through, in order.
    pub fn detail_levels(&self) -> &'static [DetailLevel] {
        if self.draft_enabled {
            &DetailLevel::ALL
        } else {
            &[DetailLevel::Main]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_json_str(
            r#"{ "worker_threads": 2, "cluster": { "cell_size": 512 } }"#,
        )
        .unwrap();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.cluster.cell_size, 512);
        assert_eq!(config.cluster.resolution, ClusterConfig::default().resolution);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "wrker_threads": 2 }"#).unwrap_err();
        assert!(matches!(err, crate::core::Error::Config(_)));
    }

    fn rejection(json: &str) -> String {
        match EngineConfig::from_json_str(json) {
            Err(crate::core::Error::InvalidConfig(message)) => message,
            other => panic!("expected invalid config for {}, got {:?}", json, other),
        }
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(rejection(r#"{ "cluster": { "cell_size": 0 } }"#).contains("cell_size"));
        assert!(rejection(r#"{ "cluster": { "cell_size": -64 } }"#).contains("cell_size"));
        assert!(rejection(r#"{ "cluster": { "resolution": 0 } }"#).contains("cluster.resolution"));
        assert!(rejection(r#"{ "tile_size": 0 }"#).contains("tile_size"));
        assert!(rejection(r#"{ "tile_size": -1 }"#).contains("tile_size"));
        assert!(rejection(r#"{ "main_resolution": 0 }"#).contains("main_resolution"));
        assert!(rejection(r#"{ "draft_resolution": 0 }"#).contains("draft_resolution"));
        assert!(rejection(r#"{ "worker_threads": 0 }"#).contains("worker_threads"));
    }

    #[test]
    fn test_invalid_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "cluster": {{ "cell_size": 0 }} }}"#).unwrap();

        let err = EngineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, crate::core::Error::InvalidConfig(_)));
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "draft_enabled": false, "tile_size": 500 }}"#).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert!(!config.draft_enabled);
        assert_eq!(config.tile_size, 500);
        assert_eq!(config.detail_levels(), &[DetailLevel::Main]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/nonexistent/terragraph.json").unwrap_err();
        assert!(matches!(err, crate::core::Error::Io(_)));
    }
}
