//! Engine configuration
//!
//! JSON file, every field optional (`#[serde(default)]`).
//!
//! Lookup priority for [`EngineConfig::locate`]:
//! 1. explicit path from the host
//! 2. `MEDIACORE_CONFIG` environment variable
//! 3. built-in defaults

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::packet_reader::BUFFER_LENGTH_MAX;
use crate::entities::{ContainerConfig, MediaType};

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "MEDIACORE_CONFIG";

/// What the frame decoder produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputMode {
    /// Materialized blocks for the renderer (audio and video only)
    #[default]
    Blocks,
    /// Raw frames staged for the host to drain with `read_frames`
    Frames,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio_block_capacity: usize,
    pub video_block_capacity: usize,
    /// Per-type staging capacity in `Frames` mode
    pub frame_buffer_capacity: usize,
    /// Minimum interval between worker cycle starts
    pub cycle_period_ms: u64,
    pub output_mode: OutputMode,
    /// Queued-bytes ceiling for network sources
    pub network_buffer_max: u64,
    /// How long seek waits for workers to reach a cycle boundary
    pub pause_timeout_ms: u64,
    /// Packet reads allowed while refilling after a seek
    pub seek_max_reads: usize,
    /// Passed to the container factory; source resolution may fill in a format
    pub container: ContainerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audio_block_capacity: 24,
            video_block_capacity: 12,
            frame_buffer_capacity: 25,
            cycle_period_ms: 15,
            output_mode: OutputMode::Blocks,
            network_buffer_max: BUFFER_LENGTH_MAX,
            pause_timeout_ms: 500,
            seek_max_reads: 4096,
            container: ContainerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("invalid engine config JSON")?;
        Ok(config.validated())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_json(&json)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Explicit path, then `MEDIACORE_CONFIG`, then defaults
    pub fn locate(explicit: Option<PathBuf>) -> Result<Self> {
        let path = explicit.or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));
        match path {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// `MEDIACORE_CONFIG` if set, else defaults
    pub fn from_env() -> Result<Self> {
        Self::locate(None)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize engine config")
    }

    /// Clamp zero capacities/periods up to 1
    pub fn validated(mut self) -> Self {
        for (name, value) in [
            ("audio_block_capacity", &mut self.audio_block_capacity),
            ("video_block_capacity", &mut self.video_block_capacity),
            ("frame_buffer_capacity", &mut self.frame_buffer_capacity),
            ("seek_max_reads", &mut self.seek_max_reads),
        ] {
            if *value == 0 {
                warn!("EngineConfig: {} = 0, using 1", name);
                *value = 1;
            }
        }
        if self.cycle_period_ms == 0 {
            warn!("EngineConfig: cycle_period_ms = 0, using 1");
            self.cycle_period_ms = 1;
        }
        self
    }

    pub fn block_capacity(&self, media_type: MediaType) -> usize {
        match media_type {
            MediaType::Audio => self.audio_block_capacity,
            MediaType::Video => self.video_block_capacity,
            _ => self.frame_buffer_capacity,
        }
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_millis(self.cycle_period_ms)
    }

    pub fn pause_timeout(&self) -> Duration {
        Duration::from_millis(self.pause_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{ "video_block_capacity": 32, "output_mode": "Frames" }"#).unwrap();
        assert_eq!(config.video_block_capacity, 32);
        assert_eq!(config.output_mode, OutputMode::Frames);
        assert_eq!(config.audio_block_capacity, 24);
        assert_eq!(config.network_buffer_max, 16 * 1024 * 1024);
    }

    #[test]
    fn test_zero_values_clamped() {
        let config = EngineConfig::from_json(r#"{ "audio_block_capacity": 0, "cycle_period_ms": 0 }"#).unwrap();
        assert_eq!(config.audio_block_capacity, 1);
        assert_eq!(config.cycle_period(), Duration::from_millis(1));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("mediacore-{}.json", uuid::Uuid::new_v4()));
        let config = EngineConfig {
            seek_max_reads: 100,
            ..Default::default()
        };
        std::fs::write(&path, config.to_json().unwrap()).unwrap();

        let loaded = EngineConfig::locate(Some(path.clone())).unwrap();
        assert_eq!(loaded, config);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = EngineConfig::load(Path::new("/nonexistent/mediacore.json")).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to read config"));
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(EngineConfig::from_json("{ not json").is_err());
    }
}
