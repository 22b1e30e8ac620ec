use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::capture::EffectSettings;

/// Preview request issued at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub width: u32,
    pub height: u32,
    pub enable_audio: bool,
    pub enable_mrc: bool,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        PreviewConfig {
            width: 1280,
            height: 720,
            enable_audio: true,
            enable_mrc: false,
        }
    }
}

/// Synthetic source settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Delay between a sample request and its answer
    pub frame_interval_ms: u64,
    pub sample_size: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        LoopbackConfig {
            frame_interval_ms: 33,
            sample_size: 4096,
        }
    }
}

impl LoopbackConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub preview: PreviewConfig,
    pub effects: EffectSettings,
    pub loopback: LoopbackConfig,

    /// Seconds between health log lines, 0 disables them
    pub health_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            preview: PreviewConfig::default(),
            effects: EffectSettings::default(),
            loopback: LoopbackConfig::default(),
            health_interval_secs: 5,
        }
    }
}

impl BridgeConfig {
    /// Read a JSON config file; absent keys keep their defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Returns a version as specified in Cargo.toml
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
