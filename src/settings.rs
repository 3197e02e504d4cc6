use crate::ingest::{Transport, DEFAULT_LISTEN_ADDR};
use crate::lanes::DEFAULT_SPACING_RATIO;
use crate::surface::SurfaceRect;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const SETTINGS_FILE: &str = "settings.json";

/// One monitor as reported by whatever enumerates the displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceSettings {
    #[serde(flatten)]
    pub rect: SurfaceRect,
    /// Hidden surfaces skip new spawns until shown again.
    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl SurfaceSettings {
    pub fn new(rect: SurfaceRect) -> Self {
        Self {
            rect,
            visible: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Address the ingestion listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub transport: Transport,
    /// When enabled the application initialises the logger at debug level.
    #[serde(default)]
    pub debug_logging: bool,
    /// Optional file that receives a copy of the log output.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Multiplier for the gap between lanes.
    #[serde(default = "default_spacing_ratio")]
    pub lane_spacing_ratio: f64,
    /// Delay between animation frames in milliseconds.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_surfaces")]
    pub surfaces: Vec<SurfaceSettings>,
}

fn default_visible() -> bool {
    true
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_spacing_ratio() -> f64 {
    DEFAULT_SPACING_RATIO
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_surfaces() -> Vec<SurfaceSettings> {
    vec![SurfaceSettings::new(SurfaceRect::new(0, 0, 1920, 1080))]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            transport: Transport::default(),
            debug_logging: false,
            log_file: None,
            lane_spacing_ratio: default_spacing_ratio(),
            frame_interval_ms: default_frame_interval_ms(),
            surfaces: default_surfaces(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn monitors(&self) -> Vec<SurfaceRect> {
        self.surfaces.iter().map(|s| s.rect).collect()
    }
}
