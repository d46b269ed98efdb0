//! Shared configuration types consumed across the MTCNN workspace.
//!
//! These structures provide a common representation for cascade, model, and
//! telemetry settings that can be serialized to disk and reused by the CLI
//! and any embedding application.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Cascade parameters mirroring the classic MTCNN defaults.
///
/// These settings control pyramid construction and per-stage score
/// filtering; they are validated by the detector at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeSettings {
    /// Smallest face size (in pixels) the pyramid should resolve.
    pub min_face_size: u32,
    /// Geometric shrink factor between consecutive pyramid levels.
    pub scale_factor: f32,
    /// Per-stage score thresholds `[t1, t2, t3]`.
    pub thresholds: [f32; 3],
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            min_face_size: 20,
            scale_factor: 0.709,
            thresholds: [0.6, 0.7, 0.7],
        }
    }
}

/// Locations of the three stage networks on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    /// Proposal network (stage 1) ONNX graph.
    pub proposal: String,
    /// Refinement network (stage 2) ONNX graph.
    pub refinement: String,
    /// Output network (stage 3) ONNX graph.
    pub output: String,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            proposal: "models/pnet.onnx".to_string(),
            refinement: "models/rnet.onnx".to_string(),
            output: "models/onet.onnx".to_string(),
        }
    }
}

/// Aligned-crop export parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignSettings {
    /// Margin in pixels added around the detected box before cropping.
    pub margin: u32,
    /// Side length of the square aligned crop.
    pub size: u32,
    /// Whether to pre-whiten crops (zero mean, unit variance).
    pub pre_whiten: bool,
}

impl Default for AlignSettings {
    fn default() -> Self {
        Self {
            margin: 44,
            size: 160,
            pre_whiten: true,
        }
    }
}

/// Settings controlling optional runtime telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Whether telemetry timing logs are enabled.
    pub enabled: bool,
    /// Logging level for telemetry output (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string into a `LevelFilter`.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Debug,
        }
    }
}

/// Persistent application settings consumed by the CLI front end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Paths to the three stage networks.
    pub models: ModelPaths,
    /// Cascade thresholds and pyramid parameters.
    pub cascade: CascadeSettings,
    /// Aligned-crop export parameters.
    pub align: AlignSettings,
    /// Telemetry and diagnostics preferences.
    pub telemetry: TelemetrySettings,
}

impl AppSettings {
    /// Load settings from a JSON file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: AppSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;
        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON, overwriting any
    /// existing file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }
}

/// Returns the default path for persisted settings (`config/mtcnn_settings.json`).
pub fn default_settings_path() -> PathBuf {
    env::current_dir()
        .map(|dir| dir.join("config/mtcnn_settings.json"))
        .unwrap_or_else(|_| PathBuf::from("config/mtcnn_settings.json"))
}
