use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::classifier::Thresholds;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub engine: EngineConfig,
    pub inference: InferenceConfig,
    pub classifier: Thresholds,
    pub overlay: OverlayConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    /// Clockwise degrees that bring the sensor image upright.
    pub rotation_degrees: i32,
    pub mirror: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    Onnx,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: EngineBackend,
    pub mesh_model: String,
    /// Optional; without it the whole frame goes to the mesh model.
    pub detector_model: String,
    /// Optional; without it no blendshapes are produced.
    pub blendshape_model: String,
    pub face_presence_threshold: f32,
    pub threads: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Frees a stuck in-flight slot after this long. 0 waits forever.
    pub stall_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub show: bool,
    pub show_dots: bool,
    pub dot_stride: usize,
    pub dot_radius: f32,
    pub dot_color_hex: String,
    pub eye_color_hex: String,
    pub lip_color_hex: String,
    pub brow_color_hex: String,
    pub oval_color_hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub window_scale: usize,
    pub font_size_pt: u32,
    pub font_family: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 480,
            height: 640,
            rotation_degrees: 0,
            mirror: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: EngineBackend::Onnx,
            mesh_model: "face_landmark.onnx".to_string(),
            detector_model: "face_detection.onnx".to_string(),
            blendshape_model: "face_blendshapes.onnx".to_string(),
            face_presence_threshold: 0.5,
            threads: 4,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            show: true,
            show_dots: true,
            dot_stride: 3,
            dot_radius: 1.5,
            dot_color_hex: "#B400E5FF".to_string(),
            eye_color_hex: "#00E5FF".to_string(),
            lip_color_hex: "#FF6B6B".to_string(),
            brow_color_hex: "#FFD166".to_string(),
            oval_color_hex: "#64FFFFFF".to_string(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            window_scale: 1,
            font_size_pt: 14,
            font_family: "DejaVu Sans".to_string(),
        }
    }
}

impl AppConfig {
    pub const PATH: &'static str = "config.json";

    /// Reads `path`, falling back to defaults when the file is missing or
    /// malformed, then writes the resolved config back.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let content = fs::read_to_string(path)?;
            // Missing fields take their Default through #[serde(default)].
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(c) => {
                    info!(path = %path.display(), "loaded configuration");
                    c
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
                    Self::default()
                }
            }
        } else {
            info!(path = %path.display(), "no configuration file, creating defaults");
            Self::default()
        };

        // Always save back so new fields show up in the file.
        config.save_to(path)?;

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn stall_timeout(&self) -> Option<std::time::Duration> {
        match self.inference.stall_timeout_ms {
            0 => None,
            ms => Some(std::time::Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.camera.height, 640);
        assert_eq!(config.overlay.dot_stride, 3);
        assert!(path.exists());
    }

    #[test]
    fn partial_file_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "engine": { "backend": "simulated" }, "classifier": { "blink": 0.3 } }"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.engine.backend, EngineBackend::Simulated);
        assert_eq!(config.engine.threads, 4);
        assert_eq!(config.classifier.blink, 0.3);
        assert_eq!(config.classifier.smile, 0.4);

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"stall_timeout_ms\""));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.engine.backend, EngineBackend::Onnx);
    }

    #[test]
    fn zero_stall_timeout_disables_it() {
        let mut config = AppConfig::default();
        assert_eq!(config.stall_timeout(), None);
        config.inference.stall_timeout_ms = 1500;
        assert_eq!(
            config.stall_timeout(),
            Some(std::time::Duration::from_millis(1500))
        );
    }
}
