use clap::Parser;
use std::path::PathBuf;

use crate::classifier::ThresholdPreset;
use crate::config::{AppConfig, EngineBackend};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Camera index, overrides the config file
    #[arg(short, long)]
    pub cam_index: Option<u32>,

    /// Path of the JSON config file
    #[arg(long, default_value = AppConfig::PATH)]
    pub config: PathBuf,

    /// Landmark engine backend
    #[arg(long, value_enum)]
    pub backend: Option<EngineBackend>,

    /// Emotion threshold preset
    #[arg(long, value_enum)]
    pub thresholds: Option<ThresholdPreset>,

    /// Start with the mesh overlay hidden
    #[arg(long)]
    pub no_overlay: bool,

    /// List available cameras
    #[arg(long)]
    pub list: bool,
}

impl Args {
    /// Applies command line overrides on top of the loaded config.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(index) = self.cam_index {
            config.camera.index = index;
        }
        if let Some(backend) = self.backend {
            config.engine.backend = backend;
        }
        if let Some(preset) = self.thresholds {
            config.classifier = preset.into();
        }
        if self.no_overlay {
            config.overlay.show = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Thresholds;

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "emotion-mesh",
            "--cam-index",
            "2",
            "--backend",
            "simulated",
            "--thresholds",
            "b",
            "--no-overlay",
        ]);
        let mut config = AppConfig::default();
        args.apply(&mut config);

        assert_eq!(config.camera.index, 2);
        assert_eq!(config.engine.backend, EngineBackend::Simulated);
        assert_eq!(config.classifier, Thresholds::VARIANT_B);
        assert!(!config.overlay.show);
    }

    #[test]
    fn no_flags_keep_config() {
        let args = Args::parse_from(["emotion-mesh"]);
        let mut config = AppConfig::default();
        args.apply(&mut config);

        assert_eq!(config.camera.index, 0);
        assert_eq!(config.classifier, Thresholds::VARIANT_A);
        assert!(config.overlay.show);
        assert_eq!(args.config, PathBuf::from("config.json"));
    }
}
