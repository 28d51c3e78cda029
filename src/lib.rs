pub mod args;
pub mod camera;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod font;
pub mod frame_adapter;
pub mod head_pose;
pub mod hud;
pub mod inference;
pub mod landmarker;
pub mod output;
pub mod overlay;
pub mod pipeline;
pub mod ttf;
pub mod types;

pub use classifier::{EmotionClassifier, Thresholds};
pub use engine::{create_engine, LandmarkEngine};
pub use error::{EngineError, FrameError, LandmarkError};
pub use inference::{GatewayEvent, InferenceGateway};
pub use pipeline::{AnalysisUpdate, FaceAnalyzer};
pub use types::{Blendshapes, Emotion, EmotionVerdict, Frame, InferenceResult, Landmarks, PoseAngles};
