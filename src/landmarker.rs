//! ONNX face landmarker: optional UltraFace crop, 468-point mesh, optional
//! blendshape head.

use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::detector::{FaceDetector, Rect};
use crate::engine::{FaceObservation, LandmarkModel};
use crate::error::{EngineError, EngineResult};
use crate::types::{Blendshapes, Landmarks, Point3D, UprightImage, LANDMARK_COUNT};

const MESH_INPUT: u32 = 192;
const ROI_PADDING: f32 = 0.25;

/// Blendshape names in model output order.
pub const BLENDSHAPE_NAMES: [&str; 52] = [
    "_neutral",
    "browDownLeft",
    "browDownRight",
    "browInnerUp",
    "browOuterUpLeft",
    "browOuterUpRight",
    "cheekPuff",
    "cheekSquintLeft",
    "cheekSquintRight",
    "eyeBlinkLeft",
    "eyeBlinkRight",
    "eyeLookDownLeft",
    "eyeLookDownRight",
    "eyeLookInLeft",
    "eyeLookInRight",
    "eyeLookOutLeft",
    "eyeLookOutRight",
    "eyeLookUpLeft",
    "eyeLookUpRight",
    "eyeSquintLeft",
    "eyeSquintRight",
    "eyeWideLeft",
    "eyeWideRight",
    "jawForward",
    "jawLeft",
    "jawOpen",
    "jawRight",
    "mouthClose",
    "mouthDimpleLeft",
    "mouthDimpleRight",
    "mouthFrownLeft",
    "mouthFrownRight",
    "mouthFunnel",
    "mouthLeft",
    "mouthLowerDownLeft",
    "mouthLowerDownRight",
    "mouthPressLeft",
    "mouthPressRight",
    "mouthPucker",
    "mouthRight",
    "mouthRollLower",
    "mouthRollUpper",
    "mouthShrugLower",
    "mouthShrugUpper",
    "mouthSmileLeft",
    "mouthSmileRight",
    "mouthStretchLeft",
    "mouthStretchRight",
    "mouthUpperUpLeft",
    "mouthUpperUpRight",
    "noseSneerLeft",
    "noseSneerRight",
];

/// Mesh points fed to the blendshape model, in order. 468..478 are iris
/// points the plain mesh does not have; see [`subset_point`].
const BLENDSHAPE_SUBSET: [usize; 146] = [
    0, 1, 4, 5, 6, 7, 8, 10, 13, 14, 17, 21, 33, 37, 39, 40, 46, 52, 53, 54, 55, 58, 61, 63, 65,
    66, 67, 70, 78, 80, 81, 82, 84, 87, 88, 91, 93, 95, 103, 105, 107, 109, 127, 132, 133, 136,
    144, 145, 146, 148, 149, 150, 152, 153, 154, 155, 157, 158, 159, 160, 161, 162, 163, 168, 172,
    173, 176, 178, 181, 185, 191, 195, 197, 234, 246, 249, 251, 263, 267, 269, 270, 276, 282, 283,
    284, 285, 288, 291, 293, 295, 296, 297, 300, 308, 310, 311, 312, 314, 317, 318, 321, 323, 324,
    332, 334, 336, 338, 356, 361, 362, 365, 373, 374, 375, 377, 378, 379, 380, 381, 382, 384, 385,
    386, 387, 388, 389, 390, 397, 398, 400, 402, 405, 409, 415, 454, 466, 468, 469, 470, 471, 472,
    473, 474, 475, 476, 477,
];

/// Builds an ort session the same way for every model.
pub fn build_session(model_path: &str, threads: usize) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads.max(1))?
        .with_execution_providers([
            ort::execution_providers::CoreMLExecutionProvider::default().build(),
            ort::execution_providers::CPUExecutionProvider::default().build(),
        ])?
        .commit_from_file(model_path)?;
    Ok(session)
}

fn load_session(path: &str, threads: usize) -> EngineResult<Session> {
    build_session(path, threads).map_err(|e| EngineError::ModelLoad {
        path: path.to_string(),
        message: format!("{e:#}"),
    })
}

pub struct OrtFaceLandmarker {
    mesh_session: Session,
    detector: Option<FaceDetector>,
    blendshape_session: Option<Session>,
    presence_threshold: f32,
}

impl OrtFaceLandmarker {
    /// The mesh model is required; detector and blendshape models are used
    /// when present.
    pub fn load(config: &EngineConfig) -> EngineResult<Self> {
        if !Path::new(&config.mesh_model).exists() {
            return Err(EngineError::ModelMissing(config.mesh_model.clone()));
        }

        info!(path = %config.mesh_model, "loading face mesh model");
        let mesh_session = load_session(&config.mesh_model, config.threads)?;

        let detector = if Path::new(&config.detector_model).exists() {
            info!(path = %config.detector_model, "loading face detector");
            let detector = FaceDetector::new(&config.detector_model, config.threads).map_err(|e| {
                EngineError::ModelLoad {
                    path: config.detector_model.clone(),
                    message: format!("{e:#}"),
                }
            })?;
            Some(detector)
        } else {
            warn!(path = %config.detector_model, "face detector not found, meshing the full frame");
            None
        };

        let blendshape_session = if Path::new(&config.blendshape_model).exists() {
            info!(path = %config.blendshape_model, "loading blendshape model");
            Some(load_session(&config.blendshape_model, config.threads)?)
        } else {
            warn!(path = %config.blendshape_model, "blendshape model not found, expressions disabled");
            None
        };

        Ok(Self {
            mesh_session,
            detector,
            blendshape_session,
            presence_threshold: config.face_presence_threshold,
        })
    }

    fn run_mesh(&mut self, image: &UprightImage, roi: Rect) -> Result<Option<Landmarks>> {
        let crop = imageops::crop_imm(
            image,
            roi.x as u32,
            roi.y as u32,
            (roi.width as u32).max(1),
            (roi.height as u32).max(1),
        )
        .to_image();
        let resized = imageops::resize(&crop, MESH_INPUT, MESH_INPUT, FilterType::Triangle);

        // NHWC in [-1, 1]
        let mut input_data = Vec::with_capacity((MESH_INPUT * MESH_INPUT * 3) as usize);
        for pixel in resized.pixels() {
            for c in 0..3 {
                input_data.push(pixel[c] as f32 / 127.5 - 1.0);
            }
        }

        let shape = vec![1, MESH_INPUT as i64, MESH_INPUT as i64, 3];
        let input = Tensor::from_array((shape, input_data))?;
        let outputs = self.mesh_session.run(ort::inputs![input])?;

        // Second output, when exported, is the face presence logit.
        if outputs.len() > 1 {
            let (_shape, flag) = outputs[1].try_extract_tensor::<f32>()?;
            if let Some(&logit) = flag.first() {
                let presence = sigmoid(logit);
                if presence < self.presence_threshold {
                    debug!(presence, "mesh reports no face");
                    return Ok(None);
                }
            }
        }

        let (_shape, raw) = outputs[0].try_extract_tensor::<f32>()?;
        let points = mesh_to_image(raw, roi, image.width() as f32, image.height() as f32)?;
        Ok(Some(Landmarks::from_points(points)?))
    }

    fn run_blendshapes(&mut self, landmarks: &Landmarks, width: f32, height: f32) -> Result<Option<Blendshapes>> {
        let Some(session) = &mut self.blendshape_session else {
            return Ok(None);
        };

        let mut input_data = Vec::with_capacity(BLENDSHAPE_SUBSET.len() * 2);
        for &index in BLENDSHAPE_SUBSET.iter() {
            let p = subset_point(landmarks, index);
            input_data.push(p.x * width);
            input_data.push(p.y * height);
        }

        let input = Tensor::from_array((vec![1, BLENDSHAPE_SUBSET.len() as i64, 2], input_data))?;
        let outputs = session.run(ort::inputs![input])?;
        let (_shape, scores) = outputs[0].try_extract_tensor::<f32>()?;

        Ok(Some(
            BLENDSHAPE_NAMES
                .iter()
                .zip(scores.iter())
                .map(|(name, &score)| (*name, score))
                .collect(),
        ))
    }
}

impl LandmarkModel for OrtFaceLandmarker {
    fn name(&self) -> String {
        "Face Mesh (468 pts)".to_string()
    }

    fn detect(&mut self, image: &UprightImage) -> Result<Vec<FaceObservation>> {
        let width = image.width() as f32;
        let height = image.height() as f32;

        let roi = match &mut self.detector {
            Some(detector) => match detector.detect(image).context("face detector")? {
                Some(rect) => rect.padded(ROI_PADDING, width, height),
                None => return Ok(Vec::new()),
            },
            None => Rect::new(0.0, 0.0, width, height),
        };

        let Some(landmarks) = self.run_mesh(image, roi).context("face mesh")? else {
            return Ok(Vec::new());
        };
        let blendshapes = self
            .run_blendshapes(&landmarks, width, height)
            .context("blendshapes")?;

        Ok(vec![FaceObservation {
            landmarks,
            blendshapes,
        }])
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Maps raw mesh output (pixels of the 192x192 crop) to coordinates
/// normalized to the full image.
fn mesh_to_image(raw: &[f32], roi: Rect, image_w: f32, image_h: f32) -> Result<Vec<Point3D>> {
    anyhow::ensure!(
        raw.len() >= LANDMARK_COUNT * 3,
        "mesh output has {} values, expected {}",
        raw.len(),
        LANDMARK_COUNT * 3
    );

    let scale_x = roi.width / MESH_INPUT as f32;
    let scale_y = roi.height / MESH_INPUT as f32;

    Ok(raw
        .chunks_exact(3)
        .take(LANDMARK_COUNT)
        .map(|p| {
            Point3D::new(
                (roi.x + p[0] * scale_x) / image_w,
                (roi.y + p[1] * scale_y) / image_h,
                // Depth shares the x scale.
                p[2] * scale_x / image_w,
            )
        })
        .collect())
}

/// Mesh point for a blendshape input index. Iris indices fall back to the
/// centre of the matching eye contour.
fn subset_point(landmarks: &Landmarks, index: usize) -> Point3D {
    let eye = match index {
        468..=472 => Some((33, 133)),
        473..=477 => Some((362, 263)),
        _ => None,
    };
    match eye {
        Some((inner, outer)) => {
            let a = landmarks[inner];
            let b = landmarks[outer];
            Point3D::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0, (a.z + b.z) / 2.0)
        }
        None => landmarks[index],
    }
}
