//! Landmark engines.
//!
//! The gateway only sees [`LandmarkEngine`]: fire a request, get exactly one
//! completion back on some other thread. [`ThreadedEngine`] hosts any
//! synchronous [`LandmarkModel`] on a worker thread to provide that
//! contract.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::config::{EngineBackend, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::inference::Completion;
use crate::landmarker::OrtFaceLandmarker;
use crate::overlay::CONTOURS;
use crate::types::{Blendshapes, InferenceResult, Landmarks, Point3D, UprightImage, LANDMARK_COUNT};

pub trait LandmarkEngine: Send {
    /// Must eventually report through `completion`, exactly once.
    fn submit_async(&mut self, image: UprightImage, timestamp_ms: u64, completion: Completion);

    /// Releases the engine. Later submissions fail with [`EngineError::Closed`].
    fn close(&mut self);
}

impl<E: LandmarkEngine + ?Sized> LandmarkEngine for Box<E> {
    fn submit_async(&mut self, image: UprightImage, timestamp_ms: u64, completion: Completion) {
        (**self).submit_async(image, timestamp_ms, completion)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Requests are video frames: their timestamps must strictly increase.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_faces: usize,
    pub output_blendshapes: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_faces: 1,
            output_blendshapes: true,
        }
    }
}

/// One face as seen by a model.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub landmarks: Landmarks,
    pub blendshapes: Option<Blendshapes>,
}

/// A blocking face model. Runs on the engine's worker thread only.
pub trait LandmarkModel: Send + 'static {
    fn name(&self) -> String;
    fn detect(&mut self, image: &UprightImage) -> anyhow::Result<Vec<FaceObservation>>;
}

struct Job {
    image: UprightImage,
    timestamp_ms: u64,
    completion: Completion,
}

/// Runs a [`LandmarkModel`] on a dedicated thread.
pub struct ThreadedEngine {
    name: String,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadedEngine {
    pub fn spawn<M: LandmarkModel>(model: M, options: EngineOptions) -> EngineResult<Self> {
        let name = model.name();
        let (jobs, rx) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name("landmark-engine".to_string())
            .spawn(move || run_worker(model, options, rx))
            .map_err(|e| EngineError::ModelLoad {
                path: name.clone(),
                message: e.to_string(),
            })?;

        info!(engine = %name, "landmark engine started");
        Ok(Self {
            name,
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }
}

impl LandmarkEngine for ThreadedEngine {
    fn submit_async(&mut self, image: UprightImage, timestamp_ms: u64, completion: Completion) {
        let Some(jobs) = &self.jobs else {
            completion.fail(EngineError::Closed);
            return;
        };
        let job = Job {
            image,
            timestamp_ms,
            completion,
        };
        if let Err(mpsc::SendError(job)) = jobs.send(job) {
            job.completion.fail(EngineError::Closed);
        }
    }

    fn close(&mut self) {
        // Dropping the sender lets the worker drain and exit.
        if self.jobs.take().is_none() {
            return;
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(engine = %self.name, "landmark engine worker panicked");
            }
        }
        info!(engine = %self.name, "landmark engine closed");
    }
}

impl Drop for ThreadedEngine {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker<M: LandmarkModel>(mut model: M, options: EngineOptions, rx: Receiver<Job>) {
    let mut previous_ms: Option<u64> = None;

    while let Ok(job) = rx.recv() {
        if let Some(previous) = previous_ms.filter(|&p| job.timestamp_ms <= p) {
            job.completion.fail(EngineError::NonMonotonicTimestamp {
                timestamp_ms: job.timestamp_ms,
                previous_ms: previous,
            });
            continue;
        }
        previous_ms = Some(job.timestamp_ms);

        match model.detect(&job.image) {
            Ok(faces) => {
                let result = collect_result(job.timestamp_ms, faces, &options);
                job.completion.succeed(result);
            }
            Err(e) => job.completion.fail(EngineError::Inference(format!("{e:#}"))),
        }
    }

    debug!("landmark engine worker exiting");
}

fn collect_result(timestamp_ms: u64, faces: Vec<FaceObservation>, options: &EngineOptions) -> InferenceResult {
    let (landmarks, blendshapes): (Vec<_>, Vec<_>) = faces
        .into_iter()
        .take(options.max_faces.max(1))
        .map(|face| (face.landmarks, face.blendshapes))
        .unzip();

    let blendshapes = if options.output_blendshapes {
        blendshapes.into_iter().flatten().collect()
    } else {
        Vec::new()
    };

    InferenceResult::from_faces(timestamp_ms, landmarks, blendshapes)
}

/// Builds the engine selected in the config. Fails when a required model
/// file is missing or does not load.
pub fn create_engine(config: &EngineConfig) -> EngineResult<Box<dyn LandmarkEngine>> {
    let options = EngineOptions::default();

    match config.backend {
        EngineBackend::Onnx => {
            let model = OrtFaceLandmarker::load(config)?;
            Ok(Box::new(ThreadedEngine::spawn(model, options)?))
        }
        EngineBackend::Simulated => Ok(Box::new(ThreadedEngine::spawn(
            SimulatedLandmarker::new(),
            options,
        )?)),
    }
}

/// Synthetic frontal face for running without model files. The smile and
/// blink cycle slowly so every HUD state shows up.
pub struct SimulatedLandmarker {
    frame_count: u32,
}

impl SimulatedLandmarker {
    pub fn new() -> Self {
        Self { frame_count: 0 }
    }

    fn face(t: f32) -> Vec<Point3D> {
        let mut points = Vec::with_capacity(LANDMARK_COUNT);

        // Fill the mesh interior so the dot layer has something to show.
        for i in 0..LANDMARK_COUNT {
            let angle = (i as f32 / LANDMARK_COUNT as f32) * std::f32::consts::TAU * 7.0;
            let radius = 0.05 + 0.2 * (i as f32 / LANDMARK_COUNT as f32);
            points.push(Point3D::new(
                0.5 + angle.cos() * radius * 0.8,
                0.5 + angle.sin() * radius,
                0.0,
            ));
        }

        // Lay each contour out on its own ellipse.
        let layout = [
            (0.5, 0.5, 0.28, 0.36),   // face oval
            (0.39, 0.42, 0.055, 0.02), // left eye
            (0.61, 0.42, 0.055, 0.02), // right eye
            (0.5, 0.7, 0.1, 0.04),     // outer lips
            (0.5, 0.7, 0.07, 0.015),   // inner lips
            (0.38, 0.35, 0.07, 0.015), // left brow
            (0.62, 0.35, 0.07, 0.015), // right brow
        ];
        for (contour, &(cx, cy, rx, ry)) in CONTOURS.iter().zip(layout.iter()) {
            let mut order: Vec<usize> = Vec::new();
            for &(a, b) in contour.connections {
                for idx in [a, b] {
                    if !order.contains(&idx) {
                        order.push(idx);
                    }
                }
            }
            let n = order.len().max(1) as f32;
            for (k, &idx) in order.iter().enumerate() {
                let angle = k as f32 / n * std::f32::consts::TAU;
                points[idx] = Point3D::new(cx + angle.cos() * rx, cy + angle.sin() * ry, 0.0);
            }
        }

        // Points the pose estimate reads, with a gentle head sway.
        let sway = (t * 0.7).sin() * 0.03;
        points[1] = Point3D::new(0.5 + sway, 0.57, -0.05);
        points[234] = Point3D::new(0.22, 0.55, 0.0);
        points[454] = Point3D::new(0.78, 0.55, 0.0);
        points[33] = Point3D::new(0.36, 0.42, 0.0);
        points[263] = Point3D::new(0.64, 0.42, 0.0);

        points
    }
}

impl Default for SimulatedLandmarker {
    fn default() -> Self {
        Self::new()
    }
}

impl LandmarkModel for SimulatedLandmarker {
    fn name(&self) -> String {
        "Simulated face".to_string()
    }

    fn detect(&mut self, _image: &UprightImage) -> anyhow::Result<Vec<FaceObservation>> {
        self.frame_count += 1;
        let t = self.frame_count as f32 * 0.05;

        let landmarks = Landmarks::from_points(Self::face(t))?;
        let smile = (0.5 + 0.5 * t.sin()).clamp(0.0, 1.0);
        // Blink for a few frames every ~4 seconds at 30 fps.
        let blink = if self.frame_count % 120 < 6 { 0.9 } else { 0.05 };

        let blendshapes: Blendshapes = [
            ("mouthSmileLeft", smile),
            ("mouthSmileRight", smile),
            ("eyeBlinkLeft", blink),
            ("eyeBlinkRight", blink),
            ("browInnerUp", 0.1),
            ("jawOpen", 0.05),
        ]
        .into_iter()
        .collect();

        Ok(vec![FaceObservation {
            landmarks,
            blendshapes: Some(blendshapes),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{GatewayEvent, InferenceGateway};
    use std::time::Duration;

    struct FailingModel;

    impl LandmarkModel for FailingModel {
        fn name(&self) -> String {
            "failing".to_string()
        }

        fn detect(&mut self, _image: &UprightImage) -> anyhow::Result<Vec<FaceObservation>> {
            anyhow::bail!("tensor shape mismatch")
        }
    }

    struct TwoFaces;

    impl LandmarkModel for TwoFaces {
        fn name(&self) -> String {
            "two faces".to_string()
        }

        fn detect(&mut self, _image: &UprightImage) -> anyhow::Result<Vec<FaceObservation>> {
            let face = |x: f32| FaceObservation {
                landmarks: Landmarks::from_points(vec![Point3D::new(x, 0.5, 0.0); LANDMARK_COUNT])
                    .unwrap(),
                blendshapes: None,
            };
            Ok(vec![face(0.25), face(0.75)])
        }
    }

    fn recv(rx: &Receiver<GatewayEvent>) -> GatewayEvent {
        rx.recv_timeout(Duration::from_secs(5)).expect("engine did not answer")
    }

    #[test]
    fn simulated_engine_reports_a_face() {
        let engine = ThreadedEngine::spawn(SimulatedLandmarker::new(), EngineOptions::default()).unwrap();
        let (mut gateway, events) = InferenceGateway::new(engine);

        assert!(gateway.submit(UprightImage::new(4, 4)));
        match recv(&events) {
            GatewayEvent::Completed(result) => {
                assert!(result.has_face());
                assert!(result.blendshapes.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
        gateway.close();
    }

    #[test]
    fn model_error_becomes_failed_event() {
        let engine = ThreadedEngine::spawn(FailingModel, EngineOptions::default()).unwrap();
        let (mut gateway, events) = InferenceGateway::new(engine);

        assert!(gateway.submit(UprightImage::new(4, 4)));
        match recv(&events) {
            GatewayEvent::Failed { error, .. } => {
                assert!(error.to_string().contains("tensor shape mismatch"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!gateway.is_busy());
    }

    #[test]
    fn only_first_face_is_kept() {
        let engine = ThreadedEngine::spawn(TwoFaces, EngineOptions::default()).unwrap();
        let (mut gateway, events) = InferenceGateway::new(engine);

        assert!(gateway.submit(UprightImage::new(4, 4)));
        match recv(&events) {
            GatewayEvent::Completed(result) => {
                let landmarks = result.landmarks.unwrap();
                assert_eq!(landmarks[0].x, 0.25);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn closed_engine_fails_immediately() {
        let mut engine =
            ThreadedEngine::spawn(SimulatedLandmarker::new(), EngineOptions::default()).unwrap();
        engine.close();
        engine.close();

        let (mut gateway, events) = InferenceGateway::new(engine);
        assert!(gateway.submit(UprightImage::new(4, 4)));
        assert!(matches!(
            recv(&events),
            GatewayEvent::Failed {
                error: EngineError::Closed,
                ..
            }
        ));
    }

    #[test]
    fn simulated_face_is_frontal() {
        let points = SimulatedLandmarker::face(0.0);
        assert_eq!(points.len(), LANDMARK_COUNT);
        assert!((points[1].x - 0.5).abs() < 1e-6);
        assert_eq!(points[33].y, points[263].y);
    }
}
