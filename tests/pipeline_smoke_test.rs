use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use emotion_mesh::config::{EngineBackend, EngineConfig};
use emotion_mesh::hud::HudState;
use emotion_mesh::inference::Completion;
use emotion_mesh::types::{Point3D, UprightImage, LANDMARK_COUNT};
use emotion_mesh::{
    create_engine, Blendshapes, Emotion, EmotionClassifier, EngineError, FaceAnalyzer, Frame,
    InferenceResult, LandmarkEngine, Landmarks, PoseAngles,
};

enum Reply {
    NoFace,
    Face(Blendshapes),
    Fail,
    Hold,
}

/// Answers each request from a script, inline on the submitting thread.
struct ScriptedEngine {
    replies: VecDeque<Reply>,
    held: Arc<Mutex<Vec<Completion>>>,
    seen_sizes: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl ScriptedEngine {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: replies.into(),
            held: Arc::default(),
            seen_sizes: Arc::default(),
        }
    }
}

fn frontal_face() -> Landmarks {
    let mut points = vec![Point3D::new(0.5, 0.5, 0.0); LANDMARK_COUNT];
    points[1] = Point3D::new(0.5, 0.55, 0.0);
    points[454] = Point3D::new(0.8, 0.55, 0.0);
    points[234] = Point3D::new(0.2, 0.55, 0.0);
    points[33] = Point3D::new(0.35, 0.4, 0.0);
    points[263] = Point3D::new(0.65, 0.4, 0.0);
    Landmarks::from_points(points).unwrap()
}

impl LandmarkEngine for ScriptedEngine {
    fn submit_async(&mut self, image: UprightImage, timestamp_ms: u64, completion: Completion) {
        self.seen_sizes.lock().unwrap().push(image.dimensions());
        match self.replies.pop_front().unwrap_or(Reply::NoFace) {
            Reply::NoFace => completion.succeed(InferenceResult::no_face(timestamp_ms)),
            Reply::Face(blendshapes) => completion.succeed(InferenceResult {
                timestamp_ms,
                landmarks: Some(frontal_face()),
                blendshapes: Some(blendshapes),
            }),
            Reply::Fail => completion.fail(EngineError::Inference("graph error".to_string())),
            Reply::Hold => self.held.lock().unwrap().push(completion),
        }
    }

    fn close(&mut self) {}
}

fn frame(width: u32, height: u32, rotation: i32) -> Frame {
    Frame::packed(width, height, rotation, vec![128; (width * height * 4) as usize])
}

fn analyzer(engine: ScriptedEngine) -> FaceAnalyzer {
    FaceAnalyzer::new(Ok(Box::new(engine)), EmotionClassifier::default(), None)
}

fn smile() -> Blendshapes {
    [("mouthSmileLeft", 0.8), ("mouthSmileRight", 0.6)]
        .into_iter()
        .collect()
}

#[test]
fn missing_engine_runs_degraded() {
    let mut analyzer = FaceAnalyzer::new(
        Err(EngineError::ModelMissing("face_landmark.onnx".to_string())),
        EmotionClassifier::default(),
        None,
    );

    assert!(analyzer.is_degraded());
    assert!(matches!(analyzer.hud(), HudState::EngineError(_)));
    assert!(!analyzer.offer(&frame(4, 4, 0)));
    assert!(analyzer.poll().is_none());
}

#[test]
fn no_face_then_smile() {
    let mut analyzer = analyzer(ScriptedEngine::new(vec![Reply::NoFace, Reply::Face(smile())]));

    assert!(analyzer.offer(&frame(8, 6, 0)));
    let update = analyzer.poll().unwrap();
    assert_eq!(update.hud, HudState::Searching);
    assert!(update.face.is_none());

    assert!(analyzer.offer(&frame(8, 6, 90)));
    let update = analyzer.poll().unwrap();
    match &update.hud {
        HudState::Tracking { verdict, pose } => {
            assert_eq!(verdict.emotion, Emotion::Happy);
            assert!((verdict.confidence - 0.7).abs() < 1e-6);
            assert_eq!(*pose, PoseAngles::Known { yaw: 0, pitch: 0, roll: 0 });
        }
        other => panic!("expected tracking, got {other:?}"),
    }

    // Rotated frame: landmarks refer to the upright 6x8 image.
    let face = update.face.unwrap();
    assert_eq!((face.image_width, face.image_height), (6, 8));
}

#[test]
fn engine_failure_shows_error_until_next_result() {
    let mut analyzer = analyzer(ScriptedEngine::new(vec![Reply::Fail, Reply::Face(Blendshapes::new())]));

    assert!(analyzer.offer(&frame(4, 4, 0)));
    let update = analyzer.poll().unwrap();
    assert!(matches!(update.hud, HudState::EngineError(ref msg) if msg.contains("graph error")));

    assert!(analyzer.offer(&frame(4, 4, 0)));
    let update = analyzer.poll().unwrap();
    match update.hud {
        HudState::Tracking { verdict, .. } => {
            assert_eq!(verdict.emotion, Emotion::Neutral);
            assert_eq!(verdict.confidence, 1.0);
        }
        other => panic!("expected tracking, got {other:?}"),
    }
}

#[test]
fn busy_engine_drops_frames_without_converting() {
    let engine = ScriptedEngine::new(vec![Reply::Hold]);
    let held = Arc::clone(&engine.held);
    let seen = Arc::clone(&engine.seen_sizes);
    let mut analyzer = analyzer(engine);

    assert!(analyzer.offer(&frame(4, 4, 0)));
    assert!(!analyzer.offer(&frame(4, 4, 0)));
    // Would fail conversion, but never gets that far.
    assert!(!analyzer.offer(&frame(4, 4, 45)));
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(analyzer.stats().rejected_busy, 2);

    let completion = held.lock().unwrap().pop().unwrap();
    let ts = completion.timestamp_ms();
    completion.succeed(InferenceResult::no_face(ts));

    assert_eq!(analyzer.poll().unwrap().hud, HudState::Searching);
    assert!(analyzer.offer(&frame(4, 4, 0)));
}

#[test]
fn result_keeps_its_own_frame_size_after_next_offer() {
    let engine = ScriptedEngine::new(vec![Reply::Hold, Reply::Hold]);
    let held = Arc::clone(&engine.held);
    let mut analyzer = analyzer(engine);

    assert!(analyzer.offer(&frame(8, 6, 0)));
    let completion = held.lock().unwrap().pop().unwrap();
    let ts = completion.timestamp_ms();
    completion.succeed(InferenceResult {
        timestamp_ms: ts,
        landmarks: Some(frontal_face()),
        blendshapes: Some(smile()),
    });

    // The UI loop offers the next frame before it gets round to polling.
    assert!(analyzer.offer(&frame(8, 6, 90)));
    let face = analyzer.poll().unwrap().face.unwrap();
    assert_eq!((face.image_width, face.image_height), (8, 6));

    let completion = held.lock().unwrap().pop().unwrap();
    let ts = completion.timestamp_ms();
    completion.succeed(InferenceResult {
        timestamp_ms: ts,
        landmarks: Some(frontal_face()),
        blendshapes: None,
    });
    let face = analyzer.poll().unwrap().face.unwrap();
    assert_eq!((face.image_width, face.image_height), (6, 8));
}

#[test]
fn unconvertible_frame_leaves_slot_free() {
    let engine = ScriptedEngine::new(vec![]);
    let seen = Arc::clone(&engine.seen_sizes);
    let mut analyzer = analyzer(engine);

    let mut broken = frame(4, 4, 0);
    broken.data.truncate(10);
    assert!(!analyzer.offer(&broken));
    assert!(seen.lock().unwrap().is_empty());

    assert!(analyzer.offer(&frame(4, 4, 0)));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn simulated_backend_tracks_a_face() {
    let config = EngineConfig {
        backend: EngineBackend::Simulated,
        ..EngineConfig::default()
    };
    let mut analyzer = FaceAnalyzer::new(create_engine(&config), EmotionClassifier::default(), None);

    assert!(analyzer.offer(&frame(16, 12, 0)));
    let update = analyzer
        .poll_timeout(Duration::from_secs(5))
        .expect("simulated engine did not answer");

    assert!(matches!(update.hud, HudState::Tracking { .. }));
    let face = update.face.unwrap();
    assert_eq!((face.image_width, face.image_height), (16, 12));
    analyzer.close();
}

#[test]
fn missing_model_file_fails_engine_creation() {
    let config = EngineConfig {
        backend: EngineBackend::Onnx,
        mesh_model: "/nonexistent/face_landmark.onnx".to_string(),
        ..EngineConfig::default()
    };
    assert!(matches!(create_engine(&config), Err(EngineError::ModelMissing(_))));
}
