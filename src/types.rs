use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::LandmarkError;

/// Number of points in a face mesh.
pub const LANDMARK_COUNT: usize = 468;

/// A single 3D point. For landmarks `x`/`y` are normalized to the upright
/// image and `z` is relative depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3D {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Exactly 468 landmarks; the index of a point is its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmarks {
    points: Vec<Point3D>,
}

impl Landmarks {
    /// Builds a set from the engine's output. Extra points (iris refinement)
    /// are dropped, fewer than 468 is an error.
    pub fn from_points(mut points: Vec<Point3D>) -> Result<Self, LandmarkError> {
        if points.len() < LANDMARK_COUNT {
            return Err(LandmarkError::TooFewPoints {
                expected: LANDMARK_COUNT,
                actual: points.len(),
            });
        }
        points.truncate(LANDMARK_COUNT);
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point3D] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Option<&Point3D> {
        self.points.get(index)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl std::ops::Index<usize> for Landmarks {
    type Output = Point3D;

    fn index(&self, index: usize) -> &Point3D {
        &self.points[index]
    }
}

/// Named blendshape activations, at most one score per name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Blendshapes {
    scores: HashMap<String, f32>,
}

impl Blendshapes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a score. Scores are clamped to [0, 1].
    pub fn insert(&mut self, name: impl Into<String>, score: f32) {
        self.scores.insert(name.into(), score.clamp(0.0, 1.0));
    }

    /// Missing names score 0.
    pub fn score(&self, name: &str) -> f32 {
        self.scores.get(name).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for Blendshapes {
    fn from_iter<I: IntoIterator<Item = (S, f32)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, score) in iter {
            set.insert(name, score);
        }
        set
    }
}

/// What the engine saw in one frame. Only the first face is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub timestamp_ms: u64,
    pub landmarks: Option<Landmarks>,
    pub blendshapes: Option<Blendshapes>,
}

impl InferenceResult {
    pub fn no_face(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            landmarks: None,
            blendshapes: None,
        }
    }

    /// Keeps the first face of a multi-face answer.
    pub fn from_faces(
        timestamp_ms: u64,
        faces: Vec<Landmarks>,
        blendshapes: Vec<Blendshapes>,
    ) -> Self {
        Self {
            timestamp_ms,
            landmarks: faces.into_iter().next(),
            blendshapes: blendshapes.into_iter().next(),
        }
    }

    pub fn has_face(&self) -> bool {
        self.landmarks.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Emotion {
    Neutral,
    Happy,
    Angry,
    Surprised,
    Sleepy,
}

impl Emotion {
    pub fn label(&self) -> &'static str {
        match self {
            Emotion::Neutral => "Neutral",
            Emotion::Happy => "Happy",
            Emotion::Angry => "Angry",
            Emotion::Surprised => "Surprised",
            Emotion::Sleepy => "Sleepy/Blinking",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Emotion::Neutral => "\u{1F610}",
            Emotion::Happy => "\u{1F60A}",
            Emotion::Angry => "\u{1F620}",
            Emotion::Surprised => "\u{1F632}",
            Emotion::Sleepy => "\u{1F634}",
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionVerdict {
    pub emotion: Emotion,
    /// In [0, 1].
    pub confidence: f32,
}

impl EmotionVerdict {
    pub fn new(emotion: Emotion, confidence: f32) -> Self {
        Self {
            emotion,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Head rotation in whole degrees, or `Unknown` when no face is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoseAngles {
    #[default]
    Unknown,
    Known { yaw: i32, pitch: i32, roll: i32 },
}

/// A raw camera frame, 4 bytes per pixel, rows possibly padded.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub row_stride: usize,
    pub pixel_stride: usize,
    pub rotation_degrees: i32,
    pub data: Vec<u8>,
}

impl Frame {
    /// A tightly packed frame with no row padding.
    pub fn packed(width: u32, height: u32, rotation_degrees: i32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            row_stride: width as usize * 4,
            pixel_stride: 4,
            rotation_degrees,
            data,
        }
    }
}

/// Dense, upright RGBA image ready for inference.
pub type UprightImage = image::RgbaImage;
