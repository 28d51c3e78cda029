//! Rough head rotation from a handful of mesh points.
//!
//! This is a 2D heuristic on normalized coordinates, not a PnP solve. It is
//! good enough to show which way the head is turned.

use crate::types::{Landmarks, PoseAngles};

const NOSE_TIP: usize = 1;
const LEFT_CHEEK: usize = 454;
const RIGHT_CHEEK: usize = 234;
const LEFT_EYE: usize = 33;
const RIGHT_EYE: usize = 263;

/// Nose sits this far below the eye line on a level face.
const PITCH_NEUTRAL_OFFSET: f32 = 0.15;

pub fn estimate(landmarks: &Landmarks) -> PoseAngles {
    let nose = landmarks[NOSE_TIP];
    let left_cheek = landmarks[LEFT_CHEEK];
    let right_cheek = landmarks[RIGHT_CHEEK];
    let left_eye = landmarks[LEFT_EYE];
    let right_eye = landmarks[RIGHT_EYE];

    let ratio = (nose.x - left_cheek.x).abs() / ((right_cheek.x - nose.x).abs() + 0.001);
    let yaw = (ratio - 1.0) * 45.0;

    let eye_center_y = (left_eye.y + right_eye.y) / 2.0;
    let pitch = (nose.y - eye_center_y - PITCH_NEUTRAL_OFFSET) * 400.0;

    let roll = (right_eye.y - left_eye.y)
        .atan2(right_eye.x - left_eye.x)
        .to_degrees();

    PoseAngles::Known {
        yaw: yaw.round() as i32,
        pitch: pitch.round() as i32,
        roll: roll.round() as i32,
    }
}

pub fn estimate_optional(landmarks: Option<&Landmarks>) -> PoseAngles {
    landmarks.map(estimate).unwrap_or_default()
}
