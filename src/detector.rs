use anyhow::Result;
use image::imageops::{self, FilterType};
use ort::session::Session;
use ort::value::Tensor;

use crate::landmarker::build_session;
use crate::types::UprightImage;

const INPUT_W: u32 = 320;
const INPUT_H: u32 = 240;
const SCORE_THRESHOLD: f32 = 0.7;

/// Axis-aligned box in pixels of the image it was detected in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Grows the box by `fraction` of its size, centered, then clips it to
    /// `bounds_w`x`bounds_h`.
    pub fn padded(&self, fraction: f32, bounds_w: f32, bounds_h: f32) -> Rect {
        let pad_w = self.width * fraction;
        let pad_h = self.height * fraction;
        let x = (self.x - pad_w / 2.0).max(0.0);
        let y = (self.y - pad_h / 2.0).max(0.0);
        let w = (self.width + pad_w).min(bounds_w - x);
        let h = (self.height + pad_h).min(bounds_h - y);
        Rect::new(x, y, w.max(0.0), h.max(0.0))
    }
}

/// UltraFace RFB-320 detector, used to crop the face before the mesh runs.
pub struct FaceDetector {
    session: Session,
    anchors: Vec<(f32, f32, f32, f32)>, // cx, cy, w, h
}

impl FaceDetector {
    pub fn new(model_path: &str, threads: usize) -> Result<Self> {
        let session = build_session(model_path, threads)?;
        let anchors = generate_anchors(INPUT_W as usize, INPUT_H as usize);
        Ok(Self { session, anchors })
    }

    /// Best face above the score threshold, in pixels of `image`.
    pub fn detect(&mut self, image: &UprightImage) -> Result<Option<Rect>> {
        let resized = imageops::resize(image, INPUT_W, INPUT_H, FilterType::Triangle);

        // NCHW, (pixel - 127) / 128
        let plane = (INPUT_W * INPUT_H) as usize;
        let mut input_data = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let i = (y * INPUT_W + x) as usize;
            for c in 0..3 {
                input_data[c * plane + i] = (pixel[c] as f32 - 127.0) / 128.0;
            }
        }

        let input_tensor = Tensor::from_array((vec![1, 3, INPUT_H as i64, INPUT_W as i64], input_data))?;
        let outputs = self.session.run(ort::inputs![input_tensor])?;

        let (_scores_shape, scores_data) = outputs["scores"].try_extract_tensor::<f32>()?;
        let (_boxes_shape, boxes_data) = outputs["boxes"].try_extract_tensor::<f32>()?;

        let best = best_box(&self.anchors, scores_data, boxes_data, SCORE_THRESHOLD);

        Ok(best.map(|rect| {
            let sx = image.width() as f32;
            let sy = image.height() as f32;
            Rect::new(rect.x * sx, rect.y * sy, rect.width * sx, rect.height * sy)
        }))
    }
}

/// Decodes the highest scoring anchor. The returned box is normalized to
/// the detector input.
fn best_box(
    anchors: &[(f32, f32, f32, f32)],
    scores_raw: &[f32],
    boxes_raw: &[f32],
    threshold: f32,
) -> Option<Rect> {
    let center_variance = 0.1;
    let size_variance = 0.2;

    let mut best_score = 0.0;
    let mut best_rect = None;

    let count = anchors
        .len()
        .min(scores_raw.len() / 2)
        .min(boxes_raw.len() / 4);

    for (i, &(ax, ay, aw, ah)) in anchors.iter().enumerate().take(count) {
        let score = scores_raw[i * 2 + 1];
        if score <= threshold || score <= best_score {
            continue;
        }

        let cx = boxes_raw[i * 4] * center_variance * aw + ax;
        let cy = boxes_raw[i * 4 + 1] * center_variance * ah + ay;
        let w = (boxes_raw[i * 4 + 2] * size_variance).exp() * aw;
        let h = (boxes_raw[i * 4 + 3] * size_variance).exp() * ah;

        best_score = score;
        best_rect = Some(Rect::new(cx - w / 2.0, cy - h / 2.0, w, h));
    }

    best_rect
}

fn generate_anchors(width: usize, height: usize) -> Vec<(f32, f32, f32, f32)> {
    let shrinkage_list = [8, 16, 32, 64];
    let min_boxes: [&[f32]; 4] = [
        &[10.0, 16.0, 24.0],
        &[32.0, 48.0],
        &[64.0, 96.0],
        &[128.0, 192.0, 256.0],
    ];
    let mut anchors = Vec::new();

    let w = width as f32;
    let h = height as f32;

    for (i, &shrinkage) in shrinkage_list.iter().enumerate() {
        let feature_h = (h / shrinkage as f32).ceil() as usize;
        let feature_w = (w / shrinkage as f32).ceil() as usize;

        for v in 0..feature_h {
            for u in 0..feature_w {
                let cx = (u as f32 * shrinkage as f32 + shrinkage as f32 / 2.0) / w;
                let cy = (v as f32 * shrinkage as f32 + shrinkage as f32 / 2.0) / h;

                for &min_box in min_boxes[i] {
                    anchors.push((cx, cy, min_box / w, min_box / h));
                }
            }
        }
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_count_matches_rfb_320() {
        assert_eq!(generate_anchors(320, 240).len(), 4420);
    }

    #[test]
    fn best_box_picks_highest_score_above_threshold() {
        let anchors = vec![(0.25, 0.25, 0.1, 0.1), (0.75, 0.5, 0.2, 0.2)];
        let scores = vec![0.2, 0.8, 0.1, 0.9];
        let boxes = vec![0.0; 8];

        let rect = best_box(&anchors, &scores, &boxes, 0.7).unwrap();
        assert!((rect.x - 0.65).abs() < 1e-6);
        assert!((rect.width - 0.2).abs() < 1e-6);

        assert!(best_box(&anchors, &scores, &boxes, 0.95).is_none());
    }

    #[test]
    fn padded_rect_stays_inside_bounds() {
        let rect = Rect::new(0.0, 10.0, 100.0, 100.0).padded(0.25, 110.0, 200.0);
        assert_eq!(rect.x, 0.0);
        assert_eq!(rect.y, 0.0);
        assert_eq!(rect.width, 110.0);
        assert_eq!(rect.height, 125.0);
    }
}
