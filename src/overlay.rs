//! Face mesh overlay: projection from normalized landmarks to view pixels,
//! contour topology and a small software rasterizer for the preview.

use crate::config::OverlayConfig;
use crate::types::Landmarks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContourGroup {
    FaceOval,
    LeftEye,
    RightEye,
    LipsOuter,
    LipsInner,
    LeftEyebrow,
    RightEyebrow,
}

pub struct Contour {
    pub group: ContourGroup,
    pub connections: &'static [(usize, usize)],
}

const FACE_OVAL: &[(usize, usize)] = &[
    (10, 338), (338, 297), (297, 332), (332, 284), (284, 251), (251, 389), (389, 356),
    (356, 454), (454, 323), (323, 361), (361, 288), (288, 397), (397, 365), (365, 379),
    (379, 378), (378, 400), (400, 377), (377, 152), (152, 148), (148, 176), (176, 149),
    (149, 150), (150, 136), (136, 172), (172, 58), (58, 132), (132, 93), (93, 234),
    (234, 127), (127, 162), (162, 21), (21, 54), (54, 103), (103, 67), (67, 109), (109, 10),
];

const LEFT_EYE: &[(usize, usize)] = &[
    (263, 249), (249, 390), (390, 373), (373, 374), (374, 380), (380, 381), (381, 382),
    (382, 362), (263, 466), (466, 388), (388, 387), (387, 386), (386, 385), (385, 384),
    (384, 398), (398, 362),
];

const RIGHT_EYE: &[(usize, usize)] = &[
    (33, 7), (7, 163), (163, 144), (144, 145), (145, 153), (153, 154), (154, 155),
    (155, 133), (33, 246), (246, 161), (161, 160), (160, 159), (159, 158), (158, 157),
    (157, 173), (173, 133),
];

const LIPS_OUTER: &[(usize, usize)] = &[
    (61, 146), (146, 91), (91, 181), (181, 84), (84, 17), (17, 314), (314, 405), (405, 321),
    (321, 375), (375, 291), (61, 185), (185, 40), (40, 39), (39, 37), (37, 0), (0, 267),
    (267, 269), (269, 270), (270, 409), (409, 291),
];

const LIPS_INNER: &[(usize, usize)] = &[
    (78, 95), (95, 88), (88, 178), (178, 87), (87, 14), (14, 317), (317, 402), (402, 318),
    (318, 324), (324, 308), (78, 191), (191, 80), (80, 81), (81, 82), (82, 13), (13, 312),
    (312, 311), (311, 310), (310, 415), (415, 308),
];

const LEFT_EYEBROW: &[(usize, usize)] = &[
    (276, 283), (283, 282), (282, 295), (295, 285), (300, 293), (293, 334), (334, 296),
    (296, 336),
];

const RIGHT_EYEBROW: &[(usize, usize)] = &[
    (46, 53), (53, 52), (52, 65), (65, 55), (70, 63), (63, 105), (105, 66), (66, 107),
];

pub static CONTOURS: [Contour; 7] = [
    Contour { group: ContourGroup::FaceOval, connections: FACE_OVAL },
    Contour { group: ContourGroup::LeftEye, connections: LEFT_EYE },
    Contour { group: ContourGroup::RightEye, connections: RIGHT_EYE },
    Contour { group: ContourGroup::LipsOuter, connections: LIPS_OUTER },
    Contour { group: ContourGroup::LipsInner, connections: LIPS_INNER },
    Contour { group: ContourGroup::LeftEyebrow, connections: LEFT_EYEBROW },
    Contour { group: ContourGroup::RightEyebrow, connections: RIGHT_EYEBROW },
];

/// Landmarks in view pixels, same order as the source set.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenPoints {
    pub points: Vec<(f32, f32)>,
}

impl ScreenPoints {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Segments of a contour whose endpoints both exist.
    pub fn segments<'a>(
        &'a self,
        contour: &'a Contour,
    ) -> impl Iterator<Item = ((f32, f32), (f32, f32))> + 'a {
        contour
            .connections
            .iter()
            .filter_map(move |&(a, b)| Some((*self.points.get(a)?, *self.points.get(b)?)))
    }
}

/// Center-crop projection of normalized landmarks into a view. With
/// `mirror` the x axis is flipped, as for a front camera preview.
pub fn project(
    landmarks: &Landmarks,
    image_w: f32,
    image_h: f32,
    view_w: f32,
    view_h: f32,
    mirror: bool,
) -> ScreenPoints {
    let scale = (view_w / image_w).max(view_h / image_h);
    let offset_x = (view_w - image_w * scale) / 2.0;
    let offset_y = (view_h - image_h * scale) / 2.0;

    let points = landmarks
        .points()
        .iter()
        .map(|p| {
            let x = if mirror { 1.0 - p.x } else { p.x };
            (x * image_w * scale + offset_x, p.y * image_h * scale + offset_y)
        })
        .collect();

    ScreenPoints { points }
}

/// RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parses `#RRGGBB` or `#AARRGGBB`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim_start_matches('#');
        let value = u32::from_str_radix(digits, 16).ok()?;
        match digits.len() {
            6 => Some(Self::rgba((value >> 16) as u8, (value >> 8) as u8, value as u8, 255)),
            8 => Some(Self::rgba(
                (value >> 16) as u8,
                (value >> 8) as u8,
                value as u8,
                (value >> 24) as u8,
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stroke {
    pub color: Color,
    pub width: f32,
}

#[derive(Debug, Clone)]
pub struct OverlayStyle {
    pub show_dots: bool,
    pub dot_stride: usize,
    pub dot_radius: f32,
    pub dot_color: Color,
    pub eyes: Stroke,
    pub lips: Stroke,
    pub brows: Stroke,
    pub oval: Stroke,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self::from_config(&OverlayConfig::default())
    }
}

impl OverlayStyle {
    /// Unparseable colors fall back to opaque white.
    pub fn from_config(config: &OverlayConfig) -> Self {
        let color = |hex: &str| Color::from_hex(hex).unwrap_or(Color::rgba(255, 255, 255, 255));
        Self {
            show_dots: config.show_dots,
            dot_stride: config.dot_stride.max(1),
            dot_radius: config.dot_radius,
            dot_color: color(&config.dot_color_hex),
            eyes: Stroke { color: color(&config.eye_color_hex), width: 4.0 },
            lips: Stroke { color: color(&config.lip_color_hex), width: 4.0 },
            brows: Stroke { color: color(&config.brow_color_hex), width: 4.0 },
            oval: Stroke { color: color(&config.oval_color_hex), width: 2.0 },
        }
    }

    pub fn stroke(&self, group: ContourGroup) -> Stroke {
        match group {
            ContourGroup::FaceOval => self.oval,
            ContourGroup::LeftEye | ContourGroup::RightEye => self.eyes,
            ContourGroup::LipsOuter | ContourGroup::LipsInner => self.lips,
            ContourGroup::LeftEyebrow | ContourGroup::RightEyebrow => self.brows,
        }
    }
}

/// RGB8 target for the rasterizer.
pub struct Canvas<'a> {
    pub buffer: &'a mut [u8],
    pub width: usize,
    pub height: usize,
}

impl Canvas<'_> {
    /// Alpha-blends one pixel; outside the canvas is ignored.
    pub fn blend(&mut self, x: i32, y: i32, color: Color) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        let idx = (y as usize * self.width + x as usize) * 3;
        let Some(px) = self.buffer.get_mut(idx..idx + 3) else {
            return;
        };
        let a = color.a as u32;
        for (dst, src) in px.iter_mut().zip([color.r, color.g, color.b]) {
            *dst = ((src as u32 * a + *dst as u32 * (255 - a)) / 255) as u8;
        }
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: Color) {
        for py in y..y + height {
            for px in x..x + width {
                self.blend(px, py, color);
            }
        }
    }

    pub fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Color) {
        let r = radius.max(0.5);
        let (x0, x1) = ((cx - r).floor() as i32, (cx + r).ceil() as i32);
        let (y0, y1) = ((cy - r).floor() as i32, (cy + r).ceil() as i32);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= r * r {
                    self.blend(x, y, color);
                }
            }
        }
    }

    /// Thick line as a run of filled discs.
    pub fn draw_line(&mut self, from: (f32, f32), to: (f32, f32), stroke: Stroke) {
        let (dx, dy) = (to.0 - from.0, to.1 - from.1);
        let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as usize;
        let radius = stroke.width / 2.0;

        // Opaque strokes can overdraw; translucent ones stamp once per pixel.
        if stroke.color.a == 255 {
            for i in 0..=steps {
                let t = i as f32 / steps as f32;
                self.fill_circle(from.0 + dx * t, from.1 + dy * t, radius, stroke.color);
            }
            return;
        }

        let mut seen = std::collections::HashSet::new();
        let r = radius.max(0.5);
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            let (cx, cy) = (from.0 + dx * t, from.1 + dy * t);
            for y in (cy - r).floor() as i32..=(cy + r).ceil() as i32 {
                for x in (cx - r).floor() as i32..=(cx + r).ceil() as i32 {
                    let ox = x as f32 + 0.5 - cx;
                    let oy = y as f32 + 0.5 - cy;
                    if ox * ox + oy * oy <= r * r && seen.insert((x, y)) {
                        self.blend(x, y, stroke.color);
                    }
                }
            }
        }
    }
}

/// Draws dots and contour polylines for one face.
pub fn draw_overlay(canvas: &mut Canvas<'_>, points: &ScreenPoints, style: &OverlayStyle) {
    if style.show_dots {
        for &(x, y) in points.points.iter().step_by(style.dot_stride.max(1)) {
            canvas.fill_circle(x, y, style.dot_radius, style.dot_color);
        }
    }

    for contour in CONTOURS.iter() {
        let stroke = style.stroke(contour.group);
        for (from, to) in points.segments(contour) {
            canvas.draw_line(from, to, stroke);
        }
    }
}
