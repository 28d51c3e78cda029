use crate::font;
use crate::overlay::{Canvas, Color};
use crate::ttf::FontRenderer;
use crate::types::{EmotionVerdict, PoseAngles};

/// What the status panel is showing.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HudState {
    /// No result received yet.
    #[default]
    Idle,
    /// The engine answered but saw no face.
    Searching,
    Tracking {
        verdict: EmotionVerdict,
        pose: PoseAngles,
    },
    /// The engine could not be created or stopped working.
    EngineError(String),
}

/// Display strings for one HUD state.
#[derive(Debug, Clone, PartialEq)]
pub struct HudText {
    pub emoji: &'static str,
    pub title: String,
    pub detail: String,
    /// 0..=100
    pub progress: u8,
    pub yaw: String,
    pub pitch: String,
    pub roll: String,
}

const UNKNOWN_ANGLE: &str = "\u{2014}";

fn angle_text(axis: char, value: Option<i32>) -> String {
    match value {
        Some(v) => format!("{axis}: {v}\u{b0}"),
        None => format!("{axis}: {UNKNOWN_ANGLE}"),
    }
}

impl HudState {
    pub fn text(&self) -> HudText {
        let (emoji, title, detail, progress, pose) = match self {
            HudState::Idle => (
                "\u{23F3}",
                "Starting...".to_string(),
                "Waiting for camera".to_string(),
                0,
                PoseAngles::Unknown,
            ),
            HudState::Searching => (
                "\u{1F50D}",
                "Searching...".to_string(),
                "No Face Detected".to_string(),
                0,
                PoseAngles::Unknown,
            ),
            HudState::Tracking { verdict, pose } => {
                let percent = (verdict.confidence * 100.0).round().clamp(0.0, 100.0) as u8;
                (
                    verdict.emotion.emoji(),
                    verdict.emotion.label().to_string(),
                    format!("Confidence: {percent}%"),
                    // The bar truncates where the label rounds.
                    (verdict.confidence * 100.0).clamp(0.0, 100.0) as u8,
                    *pose,
                )
            }
            HudState::EngineError(message) => (
                "\u{26A0}",
                "Engine Error".to_string(),
                message.clone(),
                0,
                PoseAngles::Unknown,
            ),
        };

        let (yaw, pitch, roll) = match pose {
            PoseAngles::Known { yaw, pitch, roll } => (Some(yaw), Some(pitch), Some(roll)),
            PoseAngles::Unknown => (None, None, None),
        };

        HudText {
            emoji,
            title,
            detail,
            progress,
            yaw: angle_text('Y', yaw),
            pitch: angle_text('P', pitch),
            roll: angle_text('R', roll),
        }
    }
}

/// Draws the status panel, with a TrueType font when one was found and the
/// bitmap font otherwise.
pub struct HudPainter {
    font: Option<FontRenderer>,
    size_pt: f32,
    bitmap_scale: usize,
}

impl HudPainter {
    pub fn new(font: Option<FontRenderer>, size_pt: u32, bitmap_scale: usize) -> Self {
        Self {
            font,
            size_pt: size_pt as f32,
            bitmap_scale: bitmap_scale.max(1),
        }
    }

    fn line_height(&self) -> usize {
        match &self.font {
            Some(fr) => fr.measure_height(self.size_pt) + 5,
            None => 8 * self.bitmap_scale,
        }
    }

    fn draw_text(&self, canvas: &mut Canvas<'_>, x: usize, y: usize, text: &str, color: (u8, u8, u8)) {
        match &self.font {
            Some(fr) => fr.draw_text(canvas.buffer, canvas.width, canvas.height, x, y, text, color, self.size_pt),
            None => font::draw_text_line(canvas.buffer, canvas.width, canvas.height, x, y, text, color, self.bitmap_scale),
        }
    }

    /// Panel along the bottom edge: title, detail, confidence bar, then the
    /// three pose angles on one line.
    pub fn draw(&self, canvas: &mut Canvas<'_>, text: &HudText) {
        let line = self.line_height();
        let panel_h = line * 4 + 20;
        let top = canvas.height.saturating_sub(panel_h);

        canvas.fill_rect(
            0,
            top as i32,
            canvas.width as i32,
            panel_h as i32,
            Color::rgba(0, 0, 0, 150),
        );

        let mut y = top + 8;
        self.draw_text(canvas, 10, y, &text.title, (255, 255, 255));
        y += line;
        self.draw_text(canvas, 10, y, &text.detail, (200, 200, 200));
        y += line;

        let bar_w = canvas.width.saturating_sub(20);
        let filled = bar_w * text.progress as usize / 100;
        let bar_h = (line / 2).max(2);
        canvas.fill_rect(10, y as i32, bar_w as i32, bar_h as i32, Color::rgba(80, 80, 80, 255));
        canvas.fill_rect(10, y as i32, filled as i32, bar_h as i32, Color::rgba(0, 229, 255, 255));
        y += line;

        let pose = format!("{}   {}   {}", text.yaw, text.pitch, text.roll);
        self.draw_text(canvas, 10, y, &pose, (255, 215, 0));
    }
}
