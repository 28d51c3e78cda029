use rusttype::{point, Font, Scale};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub struct FontRenderer {
    font: Font<'static>,
}

impl FontRenderer {
    /// Looks for `<family>.ttf` in the usual macOS and Linux font folders
    /// and the working directory.
    pub fn try_load(family: &str) -> Option<Self> {
        let file = family.replace(' ', "");
        let paths = [
            format!("/Library/Fonts/{family}.ttf"),
            format!("/System/Library/Fonts/{family}.ttf"),
            format!("/System/Library/Fonts/Supplemental/{family}.ttf"),
            format!("/usr/share/fonts/truetype/{family}.ttf"),
            format!("/usr/share/fonts/truetype/dejavu/{file}.ttf"),
            format!("/usr/share/fonts/TTF/{file}.ttf"),
            format!("{family}.ttf"),
        ];

        for p in paths.iter() {
            if !Path::new(p).exists() {
                continue;
            }
            if let Some(font) = fs::read(p).ok().and_then(Font::try_from_vec) {
                info!(path = %p, "loaded HUD font");
                return Some(Self { font });
            }
        }

        warn!(family, "font family not found, using bitmap font");
        None
    }

    #[allow(clippy::too_many_arguments)]
    pub fn draw_text(
        &self,
        buffer: &mut [u8],
        width: usize,
        height: usize,
        x: usize,
        y: usize,
        text: &str,
        color: (u8, u8, u8),
        size_pt: f32,
    ) {
        let scale = Scale::uniform(size_pt);
        let v_metrics = self.font.v_metrics(scale);
        let start = point(x as f32, y as f32 + v_metrics.ascent);

        for glyph in self.font.layout(text, scale, start) {
            let Some(bb) = glyph.pixel_bounding_box() else {
                continue;
            };
            glyph.draw(|gx, gy, coverage| {
                let px = bb.min.x + gx as i32;
                let py = bb.min.y + gy as i32;
                if px < 0 || py < 0 || px as usize >= width || py as usize >= height {
                    return;
                }
                let idx = (py as usize * width + px as usize) * 3;
                if idx + 2 >= buffer.len() {
                    return;
                }
                // Coverage-weighted blend gives antialiased edges.
                for (dst, src) in buffer[idx..idx + 3].iter_mut().zip([color.0, color.1, color.2]) {
                    *dst = (src as f32 * coverage + *dst as f32 * (1.0 - coverage)) as u8;
                }
            });
        }
    }

    pub fn measure_height(&self, size_pt: f32) -> usize {
        let scale = Scale::uniform(size_pt);
        let v_metrics = self.font.v_metrics(scale);
        (v_metrics.ascent - v_metrics.descent + v_metrics.line_gap) as usize
    }
}
