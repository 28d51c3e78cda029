use anyhow::Result;

pub struct WindowOutput {
    window: minifb::Window,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl WindowOutput {
    pub fn new(title: &str, width: usize, height: usize, scale: usize) -> Result<Self> {
        let scale = match scale {
            2 => minifb::Scale::X2,
            4 => minifb::Scale::X4,
            _ => minifb::Scale::X1,
        };
        let mut window = minifb::Window::new(
            title,
            width,
            height,
            minifb::WindowOptions {
                resize: true,
                scale,
                ..minifb::WindowOptions::default()
            },
        )
        .map_err(|e| anyhow::anyhow!("Failed to create window: {}", e))?;

        window.set_target_fps(60);

        Ok(Self {
            window,
            buffer: vec![0; width * height],
            width,
            height,
        })
    }

    pub fn is_open(&self) -> bool {
        self.window.is_open()
    }

    pub fn keys_pressed(&self) -> Vec<minifb::Key> {
        self.window.get_keys_pressed(minifb::KeyRepeat::No)
    }

    pub fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }

    /// Size the preview is drawn at.
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Presents an RGB8 buffer of the current size.
    pub fn update(&mut self, buffer: &[u8]) -> Result<()> {
        if self.buffer.len() != self.width * self.height {
            self.buffer.resize(self.width * self.height, 0);
        }

        for (dst, chunk) in self.buffer.iter_mut().zip(buffer.chunks_exact(3)) {
            let r = chunk[0] as u32;
            let g = chunk[1] as u32;
            let b = chunk[2] as u32;
            *dst = (r << 16) | (g << 8) | b;
        }

        self.window
            .update_with_buffer(&self.buffer, self.width, self.height)
            .map_err(|e| anyhow::anyhow!("Window update failed: {}", e))
    }

    /// Keeps the window buffer in step with the camera resolution.
    pub fn resize(&mut self, width: usize, height: usize) {
        if width != self.width || height != self.height {
            self.width = width;
            self.height = height;
            self.buffer.resize(width * height, 0);
        }
    }
}
