use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::Parser;
use colored::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use emotion_mesh::args::Args;
use emotion_mesh::camera::FrameSource;
use emotion_mesh::classifier::EmotionClassifier;
use emotion_mesh::config::AppConfig;
use emotion_mesh::engine::create_engine;
use emotion_mesh::frame_adapter;
use emotion_mesh::hud::HudPainter;
use emotion_mesh::output::WindowOutput;
use emotion_mesh::overlay::{self, Canvas, OverlayStyle};
use emotion_mesh::pipeline::{FaceAnalyzer, FaceGeometry};
use emotion_mesh::ttf::FontRenderer;

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

fn list_cameras() -> Result<()> {
    let cameras = nokhwa::query(nokhwa::utils::ApiBackend::Auto)?;
    println!("{}", "Available Cameras:".bold());
    println!("{:<5} | {:<30} | {:<10}", "Index", "Name", "Misc");
    println!("{}", "-".repeat(60));
    for cam in cameras {
        println!("{:<5} | {:<30} | {:?}", cam.index(), cam.human_name(), cam.misc());
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("emotion_mesh=info")),
        )
        .init();

    let args = Args::parse();

    if args.list {
        return list_cameras();
    }

    // 0. Config
    let mut config = AppConfig::load_from(&args.config)?;
    args.apply(&mut config);

    // 1. Camera
    let camera = FrameSource::spawn(&config.camera)?;
    println!("{}", format!("Opened camera: {}", camera.name()).green());

    // 2. Engine; a failure leaves the preview running without analysis.
    let mut analyzer = FaceAnalyzer::new(
        create_engine(&config.engine),
        EmotionClassifier::new(config.classifier),
        config.stall_timeout(),
    );
    if analyzer.is_degraded() {
        println!("{}", "Landmark engine unavailable, showing preview only.".red());
    } else {
        println!("{}", format!("Engine backend: {:?}", config.engine.backend).green());
    }

    // 3. Window, sized to the first upright frame.
    let started = Instant::now();
    let first = loop {
        if let Some(frame) = camera.latest() {
            break frame;
        }
        if started.elapsed() > FIRST_FRAME_TIMEOUT {
            bail!("camera delivered no frames within {:?}", FIRST_FRAME_TIMEOUT);
        }
        std::thread::sleep(Duration::from_millis(5));
    };
    let preview = frame_adapter::convert_frame(&first)?;
    let mut window = WindowOutput::new(
        "Emotion Mesh",
        preview.width() as usize,
        preview.height() as usize,
        config.ui.window_scale,
    )?;

    println!("Controls: [O] Overlay  [D] Mesh Dots  [M] Mirror  [Esc] Quit");

    let painter = HudPainter::new(
        FontRenderer::try_load(&config.ui.font_family),
        config.ui.font_size_pt,
        config.ui.window_scale.max(2),
    );
    let mut style = OverlayStyle::from_config(&config.overlay);
    let mut show_overlay = config.overlay.show;
    let mut mirror = config.camera.mirror;

    let mut hud = analyzer.hud().clone();
    let mut face: Option<FaceGeometry> = None;
    let mut preview_rgb: Vec<u8> = Vec::new();
    let mut display_buffer: Vec<u8> = Vec::new();
    let mut pending = Some(first);

    // 4. Loop
    'running: while window.is_open() {
        for key in window.keys_pressed() {
            match key {
                minifb::Key::Escape => break 'running,
                minifb::Key::O => show_overlay = !show_overlay,
                minifb::Key::D => style.show_dots = !style.show_dots,
                minifb::Key::M => mirror = !mirror,
                _ => {}
            }
        }

        let frame = pending.take().or_else(|| camera.latest());
        if let Some(frame) = frame {
            analyzer.offer(&frame);

            match frame_adapter::convert_frame(&frame) {
                Ok(mut upright) => {
                    if mirror {
                        image::imageops::flip_horizontal_in_place(&mut upright);
                    }
                    let (w, h) = upright.dimensions();
                    window.resize(w as usize, h as usize);
                    preview_rgb.clear();
                    preview_rgb.extend(upright.pixels().flat_map(|p| [p[0], p[1], p[2]]));
                }
                Err(e) => warn!(error = %e, "preview frame skipped"),
            }
        }

        if let Some(update) = analyzer.poll() {
            if update.hud != hud {
                let text = update.hud.text();
                window.set_title(&format!("Emotion Mesh - {} {}", text.emoji, text.title));
            }
            hud = update.hud;
            face = update.face;
        }

        let (view_w, view_h) = window.size();
        display_buffer.clear();
        display_buffer.extend_from_slice(&preview_rgb);
        display_buffer.resize(view_w * view_h * 3, 0);
        let mut canvas = Canvas {
            buffer: &mut display_buffer,
            width: view_w,
            height: view_h,
        };

        if show_overlay {
            if let Some(face) = face.as_ref().filter(|f| f.image_width > 0 && f.image_height > 0) {
                let points = overlay::project(
                    &face.landmarks,
                    face.image_width as f32,
                    face.image_height as f32,
                    view_w as f32,
                    view_h as f32,
                    mirror,
                );
                overlay::draw_overlay(&mut canvas, &points, &style);
            }
        }
        painter.draw(&mut canvas, &hud.text());

        window.update(&display_buffer)?;
    }

    info!(stats = ?analyzer.stats(), "shutting down");
    analyzer.close();
    Ok(())
}
