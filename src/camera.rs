use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use image::{ImageBuffer, Rgb};
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    Camera,
};
use tracing::{debug, info, warn};

use crate::config::CameraConfig;
use crate::types::Frame;

pub struct CameraSource {
    camera: Camera,
}

impl CameraSource {
    pub fn new(config: &CameraConfig) -> Result<Self> {
        let cam_index = CameraIndex::Index(config.index);
        let wanted = CameraFormat::new(
            Resolution::new(config.width, config.height),
            FrameFormat::MJPEG,
            30,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));
        let mut camera = Camera::new(cam_index, requested).context("Failed to create camera instance")?;

        camera
            .open_stream()
            .map_err(|e| anyhow!(e))
            .context("Failed to open camera stream")?;

        info!(camera = %camera.info().human_name(), format = %camera.camera_format(), "camera opened");

        Ok(Self { camera })
    }

    pub fn capture(&mut self) -> Result<ImageBuffer<Rgb<u8>, Vec<u8>>> {
        let frame = self.camera.frame().map_err(|e| anyhow!(e)).context("Failed to get frame")?;
        let decoded = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| anyhow!(e))
            .context("Failed to decode frame")?;
        Ok(decoded)
    }

    pub fn name(&self) -> String {
        self.camera.info().human_name()
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!(error = %e, "failed to stop camera stream");
        }
    }
}

/// Packs a decoded RGB image into a 4-byte-per-pixel camera frame.
pub fn to_frame(image: &ImageBuffer<Rgb<u8>, Vec<u8>>, rotation_degrees: i32) -> Frame {
    let mut data = Vec::with_capacity(image.as_raw().len() / 3 * 4);
    for pixel in image.pixels() {
        data.extend_from_slice(&[pixel[0], pixel[1], pixel[2], 255]);
    }
    Frame::packed(image.width(), image.height(), rotation_degrees, data)
}

/// Holds at most one undelivered frame. A newer frame replaces it.
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: Mutex<Option<Frame>>,
}

impl LatestFrame {
    /// Stores `frame`, returning whether an undelivered one was dropped.
    pub fn put(&self, frame: Frame) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.replace(frame).is_some()
    }

    pub fn take(&self) -> Option<Frame> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Captures on a background thread, keeping only the newest frame.
pub struct FrameSource {
    name: String,
    latest: Arc<LatestFrame>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FrameSource {
    pub fn spawn(config: &CameraConfig) -> Result<Self> {
        let config = config.clone();
        let latest = Arc::new(LatestFrame::default());
        let latest_worker = Arc::clone(&latest);
        let (tx_ready, rx_ready) = mpsc::channel::<Result<String>>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_worker = Arc::clone(&stop);

        let worker = thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                // Some backends tie the device to the thread that opened it.
                let mut camera = match CameraSource::new(&config) {
                    Ok(camera) => camera,
                    Err(e) => {
                        let _ = tx_ready.send(Err(e));
                        return;
                    }
                };
                let _ = tx_ready.send(Ok(camera.name()));
                capture_loop(&mut camera, config.rotation_degrees, &latest_worker, &stop_worker);
            })
            .context("Failed to start capture thread")?;

        let name = rx_ready
            .recv()
            .map_err(|_| anyhow!("capture thread exited before opening the camera"))??;

        Ok(Self {
            name,
            latest,
            stop,
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Newest frame captured since the last call, if any.
    pub fn latest(&self) -> Option<Frame> {
        self.latest.take()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn capture_loop(camera: &mut CameraSource, rotation_degrees: i32, latest: &LatestFrame, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        let image = match camera.capture() {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "camera capture failed");
                thread::sleep(std::time::Duration::from_millis(50));
                continue;
            }
        };

        if latest.put(to_frame(&image, rotation_degrees)) {
            debug!("consumer is behind, replaced an undelivered frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_image_becomes_packed_rgba_frame() {
        let image = ImageBuffer::from_fn(3, 2, |x, y| Rgb([x as u8, y as u8, 9]));
        let frame = to_frame(&image, 90);

        assert_eq!(frame.row_stride, 12);
        assert_eq!(frame.pixel_stride, 4);
        assert_eq!(frame.rotation_degrees, 90);
        assert_eq!(&frame.data[5 * 4..6 * 4], &[2, 1, 9, 255]);
    }

    #[test]
    fn newest_frame_replaces_undelivered_ones() {
        let latest = LatestFrame::default();
        let frame = |rotation| Frame::packed(1, 1, rotation, vec![0; 4]);

        assert!(!latest.put(frame(0)));
        assert!(latest.put(frame(90)));
        assert!(latest.put(frame(180)));

        assert_eq!(latest.take().map(|f| f.rotation_degrees), Some(180));
        assert!(latest.take().is_none());
    }
}
