//! Frame-to-HUD orchestration: admission, conversion, dispatch, and turning
//! engine reports into UI updates.

use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::classifier::EmotionClassifier;
use crate::engine::LandmarkEngine;
use crate::error::{EngineResult, FrameError};
use crate::frame_adapter;
use crate::head_pose;
use crate::hud::HudState;
use crate::inference::{Clock, GatewayEvent, GatewayStats, InferenceGateway, SystemClock};
use crate::types::{Frame, InferenceResult, Landmarks};

/// Landmarks of the tracked face with the size of the image they are
/// normalized to.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceGeometry {
    pub landmarks: Landmarks,
    pub image_width: u32,
    pub image_height: u32,
}

/// One engine report, ready for the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisUpdate {
    pub hud: HudState,
    /// `None` clears the overlay.
    pub face: Option<FaceGeometry>,
}

struct Connected<C: Clock> {
    gateway: InferenceGateway<Box<dyn LandmarkEngine>, C>,
    events: Receiver<GatewayEvent>,
}

pub struct FaceAnalyzer<C: Clock = SystemClock> {
    engine: Option<Connected<C>>,
    classifier: EmotionClassifier,
    hud: HudState,
    /// Upright size of each dispatched frame, keyed by request timestamp,
    /// until its report is applied.
    pending_sizes: BTreeMap<u64, (u32, u32)>,
    last_size: (u32, u32),
}

impl FaceAnalyzer<SystemClock> {
    pub fn new(
        engine: EngineResult<Box<dyn LandmarkEngine>>,
        classifier: EmotionClassifier,
        stall_timeout: Option<Duration>,
    ) -> Self {
        Self::with_clock(engine, classifier, SystemClock, stall_timeout)
    }
}

impl<C: Clock> FaceAnalyzer<C> {
    /// A failed engine puts the analyzer in degraded mode: every frame is
    /// dropped and the HUD shows the error.
    pub fn with_clock(
        engine: EngineResult<Box<dyn LandmarkEngine>>,
        classifier: EmotionClassifier,
        clock: C,
        stall_timeout: Option<Duration>,
    ) -> Self {
        let (engine, hud) = match engine {
            Ok(engine) => {
                let (gateway, events) = InferenceGateway::with_clock(engine, clock, stall_timeout);
                (Some(Connected { gateway, events }), HudState::Idle)
            }
            Err(e) => {
                error!(error = %e, "landmark engine unavailable, running without inference");
                (None, HudState::EngineError(e.to_string()))
            }
        };

        Self {
            engine,
            classifier,
            hud,
            pending_sizes: BTreeMap::new(),
            last_size: (0, 0),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.engine.is_none()
    }

    pub fn hud(&self) -> &HudState {
        &self.hud
    }

    pub fn stats(&self) -> GatewayStats {
        self.engine
            .as_ref()
            .map(|c| c.gateway.stats())
            .unwrap_or_default()
    }

    /// Offers a camera frame. Returns whether it was dispatched; busy,
    /// degraded and unconvertible frames are dropped.
    pub fn offer(&mut self, frame: &Frame) -> bool {
        let Some(connected) = &mut self.engine else {
            return false;
        };

        let mut size = (0, 0);
        let admitted = connected.gateway.submit_with(|| {
            let image = frame_adapter::convert_frame(frame)?;
            size = image.dimensions();
            Ok::<_, FrameError>(image)
        });

        match admitted {
            Ok(true) => {
                self.pending_sizes
                    .insert(connected.gateway.last_timestamp_ms(), size);
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!(error = %e, "dropping unconvertible frame");
                false
            }
        }
    }

    /// Applies every queued engine report and returns the newest.
    pub fn poll(&mut self) -> Option<AnalysisUpdate> {
        let mut latest = None;
        loop {
            let event = match &self.engine {
                Some(c) => c.events.try_recv(),
                None => return latest,
            };
            match event {
                Ok(event) => latest = Some(self.apply(event)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return latest,
            }
        }
    }

    /// Waits up to `timeout` for the next engine report.
    pub fn poll_timeout(&mut self, timeout: Duration) -> Option<AnalysisUpdate> {
        let event = match &self.engine {
            Some(c) => c.events.recv_timeout(timeout),
            None => return None,
        };
        match event {
            Ok(event) => Some(self.apply(event)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn close(self) {
        if let Some(connected) = self.engine {
            let stats = connected.gateway.stats();
            info!(
                submitted = stats.submitted,
                rejected_busy = stats.rejected_busy,
                completed = stats.completed,
                failed = stats.failed,
                timed_out = stats.timed_out,
                "closing landmark engine"
            );
            connected.gateway.close();
        }
    }

    fn apply(&mut self, event: GatewayEvent) -> AnalysisUpdate {
        let update = match event {
            GatewayEvent::Completed(result) => {
                if let Some(size) = self.take_size(result.timestamp_ms) {
                    self.last_size = size;
                }
                self.analyze(result)
            }
            GatewayEvent::Failed { timestamp_ms, error } => {
                self.take_size(timestamp_ms);
                AnalysisUpdate {
                    hud: HudState::EngineError(error.to_string()),
                    face: None,
                }
            }
        };
        self.hud = update.hud.clone();
        update
    }

    /// Removes the size recorded for `timestamp_ms` along with any older
    /// entries, whose reports were discarded after a stall timeout.
    fn take_size(&mut self, timestamp_ms: u64) -> Option<(u32, u32)> {
        let newer = self.pending_sizes.split_off(&timestamp_ms.saturating_add(1));
        let size = self.pending_sizes.remove(&timestamp_ms);
        self.pending_sizes = newer;
        size
    }

    fn analyze(&self, result: InferenceResult) -> AnalysisUpdate {
        let (image_width, image_height) = self.last_size;

        let Some(landmarks) = result.landmarks else {
            return AnalysisUpdate {
                hud: HudState::Searching,
                face: None,
            };
        };

        let verdict = self.classifier.classify_optional(result.blendshapes.as_ref());
        let pose = head_pose::estimate(&landmarks);

        AnalysisUpdate {
            hud: HudState::Tracking { verdict, pose },
            face: Some(FaceGeometry {
                landmarks,
                image_width,
                image_height,
            }),
        }
    }
}
