//! Single-slot admission in front of the landmark engine.
//!
//! At most one request is ever in flight. Frames that arrive while the
//! engine is busy are dropped, never queued: the camera already keeps only
//! the latest frame, so a queue here would only add latency.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, trace, warn};

use crate::engine::LandmarkEngine;
use crate::error::EngineError;
use crate::types::{InferenceResult, UprightImage};

/// Source of wall-clock milliseconds. The gateway never trusts it to be
/// monotonic.
pub trait Clock: Send {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// What the engine reported for an admitted frame.
#[derive(Debug)]
pub enum GatewayEvent {
    Completed(InferenceResult),
    Failed { timestamp_ms: u64, error: EngineError },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub submitted: u64,
    pub rejected_busy: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

/// State shared between the submitting thread and whichever thread the
/// engine completes on.
#[derive(Debug)]
struct Slot {
    /// Timestamp of the in-flight request, 0 when free.
    in_flight: AtomicU64,
    /// Held from releasing the slot until the event is queued, so reports
    /// reach the consumer in dispatch order whatever thread they finish on.
    events: Mutex<Sender<GatewayEvent>>,
    dispatched_at_ms: AtomicU64,
    submitted: AtomicU64,
    rejected_busy: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl Slot {
    fn new(events: Sender<GatewayEvent>) -> Self {
        Self {
            in_flight: AtomicU64::new(0),
            events: Mutex::new(events),
            dispatched_at_ms: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            rejected_busy: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    /// Frees the slot only if `timestamp_ms` still owns it.
    fn release(&self, timestamp_ms: u64) -> bool {
        self.in_flight
            .compare_exchange(timestamp_ms, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Handed to the engine with every request. Reporting through it (or
/// dropping it) frees the gateway slot.
pub struct Completion {
    timestamp_ms: u64,
    slot: Arc<Slot>,
    reported: bool,
}

impl Completion {
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn succeed(mut self, result: InferenceResult) {
        self.finish(Ok(result));
    }

    pub fn fail(mut self, error: EngineError) {
        self.finish(Err(error));
    }

    fn finish(&mut self, outcome: Result<InferenceResult, EngineError>) {
        self.reported = true;

        let events = self.slot.events.lock().unwrap_or_else(PoisonError::into_inner);

        // Free the slot first so the next frame can go out while the result
        // is still being consumed. Its report queues behind ours.
        if !self.slot.release(self.timestamp_ms) {
            debug!(
                timestamp_ms = self.timestamp_ms,
                "discarding completion of a request that already timed out"
            );
            return;
        }

        let event = match outcome {
            Ok(result) => {
                self.slot.completed.fetch_add(1, Ordering::Relaxed);
                GatewayEvent::Completed(result)
            }
            Err(error) => {
                self.slot.failed.fetch_add(1, Ordering::Relaxed);
                warn!(timestamp_ms = self.timestamp_ms, %error, "inference failed");
                GatewayEvent::Failed {
                    timestamp_ms: self.timestamp_ms,
                    error,
                }
            }
        };

        // The consumer may already be gone during shutdown.
        let _ = events.send(event);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.reported {
            self.finish(Err(EngineError::Abandoned));
        }
    }
}

pub struct InferenceGateway<E: LandmarkEngine, C: Clock = SystemClock> {
    engine: E,
    clock: C,
    slot: Arc<Slot>,
    last_timestamp_ms: u64,
    stall_timeout: Option<Duration>,
}

impl<E: LandmarkEngine> InferenceGateway<E, SystemClock> {
    pub fn new(engine: E) -> (Self, Receiver<GatewayEvent>) {
        Self::with_clock(engine, SystemClock, None)
    }
}

impl<E: LandmarkEngine, C: Clock> InferenceGateway<E, C> {
    /// `stall_timeout` of `None` keeps a stuck request in flight forever.
    pub fn with_clock(
        engine: E,
        clock: C,
        stall_timeout: Option<Duration>,
    ) -> (Self, Receiver<GatewayEvent>) {
        let (events, rx) = mpsc::channel();
        let gateway = Self {
            engine,
            clock,
            slot: Arc::new(Slot::new(events)),
            last_timestamp_ms: 0,
            stall_timeout,
        };
        (gateway, rx)
    }

    /// Dispatches `image` unless a request is already in flight. Returns
    /// whether the frame was admitted.
    pub fn submit(&mut self, image: UprightImage) -> bool {
        match self.submit_with(|| Ok::<_, Infallible>(image)) {
            Ok(admitted) => admitted,
            Err(never) => match never {},
        }
    }

    /// Like [`submit`](Self::submit), but only builds the image once the
    /// frame is admitted. A `prepare` error leaves the slot free.
    pub fn submit_with<F, Err>(&mut self, prepare: F) -> Result<bool, Err>
    where
        F: FnOnce() -> Result<UprightImage, Err>,
    {
        let in_flight = self.slot.in_flight.load(Ordering::Acquire);
        if in_flight != 0 && !self.force_release_if_stalled(in_flight) {
            self.slot.rejected_busy.fetch_add(1, Ordering::Relaxed);
            trace!(in_flight, "engine busy, dropping frame");
            return Ok(false);
        }

        let image = prepare()?;

        let now = self.clock.now_ms();
        let timestamp_ms = now.max(self.last_timestamp_ms + 1);

        if self
            .slot
            .in_flight
            .compare_exchange(0, timestamp_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.slot.rejected_busy.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        self.last_timestamp_ms = timestamp_ms;
        self.slot.dispatched_at_ms.store(now, Ordering::Relaxed);
        self.slot.submitted.fetch_add(1, Ordering::Relaxed);

        let completion = Completion {
            timestamp_ms,
            slot: Arc::clone(&self.slot),
            reported: false,
        };
        trace!(timestamp_ms, "dispatching frame");
        self.engine.submit_async(image, timestamp_ms, completion);
        Ok(true)
    }

    pub fn is_busy(&self) -> bool {
        self.slot.in_flight.load(Ordering::Acquire) != 0
    }

    pub fn last_timestamp_ms(&self) -> u64 {
        self.last_timestamp_ms
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            submitted: self.slot.submitted.load(Ordering::Relaxed),
            rejected_busy: self.slot.rejected_busy.load(Ordering::Relaxed),
            completed: self.slot.completed.load(Ordering::Relaxed),
            failed: self.slot.failed.load(Ordering::Relaxed),
            timed_out: self.slot.timed_out.load(Ordering::Relaxed),
        }
    }

    /// Closes the engine. Consumes the gateway so it happens exactly once.
    pub fn close(mut self) {
        self.engine.close();
    }

    fn force_release_if_stalled(&self, in_flight: u64) -> bool {
        let Some(timeout) = self.stall_timeout else {
            return false;
        };
        let started = self.slot.dispatched_at_ms.load(Ordering::Relaxed);
        let waited = self.clock.now_ms().saturating_sub(started);
        if waited < timeout.as_millis() as u64 {
            return false;
        }

        if self.slot.release(in_flight) {
            self.slot.timed_out.fetch_add(1, Ordering::Relaxed);
            warn!(
                timestamp_ms = in_flight,
                waited_ms = waited,
                "inference stalled, freeing the slot"
            );
        }
        // Either we freed it or the completion beat us to it.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// Clock the test moves by hand.
    #[derive(Clone, Default)]
    struct ManualClock(Arc<AtomicU64>);

    impl ManualClock {
        fn set(&self, ms: u64) {
            self.0.store(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Engine that parks completions until the test releases them.
    #[derive(Clone, Default)]
    struct ParkingEngine {
        parked: Arc<Mutex<Vec<Completion>>>,
        timestamps: Arc<Mutex<Vec<u64>>>,
    }

    impl ParkingEngine {
        fn complete_next(&self) {
            let completion = self.parked.lock().unwrap().remove(0);
            let ts = completion.timestamp_ms();
            completion.succeed(InferenceResult::no_face(ts));
        }

        fn fail_next(&self) {
            let completion = self.parked.lock().unwrap().remove(0);
            completion.fail(EngineError::Inference("boom".into()));
        }

        fn drop_next(&self) {
            let completion = self.parked.lock().unwrap().remove(0);
            drop(completion);
        }
    }

    impl LandmarkEngine for ParkingEngine {
        fn submit_async(&mut self, _image: UprightImage, timestamp_ms: u64, completion: Completion) {
            self.timestamps.lock().unwrap().push(timestamp_ms);
            self.parked.lock().unwrap().push(completion);
        }

        fn close(&mut self) {}
    }

    fn image() -> UprightImage {
        UprightImage::new(2, 2)
    }

    #[test]
    fn second_submit_is_dropped_until_completion() {
        let engine = ParkingEngine::default();
        let clock = ManualClock::default();
        clock.set(1_000);
        let (mut gateway, events) = InferenceGateway::with_clock(engine.clone(), clock, None);

        assert!(gateway.submit(image()));
        assert!(!gateway.submit(image()));
        assert_eq!(engine.timestamps.lock().unwrap().len(), 1);

        engine.complete_next();
        assert!(matches!(events.try_recv(), Ok(GatewayEvent::Completed(_))));
        assert!(gateway.submit(image()));

        let stats = gateway.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.rejected_busy, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn error_completion_frees_the_slot() {
        let engine = ParkingEngine::default();
        let (mut gateway, events) =
            InferenceGateway::with_clock(engine.clone(), ManualClock::default(), None);

        assert!(gateway.submit(image()));
        engine.fail_next();
        assert!(!gateway.is_busy());
        assert!(matches!(events.try_recv(), Ok(GatewayEvent::Failed { .. })));
        assert!(gateway.submit(image()));
        assert_eq!(gateway.stats().failed, 1);
    }

    #[test]
    fn dropped_completion_frees_the_slot() {
        let engine = ParkingEngine::default();
        let (mut gateway, events) =
            InferenceGateway::with_clock(engine.clone(), ManualClock::default(), None);

        assert!(gateway.submit(image()));
        engine.drop_next();
        assert!(matches!(
            events.try_recv(),
            Ok(GatewayEvent::Failed {
                error: EngineError::Abandoned,
                ..
            })
        ));
        assert!(gateway.submit(image()));
    }

    #[test]
    fn timestamps_increase_when_clock_stalls_or_rewinds() {
        let engine = ParkingEngine::default();
        let clock = ManualClock::default();
        let (mut gateway, _events) =
            InferenceGateway::with_clock(engine.clone(), clock.clone(), None);

        for now in [5_000, 5_000, 4_000, 0, 6_000] {
            clock.set(now);
            assert!(gateway.submit(image()));
            engine.complete_next();
        }

        let ts = engine.timestamps.lock().unwrap().clone();
        assert_eq!(ts, vec![5_000, 5_001, 5_002, 5_003, 6_000]);
    }

    #[test]
    fn no_timeout_means_a_stalled_engine_blocks_forever() {
        let engine = ParkingEngine::default();
        let clock = ManualClock::default();
        let (mut gateway, _events) =
            InferenceGateway::with_clock(engine.clone(), clock.clone(), None);

        clock.set(10);
        assert!(gateway.submit(image()));
        clock.set(10_000_000);
        assert!(!gateway.submit(image()));
    }

    #[test]
    fn stall_timeout_frees_slot_and_ignores_late_completion() {
        let engine = ParkingEngine::default();
        let clock = ManualClock::default();
        let (mut gateway, events) = InferenceGateway::with_clock(
            engine.clone(),
            clock.clone(),
            Some(Duration::from_millis(500)),
        );

        clock.set(1_000);
        assert!(gateway.submit(image()));
        clock.set(1_200);
        assert!(!gateway.submit(image()));

        clock.set(1_600);
        assert!(gateway.submit(image()));
        assert_eq!(gateway.stats().timed_out, 1);

        // The stale request finally answers; the new one must stay in flight.
        engine.complete_next();
        assert!(gateway.is_busy());
        assert!(events.try_recv().is_err());

        engine.complete_next();
        assert!(!gateway.is_busy());
        assert!(matches!(events.try_recv(), Ok(GatewayEvent::Completed(_))));
    }

    #[test]
    fn completion_from_another_thread_frees_the_slot() {
        let engine = ParkingEngine::default();
        let (mut gateway, events) =
            InferenceGateway::with_clock(engine.clone(), ManualClock::default(), None);

        assert!(gateway.submit(image()));
        let worker = engine.clone();
        std::thread::spawn(move || worker.complete_next())
            .join()
            .unwrap();

        assert!(matches!(events.recv(), Ok(GatewayEvent::Completed(_))));
        assert!(gateway.submit(image()));
    }

    #[test]
    fn reports_from_many_threads_arrive_in_dispatch_order() {
        let engine = ParkingEngine::default();
        let clock = ManualClock::default();
        let (mut gateway, events) =
            InferenceGateway::with_clock(engine.clone(), clock.clone(), None);

        let mut workers = Vec::new();
        for now in 1..=200u64 {
            clock.set(now);
            while gateway.is_busy() {
                std::thread::yield_now();
            }
            assert!(gateway.submit(image()));
            let worker = engine.clone();
            workers.push(std::thread::spawn(move || worker.complete_next()));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        let order: Vec<u64> = events
            .try_iter()
            .map(|event| match event {
                GatewayEvent::Completed(result) => result.timestamp_ms,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(order, (1..=200).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn accepted_timestamps_strictly_increase(clock_reads in prop::collection::vec(0u64..10_000, 1..40)) {
            let engine = ParkingEngine::default();
            let clock = ManualClock::default();
            let (mut gateway, _events) =
                InferenceGateway::with_clock(engine.clone(), clock.clone(), None);

            for now in clock_reads {
                clock.set(now);
                prop_assert!(gateway.submit(image()));
                engine.complete_next();
            }

            let ts = engine.timestamps.lock().unwrap().clone();
            prop_assert!(ts.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(ts.iter().all(|&t| t > 0));
        }
    }
}
