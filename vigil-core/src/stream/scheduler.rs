//! Rate-limited frame capture.
//!
//! The scheduler does not own a timer. The session's heartbeat calls
//! [`FrameScheduler::tick`] on every refresh and re-arms regardless of the
//! outcome; the scheduler decides whether this tick produces a frame.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::stream::capture::CaptureDevice;
use crate::stream::connection::FrameSink;
use crate::stream::encoder::FrameEncoder;

/// Minimum spacing between accepted frames (≤ 5 fps).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(200);

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Session is not active.
    Inactive,
    /// Transport is not open.
    NotReady,
    /// Too soon after the last accepted frame.
    Throttled,
    /// Device has not reported usable dimensions yet.
    AwaitingDevice,
    /// A frame was produced (or attempted) and discarded.
    Dropped,
    /// A frame was accepted by the transport.
    Sent,
}

pub struct FrameScheduler {
    interval: Duration,
    last_frame_time: Option<Instant>,
    encoder: FrameEncoder,
    frames_sent: u64,
    frames_dropped: u64,
}

impl FrameScheduler {
    pub fn new(interval: Duration, encoder: FrameEncoder) -> Self {
        Self {
            interval,
            last_frame_time: None,
            encoder,
            frames_sent: 0,
            frames_dropped: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time of the last frame the transport accepted.
    pub fn last_frame_time(&self) -> Option<Instant> {
        self.last_frame_time
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Run one heartbeat tick at `now`.
    ///
    /// Never fails: draw and encode errors are logged and counted as a
    /// dropped frame. `last_frame_time` only moves when `sink` accepts the
    /// frame, so a congested tick is retried on the next one.
    pub fn tick(
        &mut self,
        now: Instant,
        active: bool,
        device: &mut dyn CaptureDevice,
        sink: &mut dyn FrameSink,
    ) -> TickOutcome {
        if !active {
            return TickOutcome::Inactive;
        }
        if !sink.is_ready() {
            return TickOutcome::NotReady;
        }
        if let Some(last) = self.last_frame_time {
            if now.saturating_duration_since(last) < self.interval {
                return TickOutcome::Throttled;
            }
        }
        let Some(native) = device.resolution().filter(|r| r.is_usable()) else {
            return TickOutcome::AwaitingDevice;
        };

        let frame = match self.encoder.capture(device, native) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "frame capture failed, dropping");
                self.frames_dropped += 1;
                return TickOutcome::Dropped;
            }
        };

        let bytes = frame.payload.len();
        if sink.send(frame.payload) {
            self.last_frame_time = Some(now);
            self.frames_sent += 1;
            trace!(bytes, seq = self.frames_sent, "frame sent");
            TickOutcome::Sent
        } else {
            self.frames_dropped += 1;
            debug!(bytes, "frame dropped by transport");
            TickOutcome::Dropped
        }
    }

    /// Forget the throttle timestamp and counters.
    pub fn reset(&mut self) {
        self.last_frame_time = None;
        self.frames_sent = 0;
        self.frames_dropped = 0;
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_INTERVAL, FrameEncoder::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VigilError;
    use crate::stream::capture::SyntheticCamera;
    use crate::stream::encoder::DATA_URL_PREFIX;
    use crate::stream::types::Resolution;
    use async_trait::async_trait;
    use image::RgbImage;

    struct RecordingSink {
        ready: bool,
        accept: bool,
        sent: Vec<String>,
    }

    impl RecordingSink {
        fn open() -> Self {
            Self {
                ready: true,
                accept: true,
                sent: Vec::new(),
            }
        }
    }

    impl FrameSink for RecordingSink {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn send(&mut self, payload: String) -> bool {
            if self.accept {
                self.sent.push(payload);
            }
            self.accept
        }
    }

    struct BrokenDevice;

    #[async_trait]
    impl CaptureDevice for BrokenDevice {
        fn resolution(&self) -> Option<Resolution> {
            Some(Resolution::new(4, 4))
        }
        async fn wait_ready(&mut self) -> Result<Resolution, VigilError> {
            Ok(Resolution::new(4, 4))
        }
        fn draw(&mut self, _surface: &mut RgbImage) -> Result<(), VigilError> {
            Err(VigilError::Encode("sensor glitch".into()))
        }
        fn release(&mut self) {}
        fn is_released(&self) -> bool {
            false
        }
    }

    async fn ready_camera() -> SyntheticCamera {
        let mut cam = SyntheticCamera::new(Resolution::new(32, 24), Duration::ZERO);
        cam.wait_ready().await.unwrap();
        cam
    }

    #[tokio::test]
    async fn throttles_to_frame_interval() {
        let mut cam = ready_camera().await;
        let mut sink = RecordingSink::open();
        let mut sched = FrameScheduler::default();
        let t0 = Instant::now();

        assert_eq!(sched.tick(t0, true, &mut cam, &mut sink), TickOutcome::Sent);
        for ms in [16, 100, 199] {
            let now = t0 + Duration::from_millis(ms);
            assert_eq!(sched.tick(now, true, &mut cam, &mut sink), TickOutcome::Throttled);
        }
        let now = t0 + Duration::from_millis(200);
        assert_eq!(sched.tick(now, true, &mut cam, &mut sink), TickOutcome::Sent);

        assert_eq!(sink.sent.len(), 2);
        assert!(sink.sent[0].starts_with(DATA_URL_PREFIX));
        assert_eq!(sched.last_frame_time(), Some(now));
    }

    #[tokio::test]
    async fn inactive_or_closed_produces_nothing() {
        let mut cam = ready_camera().await;
        let mut sink = RecordingSink::open();
        let mut sched = FrameScheduler::default();
        let now = Instant::now();

        assert_eq!(sched.tick(now, false, &mut cam, &mut sink), TickOutcome::Inactive);
        sink.ready = false;
        assert_eq!(sched.tick(now, true, &mut cam, &mut sink), TickOutcome::NotReady);
        assert!(sink.sent.is_empty());
        assert_eq!(sched.frames_dropped(), 0);
    }

    #[tokio::test]
    async fn waits_for_device_metadata() {
        let mut cam = SyntheticCamera::new(Resolution::new(32, 24), Duration::from_millis(5));
        let mut sink = RecordingSink::open();
        let mut sched = FrameScheduler::default();

        let outcome = sched.tick(Instant::now(), true, &mut cam, &mut sink);
        assert_eq!(outcome, TickOutcome::AwaitingDevice);
        assert!(sched.last_frame_time().is_none());
    }

    #[tokio::test]
    async fn congestion_drop_does_not_advance_throttle() {
        let mut cam = ready_camera().await;
        let mut sink = RecordingSink::open();
        sink.accept = false;
        let mut sched = FrameScheduler::default();
        let t0 = Instant::now();

        assert_eq!(sched.tick(t0, true, &mut cam, &mut sink), TickOutcome::Dropped);
        assert!(sched.last_frame_time().is_none());

        // The very next tick is eligible again.
        sink.accept = true;
        let t1 = t0 + Duration::from_millis(16);
        assert_eq!(sched.tick(t1, true, &mut cam, &mut sink), TickOutcome::Sent);
        assert_eq!(sched.frames_dropped(), 1);
        assert_eq!(sched.frames_sent(), 1);
    }

    #[test]
    fn draw_failure_is_a_dropped_frame() {
        let mut dev = BrokenDevice;
        let mut sink = RecordingSink::open();
        let mut sched = FrameScheduler::default();
        let t0 = Instant::now();

        assert_eq!(sched.tick(t0, true, &mut dev, &mut sink), TickOutcome::Dropped);
        assert_eq!(sched.tick(t0, true, &mut dev, &mut sink), TickOutcome::Dropped);
        assert!(sink.sent.is_empty());
        assert_eq!(sched.frames_dropped(), 2);
    }

    #[tokio::test]
    async fn reset_clears_throttle() {
        let mut cam = ready_camera().await;
        let mut sink = RecordingSink::open();
        let mut sched = FrameScheduler::default();
        let t0 = Instant::now();
        sched.tick(t0, true, &mut cam, &mut sink);

        sched.reset();
        assert!(sched.last_frame_time().is_none());
        assert_eq!(sched.frames_sent(), 0);
        assert_eq!(sched.tick(t0, true, &mut cam, &mut sink), TickOutcome::Sent);
    }
}
