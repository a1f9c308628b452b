//! Stream session coordinator.
//!
//! [`StreamSession`] is the user-facing start/stop control. Each `start()`
//! builds a fresh [`LiveSession`] that owns the capture device, the
//! connection manager, the scheduler, the result channel and the renderer,
//! and runs it on a single task:
//!
//! ```text
//!              ┌──────────────────── LiveSession task ────────────────────┐
//!  cancel ───► │ select! {                                                 │
//!              │   cancelled            → teardown                         │
//!              │   connection event     → ResultChannel → OverlayRenderer  │──► overlay (watch)
//!              │   heartbeat tick       → FrameScheduler → connection.send │
//!              │ }                                                         │──► notices (broadcast)
//!              └───────────────────────────────────────────────────────────┘
//! ```
//!
//! All mutable state is touched only from that task, so nothing is
//! locked. Cancelling the task drops every pending timer and handshake
//! before the device is released.

use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::VigilError;
use crate::state::connection::BackoffPolicy;
use crate::stream::capture::{CaptureDevice, CaptureHint, DeviceProvider};
use crate::stream::connection::{ConnectionEvent, ConnectionManager};
use crate::stream::encoder::{DEFAULT_QUALITY, FrameEncoder};
use crate::stream::link::Connector;
use crate::stream::render::{OverlayRenderer, OverlayStyle};
use crate::stream::results::{MergePolicy, ResultChannel};
use crate::stream::scheduler::{DEFAULT_FRAME_INTERVAL, FrameScheduler};
use crate::stream::types::{Resolution, ResultSnapshot};

const NOTICE_CAPACITY: usize = 32;

// ── SessionConfig ────────────────────────────────────────────────

/// Policy values for one streaming session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub capture: CaptureHint,
    /// Minimum spacing between transmitted frames.
    pub frame_interval: Duration,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
    /// Heartbeat period (display refresh).
    pub refresh_interval: Duration,
    pub backoff: BackoffPolicy,
    pub merge_policy: MergePolicy,
    /// Render viewport; the negotiated video resolution when `None`.
    pub viewport: Option<Resolution>,
    /// How long to wait for the device to report its metadata.
    pub ready_timeout: Duration,
    pub overlay_style: OverlayStyle,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture: CaptureHint::default(),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            jpeg_quality: DEFAULT_QUALITY,
            refresh_interval: Duration::from_millis(16),
            backoff: BackoffPolicy::default(),
            merge_policy: MergePolicy::default(),
            viewport: None,
            ready_timeout: Duration::from_secs(10),
            overlay_style: OverlayStyle::default(),
        }
    }
}

// ── SessionNotice ────────────────────────────────────────────────

/// Lifecycle notices for the operator surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    Started { resolution: Resolution },
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnection was abandoned. The session has torn itself down.
    ConnectionLost { attempts: u32 },
    Stopped { frames_sent: u64, frames_dropped: u64 },
}

// ── StreamSession ────────────────────────────────────────────────

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Start/stop control for at most one live session.
pub struct StreamSession {
    config: SessionConfig,
    provider: Arc<dyn DeviceProvider>,
    connector: Arc<dyn Connector>,
    running: Option<Running>,
    notices: broadcast::Sender<SessionNotice>,
    overlay: watch::Sender<Arc<RgbaImage>>,
}

impl StreamSession {
    pub fn new(
        config: SessionConfig,
        provider: Arc<dyn DeviceProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let (overlay, _) = watch::channel(Arc::new(RgbaImage::new(0, 0)));
        Self {
            config,
            provider,
            connector,
            running: None,
            notices,
            overlay,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// A session task is live. Turns false on its own after the
    /// connection is abandoned.
    pub fn is_active(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// The visible overlay surface, republished after every render.
    pub fn overlay(&self) -> watch::Receiver<Arc<RgbaImage>> {
        self.overlay.subscribe()
    }

    /// Acquire the device, wait for its metadata, open the connection and
    /// start the heartbeat.
    ///
    /// Device failures are returned as [`VigilError::Device`] and leave
    /// the session inactive.
    pub async fn start(&mut self) -> Result<Resolution, VigilError> {
        if self.is_active() {
            return Err(VigilError::SessionActive);
        }
        // Reap a session that ended by itself.
        self.running = None;

        let mut device = self.provider.acquire(&self.config.capture).await.map_err(|e| {
            error!(error = %e, "device acquisition failed");
            e
        })?;

        let video = match tokio::time::timeout(self.config.ready_timeout, device.wait_ready()).await {
            Ok(Ok(resolution)) if resolution.is_usable() => resolution,
            Ok(Ok(resolution)) => {
                device.release();
                return Err(VigilError::Device(format!(
                    "device reported unusable resolution {resolution}"
                )));
            }
            Ok(Err(e)) => {
                device.release();
                error!(error = %e, "device failed to become ready");
                return Err(e);
            }
            Err(_) => {
                device.release();
                return Err(VigilError::Device(format!(
                    "device not ready after {:?}",
                    self.config.ready_timeout
                )));
            }
        };

        let viewport = self.config.viewport.unwrap_or(video);
        let mut connection = ConnectionManager::new(Arc::clone(&self.connector), self.config.backoff);
        if let Err(e) = connection.open() {
            device.release();
            return Err(e);
        }

        let live = LiveSession {
            device,
            video,
            viewport,
            fixed_viewport: self.config.viewport.is_some(),
            refresh: self.config.refresh_interval,
            connection,
            scheduler: FrameScheduler::new(
                self.config.frame_interval,
                FrameEncoder::new(self.config.jpeg_quality),
            ),
            results: ResultChannel::new(self.config.merge_policy),
            renderer: OverlayRenderer::new(viewport, self.config.overlay_style),
            overlay: self.overlay.clone(),
            notices: self.notices.clone(),
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(live.run(cancel.clone()));
        self.running = Some(Running { cancel, handle });

        info!(%video, %viewport, "stream session started");
        let _ = self.notices.send(SessionNotice::Started { resolution: video });
        Ok(video)
    }

    /// Stop the live session and wait for its teardown. Idempotent.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "session task ended abnormally");
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
        }
    }
}

// ── LiveSession ──────────────────────────────────────────────────

enum EndReason {
    Stopped,
    Abandoned,
}

/// Everything one "streaming on" period owns.
struct LiveSession {
    device: Box<dyn CaptureDevice>,
    video: Resolution,
    viewport: Resolution,
    fixed_viewport: bool,
    refresh: Duration,
    connection: ConnectionManager,
    scheduler: FrameScheduler,
    results: ResultChannel,
    renderer: OverlayRenderer,
    overlay: watch::Sender<Arc<RgbaImage>>,
    notices: broadcast::Sender<SessionNotice>,
}

impl LiveSession {
    async fn run(mut self, cancel: CancellationToken) {
        let mut heartbeat = tokio::time::interval(self.refresh);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break EndReason::Stopped,
                event = self.connection.next_event() => {
                    if let Some(reason) = self.on_connection_event(event) {
                        break reason;
                    }
                }
                _ = heartbeat.tick() => self.on_tick(Instant::now()),
            }
        };

        self.teardown(reason);
    }

    fn on_tick(&mut self, now: Instant) {
        if let Some(current) = self.device.resolution() {
            if current.is_usable() && current != self.video {
                info!(from = %self.video, to = %current, "video geometry changed");
                self.video = current;
                if !self.fixed_viewport {
                    self.viewport = current;
                }
            }
        }
        self.scheduler
            .tick(now, true, self.device.as_mut(), &mut self.connection);
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) -> Option<EndReason> {
        match event {
            ConnectionEvent::Opened => {
                let _ = self.notices.send(SessionNotice::Connected);
            }
            ConnectionEvent::Message(text) => {
                if let Some(snapshot) = self.results.ingest(&text, self.video) {
                    self.paint(&snapshot);
                }
            }
            ConnectionEvent::Reconnecting { attempt, delay } => {
                let _ = self.notices.send(SessionNotice::Reconnecting { attempt, delay });
            }
            ConnectionEvent::Abandoned { attempts } => {
                let err = VigilError::PermanentDisconnect { attempts };
                error!(error = %err, "connection lost");
                let _ = self.notices.send(SessionNotice::ConnectionLost { attempts });
                return Some(EndReason::Abandoned);
            }
        }
        None
    }

    fn paint(&mut self, snapshot: &ResultSnapshot) {
        match self.renderer.render(snapshot, self.viewport, self.video) {
            Ok(outcome) => {
                debug!(?outcome, "overlay presented");
                self.overlay.send_replace(Arc::new(self.renderer.front().clone()));
            }
            Err(e) => warn!(error = %e, "render failed, keeping previous overlay"),
        }
    }

    fn teardown(&mut self, reason: EndReason) {
        self.connection.stop();
        self.device.release();
        self.results.reset();
        self.renderer.clear(self.viewport);
        self.overlay.send_replace(Arc::new(self.renderer.front().clone()));

        let frames_sent = self.scheduler.frames_sent();
        let frames_dropped = self.scheduler.frames_dropped();
        self.scheduler.reset();
        match reason {
            EndReason::Stopped => info!(frames_sent, frames_dropped, "stream session stopped"),
            EndReason::Abandoned => {
                warn!(frames_sent, frames_dropped, "stream session torn down after disconnect")
            }
        }
        let _ = self.notices.send(SessionNotice::Stopped {
            frames_sent,
            frames_dropped,
        });
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.device.release();
    }
}

// ── Tests ────────────────────────────────────────────────────────
