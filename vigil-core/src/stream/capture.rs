//! Capture-device seam and the built-in video sources.
//!
//! The streaming core never talks to camera hardware directly. It asks a
//! [`DeviceProvider`] for a [`CaptureDevice`], waits for the device to
//! report its negotiated resolution, then draws frames out of it.
//!
//! Two sources ship with the crate:
//!
//! - [`SyntheticCamera`]: an animated test pattern at the hinted
//!   resolution, for demos and tests.
//! - [`ImageSequenceCamera`]: loops still images from a directory at the
//!   hinted frame rate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use image::{GenericImage, Rgb, RgbImage};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::VigilError;
use crate::stream::types::Resolution;

// ── CaptureHint ──────────────────────────────────────────────────

/// Requested resolution and frame rate. Devices may negotiate something
/// else; the session always uses what the device reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHint {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureHint {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 15,
        }
    }
}

// ── Traits ───────────────────────────────────────────────────────

/// A live video handle owned exclusively by one streaming session.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Negotiated resolution, or `None` until the device has reported
    /// usable metadata.
    fn resolution(&self) -> Option<Resolution>;

    /// Wait until the device reports its metadata.
    async fn wait_ready(&mut self) -> Result<Resolution, VigilError>;

    /// Draw the current video image into `surface`, which the caller has
    /// sized to [`resolution`](Self::resolution).
    fn draw(&mut self, surface: &mut RgbImage) -> Result<(), VigilError>;

    /// Release the device grant. Idempotent.
    fn release(&mut self);

    fn is_released(&self) -> bool;
}

/// Device-acquisition API.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    async fn acquire(&self, hint: &CaptureHint) -> Result<Box<dyn CaptureDevice>, VigilError>;
}

// ── SyntheticCamera ──────────────────────────────────────────────

/// Animated test pattern: a slow gradient with a bright square sweeping
/// across the frame.
pub struct SyntheticCamera {
    resolution: Resolution,
    warmup: Duration,
    ready: bool,
    released: bool,
    started_at: Instant,
}

impl SyntheticCamera {
    pub fn new(resolution: Resolution, warmup: Duration) -> Self {
        Self {
            resolution,
            warmup,
            ready: false,
            released: false,
            started_at: Instant::now(),
        }
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCamera {
    fn resolution(&self) -> Option<Resolution> {
        self.ready.then_some(self.resolution)
    }

    async fn wait_ready(&mut self) -> Result<Resolution, VigilError> {
        if self.released {
            return Err(VigilError::Device("device already released".into()));
        }
        if !self.ready {
            tokio::time::sleep(self.warmup).await;
            self.ready = true;
        }
        Ok(self.resolution)
    }

    fn draw(&mut self, surface: &mut RgbImage) -> Result<(), VigilError> {
        if self.released {
            return Err(VigilError::Device("device released".into()));
        }
        let (w, h) = surface.dimensions();
        if w == 0 || h == 0 {
            return Err(VigilError::Encode("zero-sized capture surface".into()));
        }

        let t = self.started_at.elapsed().as_millis() as u32;
        let shade = (t / 40 % 256) as u8;
        let side = (h / 3).max(1);
        let travel = w.saturating_sub(side).max(1);
        let sx = (t / 10) % travel;
        let sy = (h - side) / 2;

        for (x, y, px) in surface.enumerate_pixels_mut() {
            let inside = x >= sx && x < sx + side && y >= sy && y < sy + side;
            *px = if inside {
                Rgb([235, 225, 210])
            } else {
                Rgb([(x * 255 / w) as u8, (y * 255 / h) as u8, shade])
            };
        }
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            debug!("synthetic camera released");
        }
        self.released = true;
        self.ready = false;
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

/// Hands out [`SyntheticCamera`]s at the hinted resolution.
#[derive(Debug, Clone, Default)]
pub struct SyntheticProvider {
    pub warmup: Duration,
}

#[async_trait]
impl DeviceProvider for SyntheticProvider {
    async fn acquire(&self, hint: &CaptureHint) -> Result<Box<dyn CaptureDevice>, VigilError> {
        let resolution = Resolution::new(hint.width, hint.height);
        if !resolution.is_usable() {
            return Err(VigilError::Device(format!(
                "unsupported capture resolution {resolution}"
            )));
        }
        info!(%resolution, fps = hint.fps, "synthetic camera acquired");
        Ok(Box::new(SyntheticCamera::new(resolution, self.warmup)))
    }
}

// ── ImageSequenceCamera ──────────────────────────────────────────

/// Loops a fixed set of stills as if they were live video.
pub struct ImageSequenceCamera {
    frames: Vec<RgbImage>,
    resolution: Resolution,
    fps: u32,
    started_at: Instant,
    released: bool,
}

impl ImageSequenceCamera {
    /// All frames are resized to the first frame's dimensions.
    pub fn new(mut frames: Vec<RgbImage>, fps: u32) -> Result<Self, VigilError> {
        let first = frames
            .first()
            .ok_or_else(|| VigilError::Device("image sequence is empty".into()))?;
        let (w, h) = first.dimensions();
        let resolution = Resolution::new(w, h);
        if !resolution.is_usable() {
            return Err(VigilError::Device("image sequence has zero-sized frames".into()));
        }

        for frame in frames.iter_mut() {
            if frame.dimensions() != (w, h) {
                *frame = image::imageops::resize(frame, w, h, image::imageops::FilterType::Triangle);
            }
        }

        Ok(Self {
            frames,
            resolution,
            fps: fps.max(1),
            started_at: Instant::now(),
            released: false,
        })
    }

    fn current_index(&self) -> usize {
        let elapsed_ms = self.started_at.elapsed().as_millis() as u64;
        let n = elapsed_ms * self.fps as u64 / 1000;
        (n % self.frames.len() as u64) as usize
    }
}

#[async_trait]
impl CaptureDevice for ImageSequenceCamera {
    fn resolution(&self) -> Option<Resolution> {
        (!self.released).then_some(self.resolution)
    }

    async fn wait_ready(&mut self) -> Result<Resolution, VigilError> {
        if self.released {
            return Err(VigilError::Device("device already released".into()));
        }
        Ok(self.resolution)
    }

    fn draw(&mut self, surface: &mut RgbImage) -> Result<(), VigilError> {
        if self.released {
            return Err(VigilError::Device("device released".into()));
        }
        let frame = &self.frames[self.current_index()];
        surface
            .copy_from(frame, 0, 0)
            .map_err(|e| VigilError::Encode(format!("draw failed: {e}")))
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

/// Loads every `.png` / `.jpg` / `.jpeg` in a directory, sorted by name.
#[derive(Debug, Clone)]
pub struct ImageDirectoryProvider {
    dir: PathBuf,
}

impl ImageDirectoryProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn load(dir: &Path) -> Result<Vec<RgbImage>, VigilError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| VigilError::Device(format!("cannot open {}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        paths
            .iter()
            .map(|p| {
                image::open(p)
                    .map(|img| img.to_rgb8())
                    .map_err(|e| VigilError::Device(format!("cannot decode {}: {e}", p.display())))
            })
            .collect()
    }
}

#[async_trait]
impl DeviceProvider for ImageDirectoryProvider {
    async fn acquire(&self, hint: &CaptureHint) -> Result<Box<dyn CaptureDevice>, VigilError> {
        let dir = self.dir.clone();
        let frames = tokio::task::spawn_blocking(move || Self::load(&dir))
            .await
            .map_err(|e| VigilError::Device(format!("loader task failed: {e}")))??;
        let camera = ImageSequenceCamera::new(frames, hint.fps)?;
        info!(
            dir = %self.dir.display(),
            frames = camera.frames.len(),
            resolution = %camera.resolution,
            "image sequence acquired"
        );
        Ok(Box::new(camera))
    }
}

// ── Tests ────────────────────────────────────────────────────────
